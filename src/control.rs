// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Name based control of services, for jobs and the shell.
use crate::error::*;
use crate::service::Service;
use crate::status::{ServiceStatus, StatusCallback};
use crate::supervisor::ProcessSupervisor;
use basic::time_util::USEC_PER_SEC;
use std::rc::Rc;
use std::str::FromStr;

/// longest single wait on the loop while waiting for a status, in ms
const WAIT_SLICE_MS: u64 = 100;

/// action of ServiceControl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "restart" => Ok(ControlAction::Restart),
            _ => Err(format!("unknown control action: {}", s)),
        }
    }
}

/// Looks services up by name and forwards to the supervisor.
#[derive(Clone)]
pub struct ServiceControl {
    supervisor: Rc<ProcessSupervisor>,
}

impl ServiceControl {
    ///
    pub fn new(supervisor: Rc<ProcessSupervisor>) -> ServiceControl {
        ServiceControl { supervisor }
    }

    fn lookup(&self, name: &str) -> Result<Rc<Service>> {
        self.supervisor
            .registry()
            .get(name)
            .ok_or_else(|| Error::NotFound {
                service: name.to_string(),
            })
    }

    ///
    pub fn start_service_by_name(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;
        self.supervisor.start(&service)
    }

    ///
    pub fn stop_service_by_name(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;
        self.supervisor.stop(&service)
    }

    /// start, stop or restart name
    pub fn service_control(&self, name: &str, action: ControlAction) -> Result<()> {
        let service = self.lookup(name)?;
        log::info!("Control {:?} of service {}", action, name);
        match action {
            ControlAction::Start => self.supervisor.start(&service),
            ControlAction::Stop => self.supervisor.stop(&service),
            ControlAction::Restart => self.supervisor.restart(&service),
        }
    }

    /// start name after delay_ms
    pub fn start_service_by_timer(&self, name: &str, delay_ms: u64) -> Result<()> {
        let service = self.lookup(name)?;
        self.supervisor.start_by_timer(&service, delay_ms)
    }

    ///
    pub fn stop_service_timer(&self, name: &str) -> Result<()> {
        self.lookup(name)?;
        self.supervisor.cancel_timer(name);
        Ok(())
    }

    ///
    pub fn stop_all_services(&self) {
        self.supervisor.stop_all();
    }

    /// current status of name
    pub fn service_status(&self, name: &str) -> Result<ServiceStatus> {
        self.lookup(name)?;
        Ok(self.supervisor.status().status(name))
    }

    /// run the loop until name reaches status or timeout_secs pass
    pub fn wait_for_status(&self, name: &str, status: ServiceStatus, timeout_secs: u64) -> Result<()> {
        self.lookup(name)?;
        let events = self.supervisor.events();
        let deadline = events
            .now()
            .saturating_add(timeout_secs.saturating_mul(USEC_PER_SEC));

        loop {
            if self.supervisor.status().status(name) == status {
                return Ok(());
            }
            let now = events.now();
            if now >= deadline || events.is_exit() {
                return Err(Error::Timeout {
                    service: name.to_string(),
                });
            }

            let left_ms = ((deadline - now) / 1000).clamp(1, WAIT_SLICE_MS);
            events.run(left_ms as i32).context(EventSnafu)?;
        }
    }

    /// call callback on every later status change of name
    pub fn watch_for_status(&self, name: &str, callback: StatusCallback) -> Result<()> {
        self.lookup(name)?;
        self.supervisor.status().watch(name, callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup_tracker::CgroupTracker;
    use crate::collaborator::{NoSandbox, ShellCommands, SystemReboot};
    use crate::crash::MonotonicClock;
    use crate::registry::ServiceRegistry;
    use crate::service::{ServiceAttr, UnixResources};
    use crate::signals::{Reaper, SignalReactor};
    use crate::spawn::ForkSpawner;
    use crate::status::{StatusBus, StatusDirSink};
    use crate::supervisor::{Delegates, ExitStatus};
    use event::Events;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;
    use std::cell::RefCell;

    fn control(dir: &std::path::Path) -> ServiceControl {
        let events = Rc::new(Events::new().unwrap());
        let delegates = Delegates {
            spawner: Box::new(ForkSpawner::new(Box::new(NoSandbox))),
            reboot: Box::new(SystemReboot),
            commands: Box::new(ShellCommands),
            resources: Box::new(UnixResources::new(&dir.join("socket"))),
            clock: Box::new(MonotonicClock),
        };
        let supervisor = ProcessSupervisor::new(
            events.clone(),
            Rc::new(ServiceRegistry::new()),
            Rc::new(StatusBus::new(Box::new(StatusDirSink::new(&dir.join("status"))))),
            CgroupTracker::new(events, &dir.join("cgroup"), 10),
            delegates,
        );
        ServiceControl::new(supervisor)
    }

    #[test]
    fn test_unknown_service() {
        let dir = tempfile::tempdir().unwrap();
        let c = control(dir.path());
        assert!(matches!(
            c.start_service_by_name("nobody"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            c.service_control("nobody", ControlAction::Restart),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            c.stop_service_timer("nobody"),
            Err(Error::NotFound { .. })
        ));
        assert_eq!("RESTART".parse::<ControlAction>(), Ok(ControlAction::Restart));
    }

    #[test]
    fn test_wait_for_status_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let c = control(dir.path());
        c.supervisor
            .registry()
            .add(Service::new("netd", vec!["/bin/true".to_string()]))
            .unwrap();
        assert!(c.wait_for_status("netd", ServiceStatus::Idle, 0).is_ok());
        assert!(matches!(
            c.wait_for_status("netd", ServiceStatus::Running, 0),
            Err(Error::Timeout { .. })
        ));
    }

    /// waits only for the children of registered services
    struct ServiceReaper {
        registry: Rc<ServiceRegistry>,
    }

    impl Reaper for ServiceReaper {
        fn try_wait(&self) -> Option<(Pid, ExitStatus)> {
            for service in self.registry.services() {
                let pid = match service.running_pid() {
                    None => continue,
                    Some(p) => p,
                };
                match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::Exited(pid, code)) => {
                        return Some((pid, ExitStatus::Exited(code)))
                    }
                    Ok(WaitStatus::Signaled(pid, sig, _)) => {
                        return Some((pid, ExitStatus::Signaled(sig as i32)))
                    }
                    _ => continue,
                }
            }
            None
        }
    }

    #[test]
    fn test_start_by_timer_runs_real_child() {
        let dir = tempfile::tempdir().unwrap();
        let c = control(dir.path());
        let events = c.supervisor.events().clone();
        let reactor = SignalReactor::new(
            c.supervisor.clone(),
            Box::new(ServiceReaper {
                registry: c.supervisor.registry().clone(),
            }),
        );

        c.supervisor
            .registry()
            .add(
                Service::new("oneshot", vec!["/bin/true".to_string()])
                    .with_attrs(ServiceAttr::ONCE),
            )
            .unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        c.watch_for_status(
            "oneshot",
            Rc::new(move |_: &str, status: ServiceStatus| s.borrow_mut().push(status)),
        )
        .unwrap();

        c.start_service_by_timer("oneshot", 10).unwrap();
        let start = std::time::Instant::now();
        while c.service_status("oneshot").unwrap() != ServiceStatus::Stopped {
            assert!(start.elapsed() < std::time::Duration::from_secs(10));
            events.run(10).unwrap();
            reactor.reap_children();
        }
        c.wait_for_status("oneshot", ServiceStatus::Stopped, 1)
            .unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                ServiceStatus::Starting,
                ServiceStatus::Running,
                ServiceStatus::Stopped
            ]
        );
        events.clear();
    }
}
