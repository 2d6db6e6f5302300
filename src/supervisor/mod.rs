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

//! Lifecycle of service processes: start, stop, reap and the restart
//! decisions that follow an exit.
//!
//! All methods run on the loop thread. Child exits reach [`ProcessSupervisor::reap`]
//! through the signal reactor; nothing here waits for a process.
mod ondemand;
mod timer;

use crate::cgroup_tracker::CgroupTracker;
use crate::collaborator::{CommandRunner, Reboot};
use crate::crash::{self, Clock, CrashVerdict};
use crate::error::*;
use crate::registry::ServiceRegistry;
use crate::service::{ResourceProvider, Service, ServiceAttr, PID_NONE};
use crate::spawn::{SpawnPlan, Spawner};
use crate::status::{ServiceStatus, StatusBus};
use event::{EventState, Events, Source};
use nix::sys::signal::Signal;
use ondemand::OndemandWatch;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::path::Path;
use std::rc::{Rc, Weak};
use timer::ServiceTimer;

/// how a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with {}", code),
            ExitStatus::Signaled(sig) => write!(f, "killed by signal {}", sig),
        }
    }
}

/// the side effects the supervisor hands off
pub struct Delegates {
    pub spawner: Box<dyn Spawner>,
    pub reboot: Box<dyn Reboot>,
    pub commands: Box<dyn CommandRunner>,
    pub resources: Box<dyn ResourceProvider>,
    pub clock: Box<dyn Clock>,
}

/// Starts, stops and reaps services, and applies the crash policy.
pub struct ProcessSupervisor {
    me: Weak<ProcessSupervisor>,
    events: Rc<Events>,
    registry: Rc<ServiceRegistry>,
    status: Rc<StatusBus>,
    cgroups: CgroupTracker,
    delegates: Delegates,
    rebooting: Cell<bool>,
    ondemand: RefCell<HashMap<String, Vec<Rc<OndemandWatch>>>>,
    timers: RefCell<HashMap<String, Rc<ServiceTimer>>>,
}

impl ProcessSupervisor {
    ///
    pub fn new(
        events: Rc<Events>,
        registry: Rc<ServiceRegistry>,
        status: Rc<StatusBus>,
        cgroups: CgroupTracker,
        delegates: Delegates,
    ) -> Rc<ProcessSupervisor> {
        Rc::new_cyclic(|me| ProcessSupervisor {
            me: me.clone(),
            events,
            registry,
            status,
            cgroups,
            delegates,
            rebooting: Cell::new(false),
            ondemand: RefCell::new(HashMap::new()),
            timers: RefCell::new(HashMap::new()),
        })
    }

    ///
    pub fn registry(&self) -> &Rc<ServiceRegistry> {
        &self.registry
    }

    ///
    pub fn status(&self) -> &Rc<StatusBus> {
        &self.status
    }

    ///
    pub fn events(&self) -> &Rc<Events> {
        &self.events
    }

    /// whether the reboot path was entered
    pub fn is_rebooting(&self) -> bool {
        self.rebooting.get()
    }

    /// fork and exec service unless it is already running
    ///
    /// A missing program flags the service INVALID. Fork failures leave it
    /// stopped, the caller decides whether to try again.
    pub fn start(&self, service: &Service) -> Result<()> {
        let name = service.name();
        if service.pid() > 0 {
            log::debug!("Service {} is already running", name);
            return Ok(());
        }
        if service.has_attr(ServiceAttr::INVALID) {
            return Err(Error::Config {
                service: name.to_string(),
                reason: "service is invalid".to_string(),
            });
        }
        if self.rebooting.get() {
            return Err(Error::Resource {
                service: name.to_string(),
                reason: "system is going down".to_string(),
            });
        }

        let program = service.exec().first().map(|p| Path::new(p).exists());
        if program != Some(true) {
            service.set_attr(ServiceAttr::INVALID);
            return Err(Error::Config {
                service: name.to_string(),
                reason: format!("{:?} does not exist", service.exec().first()),
            });
        }

        self.open_resources(service)?;
        let plan = match SpawnPlan::new(service) {
            Ok(p) => p,
            Err(e) => {
                service.set_attr(ServiceAttr::INVALID);
                self.release_resources(service, !service.has_attr(ServiceAttr::ONDEMAND));
                return Err(e);
            }
        };

        self.status.notify(name, ServiceStatus::Starting, PID_NONE);
        let pid = match self.delegates.spawner.spawn(&plan) {
            Ok(p) => p,
            Err(e) => {
                self.release_resources(service, !service.has_attr(ServiceAttr::ONDEMAND));
                self.status.notify(name, ServiceStatus::Stopped, PID_NONE);
                return Err(e);
            }
        };

        service.set_pid(pid.as_raw());
        service.clear_attr(ServiceAttr::NEED_RESTART | ServiceAttr::NEED_STOP);
        self.disarm_ondemand(name);
        if let Err(e) = self.cgroups.attach(service) {
            log::warn!("Failed to put service {} into its cgroup: {}", name, e);
        }

        log::info!("Service {} started, pid {}", name, pid);
        self.status.notify(name, ServiceStatus::Running, pid.as_raw());
        Ok(())
    }

    /// kill service; its exit is handled later by reap
    pub fn stop(&self, service: &Service) -> Result<()> {
        let name = service.name();
        service.clear_attr(ServiceAttr::NEED_RESTART);
        self.cancel_timer(name);

        let pid = match service.running_pid() {
            None => return Ok(()),
            Some(p) => p,
        };

        /* a failed kill leaves the record running */
        self.delegates
            .spawner
            .kill(pid, Signal::SIGKILL)
            .map_err(|e| Error::Resource {
                service: name.to_string(),
                reason: format!("kill {}: {}", pid, e),
            })?;

        service.set_attr(ServiceAttr::NEED_STOP);
        self.release_resources(service, true);
        let held = service.take_held_fds();
        if !held.is_empty() {
            log::debug!("Closing {} held fd(s) of service {}", held.len(), name);
        }

        log::info!("Stopping service {}, pid {}", name, pid);
        self.status.notify(name, ServiceStatus::Stopping, pid.as_raw());
        Ok(())
    }

    /// stop a running service and start it again once it exited
    pub fn restart(&self, service: &Service) -> Result<()> {
        if service.running_pid().is_none() {
            return self.start(service);
        }

        self.stop(service)?;
        service.set_attr(ServiceAttr::NEED_RESTART);
        Ok(())
    }

    /// stop every registered service
    pub fn stop_all(&self) {
        let watches: Vec<String> = self.ondemand.borrow().keys().cloned().collect();
        for name in watches {
            self.disarm_ondemand(&name);
        }

        for service in self.registry.services() {
            if let Err(e) = self.stop(&service) {
                log::error!("Failed to stop service {}: {}", service.name(), e);
            }
        }
    }

    /// handle the exit of the main process of service
    pub fn reap(&self, service: &Rc<Service>, status: ExitStatus) {
        let name = service.name();
        log::info!("Service {} (pid {}) {}", name, service.pid(), status);

        if let Err(e) = self.cgroups.detach(service) {
            log::warn!("Failed to clean the cgroup of service {}: {}", name, e);
        }
        service.set_pid(PID_NONE);
        self.status.notify(name, ServiceStatus::Stopped, PID_NONE);

        /* sockets of ondemand services outlive the process, files never do */
        let keep_sockets = service.has_attr(ServiceAttr::ONDEMAND);
        self.release_resources(service, !keep_sockets);

        if service.has_attr(ServiceAttr::INVALID) {
            return;
        }

        if service.has_attr(ServiceAttr::NEED_STOP) {
            service.clear_attr(ServiceAttr::NEED_STOP);
            service.with_crash_counter(|c| c.reset());
            if service.has_attr(ServiceAttr::NEED_RESTART) {
                service.clear_attr(ServiceAttr::NEED_RESTART);
                self.start_logged(service);
            }
            return;
        }

        let need_restart = service.has_attr(ServiceAttr::NEED_RESTART);
        if service.has_attr(ServiceAttr::ONCE) && !need_restart {
            log::info!("Service {} runs once, not restarting", name);
            return;
        }
        if service.has_attr(ServiceAttr::ONDEMAND) && !need_restart {
            self.arm_ondemand(service);
            return;
        }
        if self.timers.borrow().contains_key(name) {
            log::debug!("Service {} has a start timer pending", name);
            return;
        }
        if self.rebooting.get() {
            return;
        }

        let now = self.delegates.clock.now_secs();
        let critical = service.has_attr(ServiceAttr::CRITICAL);
        match service.with_crash_counter(|c| crash::classify(c, critical, now)) {
            CrashVerdict::Restart => {
                for cmd in service.take_restart_commands() {
                    if let Err(e) = self.delegates.commands.run(name, &cmd) {
                        log::error!("Restart command of service {} failed: {}", name, e);
                    }
                }
                self.start_logged(service);
            }
            CrashVerdict::GiveUp => {
                service.clear_attr(ServiceAttr::NEED_RESTART);
                log::error!(
                    "{}",
                    Error::CrashLoop {
                        service: name.to_string()
                    }
                );
            }
            CrashVerdict::RebootSystem => {
                log::error!("Critical service {} crashed too often", name);
                self.reboot_system("panic");
            }
        }
    }

    /// stop everything and bring the machine down, once
    pub fn reboot_system(&self, reason: &str) {
        if self.rebooting.replace(true) {
            log::debug!("Reboot already in progress");
            return;
        }

        log::warn!("Going down for {}", reason);
        self.stop_all();
        if let Err(e) = self.delegates.reboot.exec_reboot(reason) {
            log::error!("Reboot failed, leaving the event loop: {}", e);
            self.events.set_exit();
        }
    }

    /// start service after delay_ms, replacing a pending timer
    pub fn start_by_timer(&self, service: &Rc<Service>, delay_ms: u64) -> Result<()> {
        self.cancel_timer(service.name());

        let timer = Rc::new(ServiceTimer::new(self.me.clone(), service.clone(), delay_ms));
        let source: Rc<dyn Source> = timer.clone();
        self.events.add_source(source.clone()).context(EventSnafu)?;
        self.events
            .set_enabled(source, EventState::OneShot)
            .context(EventSnafu)?;
        self.timers
            .borrow_mut()
            .insert(service.name().to_string(), timer);
        log::debug!("Service {} will start in {}ms", service.name(), delay_ms);
        Ok(())
    }

    /// cancel the start timer of name, if any
    pub fn cancel_timer(&self, name: &str) {
        let timer = self.timers.borrow_mut().remove(name);
        if let Some(timer) = timer {
            let source: Rc<dyn Source> = timer;
            if let Err(e) = self.events.del_source(source) {
                log::debug!("Failed to remove start timer of {}: {}", name, e);
            }
        }
    }

    /// whether a start timer of name is pending
    pub fn has_timer(&self, name: &str) -> bool {
        self.timers.borrow().contains_key(name)
    }

    fn timer_fired(&self, service: &Service) {
        self.cancel_timer(service.name());
        self.start_logged(service);
    }

    /// create the sockets of an ondemand service and watch them
    pub fn arm_ondemand(&self, service: &Rc<Service>) {
        self.drop_watches(service.name());
        if let Err(e) = self.open_sockets(service) {
            log::error!("Failed to create sockets of ondemand service {}: {}", service.name(), e);
            return;
        }

        let mut watches = Vec::new();
        for fd in service.socket_fds() {
            let watch = Rc::new(OndemandWatch::new(self.me.clone(), service.clone(), fd));
            let source: Rc<dyn Source> = watch.clone();
            let armed = self
                .events
                .add_source(source.clone())
                .and_then(|_| self.events.set_enabled(source, EventState::OneShot));
            match armed {
                Ok(_) => watches.push(watch),
                Err(e) => log::error!("Failed to watch socket of {}: {}", service.name(), e),
            }
        }

        log::debug!(
            "Watching {} socket(s) of ondemand service {}",
            watches.len(),
            service.name()
        );
        self.ondemand
            .borrow_mut()
            .insert(service.name().to_string(), watches);
    }

    /// number of armed ondemand watches of name
    pub fn ondemand_armed(&self, name: &str) -> usize {
        let watches = match self.ondemand.borrow().get(name) {
            None => return 0,
            Some(w) => w.clone(),
        };
        watches
            .into_iter()
            .filter(|w| {
                let source: Rc<dyn Source> = w.clone();
                matches!(self.events.state(source), Some(EventState::OneShot))
            })
            .count()
    }

    fn disarm_ondemand(&self, name: &str) {
        let watches = self.ondemand.borrow().get(name).cloned().unwrap_or_default();
        for watch in watches {
            let _ = self.events.set_enabled(watch, EventState::Off);
        }
    }

    fn drop_watches(&self, name: &str) {
        let watches = self.ondemand.borrow_mut().remove(name).unwrap_or_default();
        for watch in watches {
            let _ = self.events.del_source(watch);
        }
    }

    fn start_logged(&self, service: &Service) {
        if let Err(e) = self.start(service) {
            log::error!("Failed to start service {}: {}", service.name(), e);
        }
    }

    fn open_sockets(&self, service: &Service) -> Result<()> {
        for (index, spec) in service.closed_sockets() {
            let fd = self.delegates.resources.create_socket(service.name(), &spec)?;
            service.set_socket_fd(index, fd);
        }
        Ok(())
    }

    fn open_resources(&self, service: &Service) -> Result<()> {
        let opened = self.open_sockets(service).and_then(|_| {
            for (index, spec) in service.closed_files() {
                let fd = self.delegates.resources.create_file(service.name(), &spec)?;
                service.set_file_fd(index, fd);
            }
            Ok(())
        });

        if let Err(e) = opened {
            let keep_sockets = service.has_attr(ServiceAttr::ONDEMAND);
            self.release_resources(service, !keep_sockets);
            return Err(Error::Resource {
                service: service.name().to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// close the files of service, and its sockets if asked to
    fn release_resources(&self, service: &Service, sockets: bool) {
        let name = service.name();
        for (spec, fd) in service.take_file_fds() {
            self.delegates.resources.close_file(name, &spec, fd);
        }
        if sockets {
            self.drop_watches(name);
            for (spec, fd) in service.take_socket_fds() {
                self.delegates.resources.close_socket(name, &spec, fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::ShellCommands;
    use crate::service::UnixResources;
    use crate::status::tests::RecordingSink;
    use nix::unistd::Pid;

    #[derive(Clone, Default)]
    struct FakeSpawner {
        next: Rc<Cell<i32>>,
        spawned: Rc<RefCell<Vec<String>>>,
        killed: Rc<RefCell<Vec<i32>>>,
        fail: Rc<Cell<bool>>,
        fail_kill: Rc<Cell<bool>>,
    }

    impl FakeSpawner {
        fn starts(&self, name: &str) -> usize {
            self.spawned.borrow().iter().filter(|n| *n == name).count()
        }
    }

    impl Spawner for FakeSpawner {
        fn spawn(&self, plan: &SpawnPlan) -> Result<Pid> {
            if self.fail.get() {
                return Err(Error::Resource {
                    service: plan.name().to_string(),
                    reason: "fork failed".to_string(),
                });
            }
            self.next.set(self.next.get() + 1);
            self.spawned.borrow_mut().push(plan.name().to_string());
            Ok(Pid::from_raw(10000 + self.next.get()))
        }

        fn kill(&self, pid: Pid, _signal: Signal) -> Result<()> {
            if self.fail_kill.get() {
                return Err(Error::Resource {
                    service: pid.to_string(),
                    reason: "EPERM".to_string(),
                });
            }
            self.killed.borrow_mut().push(pid.as_raw());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeReboot {
        reasons: Rc<RefCell<Vec<String>>>,
    }

    impl Reboot for FakeReboot {
        fn exec_reboot(&self, reason: &str) -> Result<()> {
            self.reasons.borrow_mut().push(reason.to_string());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeClock {
        now: Rc<Cell<u64>>,
    }

    impl Clock for FakeClock {
        fn now_secs(&self) -> u64 {
            self.now.get()
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        events: Rc<Events>,
        supervisor: Rc<ProcessSupervisor>,
        spawner: FakeSpawner,
        reboot: FakeReboot,
        clock: FakeClock,
        sink: RecordingSink,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let events = Rc::new(Events::new().unwrap());
        let registry = Rc::new(ServiceRegistry::new());
        let sink = RecordingSink::default();
        let status = Rc::new(StatusBus::new(Box::new(sink.clone())));
        let cgroups = CgroupTracker::new(events.clone(), &dir.path().join("cgroup"), 10);
        let spawner = FakeSpawner::default();
        let reboot = FakeReboot::default();
        let clock = FakeClock::default();
        clock.now.set(100);

        let delegates = Delegates {
            spawner: Box::new(spawner.clone()),
            reboot: Box::new(reboot.clone()),
            commands: Box::new(ShellCommands),
            resources: Box::new(UnixResources::new(&dir.path().join("socket"))),
            clock: Box::new(clock.clone()),
        };
        let supervisor = ProcessSupervisor::new(events.clone(), registry, status, cgroups, delegates);
        Fixture {
            dir,
            events,
            supervisor,
            spawner,
            reboot,
            clock,
            sink,
        }
    }

    fn add(f: &Fixture, service: Service) -> Rc<Service> {
        f.supervisor.registry().add(service).unwrap()
    }

    fn true_service(name: &str) -> Service {
        Service::new(name, vec!["/bin/true".to_string()])
    }

    #[test]
    fn test_start_reports_running_once() {
        let f = fixture();
        let s = add(&f, true_service("netd"));

        f.supervisor.start(&s).unwrap();
        assert!(s.pid() > 0);
        assert_eq!(f.sink.count("netd", ServiceStatus::Running), 1);
        assert_eq!(f.supervisor.status().status("netd"), ServiceStatus::Running);

        /* already running, nothing happens */
        f.supervisor.start(&s).unwrap();
        assert_eq!(f.spawner.starts("netd"), 1);
        assert_eq!(f.sink.count("netd", ServiceStatus::Running), 1);
    }

    #[test]
    fn test_missing_program_marks_invalid() {
        let f = fixture();
        let s = add(&f, Service::new("ghost", vec!["/nonexistent/ghost".to_string()]));
        assert!(matches!(f.supervisor.start(&s), Err(Error::Config { .. })));
        assert!(s.has_attr(ServiceAttr::INVALID));
        assert!(matches!(f.supervisor.start(&s), Err(Error::Config { .. })));
        assert_eq!(f.spawner.starts("ghost"), 0);

        let s = add(&f, Service::new("empty", vec![]));
        assert!(matches!(f.supervisor.start(&s), Err(Error::Config { .. })));
        assert!(s.has_attr(ServiceAttr::INVALID));
    }

    #[test]
    fn test_fork_failure_leaves_service_stopped() {
        let f = fixture();
        let s = add(&f, true_service("netd"));
        f.spawner.fail.set(true);
        assert!(matches!(f.supervisor.start(&s), Err(Error::Resource { .. })));
        assert_eq!(s.pid(), PID_NONE);
        assert!(!s.has_attr(ServiceAttr::INVALID));
        assert_eq!(f.supervisor.status().status("netd"), ServiceStatus::Stopped);
    }

    #[test]
    fn test_failed_kill_keeps_service_running() {
        let f = fixture();
        let s = add(&f, true_service("netd"));
        f.supervisor.start(&s).unwrap();

        f.spawner.fail_kill.set(true);
        assert!(matches!(f.supervisor.stop(&s), Err(Error::Resource { .. })));
        assert!(s.pid() > 0);
        assert!(!s.has_attr(ServiceAttr::NEED_STOP));
        assert_eq!(f.supervisor.status().status("netd"), ServiceStatus::Running);
        assert_eq!(f.sink.count("netd", ServiceStatus::Stopping), 0);

        f.spawner.fail_kill.set(false);
        f.supervisor.stop(&s).unwrap();
        assert!(s.has_attr(ServiceAttr::NEED_STOP));
        assert_eq!(f.sink.count("netd", ServiceStatus::Stopping), 1);
    }

    #[test]
    fn test_stop_then_reap_never_restarts() {
        let f = fixture();
        let s = add(&f, true_service("netd").with_attrs(ServiceAttr::CRITICAL));
        f.supervisor.start(&s).unwrap();
        f.supervisor.reap(&s, ExitStatus::Exited(1));
        assert!(s.pid() > 0);
        assert_eq!(s.crash_counter().count(), 1);

        let pid = s.pid();
        f.supervisor.stop(&s).unwrap();
        assert_eq!(s.pid(), pid);
        assert!(s.has_attr(ServiceAttr::NEED_STOP));
        assert_eq!(*f.spawner.killed.borrow(), vec![pid]);

        f.supervisor.reap(&s, ExitStatus::Signaled(9));
        assert_eq!(s.pid(), PID_NONE);
        assert_eq!(s.crash_counter().count(), 0);
        assert!(!s.has_attr(ServiceAttr::NEED_STOP));
        assert_eq!(f.spawner.starts("netd"), 2);

        /* stopping a stopped service is a no-op */
        f.supervisor.stop(&s).unwrap();
        assert_eq!(f.spawner.killed.borrow().len(), 1);
    }

    #[test]
    fn test_crash_loop_gives_up() {
        let f = fixture();
        let s = add(&f, true_service("netd").with_crash_limit(2, 5));
        f.supervisor.start(&s).unwrap();

        for t in [100, 101, 102] {
            f.clock.now.set(t);
            f.supervisor.reap(&s, ExitStatus::Exited(1));
        }
        assert_eq!(s.pid(), PID_NONE);
        assert_eq!(f.spawner.starts("netd"), 3);
        assert!(f.reboot.reasons.borrow().is_empty());
    }

    #[test]
    fn test_crashes_outside_window_keep_restarting() {
        let f = fixture();
        let s = add(&f, true_service("netd").with_crash_limit(2, 5));
        f.supervisor.start(&s).unwrap();

        for t in [100, 110, 120, 130] {
            f.clock.now.set(t);
            f.supervisor.reap(&s, ExitStatus::Exited(1));
            assert!(s.pid() > 0);
        }
        assert_eq!(s.crash_counter().count(), 1);
    }

    #[test]
    fn test_critical_crash_loop_reboots_once() {
        let f = fixture();
        let critical = add(
            &f,
            true_service("watchdog")
                .with_attrs(ServiceAttr::CRITICAL)
                .with_crash_limit(2, 5),
        );
        let other = add(&f, true_service("netd"));
        f.supervisor.start(&critical).unwrap();
        f.supervisor.start(&other).unwrap();
        let other_pid = other.pid();

        for t in [100, 101, 102] {
            f.clock.now.set(t);
            f.supervisor.reap(&critical, ExitStatus::Signaled(11));
        }
        assert_eq!(*f.reboot.reasons.borrow(), vec!["panic".to_string()]);
        assert!(f.spawner.killed.borrow().contains(&other_pid));
        assert!(other.has_attr(ServiceAttr::NEED_STOP));
        assert!(f.supervisor.is_rebooting());

        /* the killed service exiting does not restart or reboot again */
        f.supervisor.reap(&other, ExitStatus::Signaled(9));
        f.supervisor.reboot_system("panic");
        assert_eq!(f.reboot.reasons.borrow().len(), 1);
        assert_eq!(f.spawner.starts("netd"), 1);
        assert_eq!(f.spawner.starts("watchdog"), 3);
    }

    #[test]
    fn test_once_service_is_not_restarted() {
        let f = fixture();
        let s = add(&f, true_service("fsck").with_attrs(ServiceAttr::ONCE));
        f.supervisor.start(&s).unwrap();
        f.supervisor.reap(&s, ExitStatus::Exited(0));
        assert_eq!(s.pid(), PID_NONE);
        assert_eq!(f.spawner.starts("fsck"), 1);
        assert_eq!(f.sink.count("fsck", ServiceStatus::Stopped), 1);
    }

    #[test]
    fn test_restart_does_not_count_as_crash() {
        let f = fixture();
        let s = add(&f, true_service("netd"));
        f.supervisor.start(&s).unwrap();
        let first = s.pid();

        f.supervisor.restart(&s).unwrap();
        assert!(s.has_attr(ServiceAttr::NEED_RESTART));
        f.supervisor.reap(&s, ExitStatus::Signaled(9));
        assert!(s.pid() > 0);
        assert_ne!(s.pid(), first);
        assert_eq!(s.crash_counter().count(), 0);
        assert!(!s.has_attr(ServiceAttr::NEED_RESTART));
    }

    #[test]
    fn test_restart_commands_run_once() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let s = add(
            &f,
            true_service("netd").with_restart_commands(vec![vec![
                "/bin/touch".to_string(),
                marker.to_string_lossy().to_string(),
            ]]),
        );
        f.supervisor.start(&s).unwrap();
        f.supervisor.reap(&s, ExitStatus::Exited(1));
        assert!(marker.exists());
        assert!(s.restart_commands().is_empty());
        assert_eq!(f.spawner.starts("netd"), 2);
    }

    #[test]
    fn test_timer_start_and_suppressed_restart() {
        let f = fixture();
        let s = add(&f, true_service("netd"));
        f.supervisor.start_by_timer(&s, 10).unwrap();
        assert!(f.supervisor.has_timer("netd"));

        while s.pid() <= 0 {
            f.events.run(100).unwrap();
        }
        assert!(!f.supervisor.has_timer("netd"));

        f.supervisor.start_by_timer(&s, 60000).unwrap();
        f.supervisor.reap(&s, ExitStatus::Exited(1));
        assert_eq!(s.pid(), PID_NONE);
        assert_eq!(f.spawner.starts("netd"), 1);

        f.supervisor.cancel_timer("netd");
        assert!(!f.supervisor.has_timer("netd"));
    }

    #[test]
    fn test_ondemand_socket_starts_service() {
        use crate::service::SocketSpec;
        use nix::sys::socket::SockType;
        use nix::unistd::{Gid, Uid};
        use std::os::unix::net::UnixDatagram;

        let f = fixture();
        let spec = SocketSpec {
            name: "ondemand_sock".to_string(),
            kind: SockType::Datagram,
            perm: 0o666,
            uid: Uid::effective(),
            gid: Gid::effective(),
            passcred: false,
        };
        let s = add(
            &f,
            true_service("lazy")
                .with_attrs(ServiceAttr::ONDEMAND)
                .with_sockets(vec![spec]),
        );

        f.supervisor.arm_ondemand(&s);
        assert_eq!(f.supervisor.ondemand_armed("lazy"), 1);
        let fd = s.socket_fds()[0];

        let path = f.dir.path().join("socket/ondemand_sock");
        UnixDatagram::unbound()
            .unwrap()
            .send_to(b"wake", &path)
            .unwrap();
        while s.pid() <= 0 {
            f.events.run(100).unwrap();
        }
        assert_eq!(f.supervisor.ondemand_armed("lazy"), 0);

        f.supervisor.reap(&s, ExitStatus::Exited(0));
        assert_eq!(s.pid(), PID_NONE);
        assert_eq!(s.socket_fds(), vec![fd]);
        assert_eq!(f.supervisor.ondemand_armed("lazy"), 1);
        assert_eq!(f.spawner.starts("lazy"), 1);
    }
}
