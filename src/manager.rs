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

//! Wires the supervision core together and runs it.
use crate::cgroup_tracker::CgroupTracker;
use crate::collaborator::{NoSandbox, ShellCommands, SystemReboot};
use crate::config::InitConfig;
use crate::control::ServiceControl;
use crate::crash::MonotonicClock;
use crate::error::*;
use crate::fdholder::FdHolder;
use crate::registry::ServiceRegistry;
use crate::service::{Service, ServiceAttr, UnixResources};
use crate::signals::{Reaper, SignalReactor, WaitpidReaper};
use crate::spawn::ForkSpawner;
use crate::status::{StatusBus, StatusDirSink, StatusSink};
use crate::supervisor::{Delegates, ProcessSupervisor};
use event::{EventState, Events, Source};
use std::path::Path;
use std::rc::Rc;

/// every outside dependency of the manager
pub struct Collaborators {
    pub delegates: Delegates,
    pub reaper: Box<dyn Reaper>,
    pub status_sink: Box<dyn StatusSink>,
}

impl Collaborators {
    /// the real system: fork, waitpid, reboot(2), files under the configured dirs
    pub fn system(config: &InitConfig) -> Collaborators {
        Collaborators {
            delegates: Delegates {
                spawner: Box::new(ForkSpawner::new(Box::new(NoSandbox))),
                reboot: Box::new(SystemReboot),
                commands: Box::new(ShellCommands),
                resources: Box::new(UnixResources::new(Path::new(&config.SocketDir))),
                clock: Box::new(MonotonicClock),
            },
            reaper: Box::new(WaitpidReaper),
            status_sink: Box::new(StatusDirSink::new(Path::new(&config.StatusDir))),
        }
    }
}

/// Owns the loop and everything registered on it.
pub struct Manager {
    events: Rc<Events>,
    registry: Rc<ServiceRegistry>,
    supervisor: Rc<ProcessSupervisor>,
    reactor: Rc<SignalReactor>,
    fd_holder: Option<Rc<FdHolder>>,
}

impl Manager {
    /// build the core, register the signal reactor and the fd holder
    ///
    /// A fd holder that cannot bind is logged and left out, services still run.
    pub fn new(config: &InitConfig, collaborators: Collaborators) -> Result<Manager> {
        let events = Rc::new(Events::new().context(EventSnafu)?);
        let registry = Rc::new(ServiceRegistry::new());
        let status = Rc::new(StatusBus::new(collaborators.status_sink));
        let cgroups = CgroupTracker::new(
            events.clone(),
            &config.cgroup_root(),
            config.CgroupCleanupDelayMs,
        );
        let supervisor = ProcessSupervisor::new(
            events.clone(),
            registry.clone(),
            status,
            cgroups,
            collaborators.delegates,
        );

        let reactor = Rc::new(SignalReactor::new(supervisor.clone(), collaborators.reaper));
        let source: Rc<dyn Source> = reactor.clone();
        events.add_source(source.clone()).context(EventSnafu)?;
        events
            .set_enabled(source, EventState::On)
            .context(EventSnafu)?;

        let fd_holder = match FdHolder::new(Path::new(&config.FdHolderSocket), registry.clone()) {
            Ok(h) => {
                let holder = Rc::new(h);
                let source: Rc<dyn Source> = holder.clone();
                events.add_source(source.clone()).context(EventSnafu)?;
                events
                    .set_enabled(source, EventState::On)
                    .context(EventSnafu)?;
                Some(holder)
            }
            Err(e) => {
                log::error!("Fd holder disabled: {}", e);
                None
            }
        };

        Ok(Manager {
            events,
            registry,
            supervisor,
            reactor,
            fd_holder,
        })
    }

    ///
    pub fn add_service(&self, service: Service) -> Result<Rc<Service>> {
        self.registry.add(service)
    }

    /// add every service described under dir
    pub fn load_services(&self, dir: &Path, config: &InitConfig) -> Result<usize> {
        let mut n = 0;
        for service in crate::descriptor::load_dir(dir, config)? {
            match self.add_service(service) {
                Ok(_) => n += 1,
                Err(e) => log::error!("{}", e),
            }
        }
        Ok(n)
    }

    /// start what runs at boot and arm the ondemand services
    pub fn startup(&self) {
        for service in self.registry.services() {
            if service.has_attr(ServiceAttr::DISABLED) {
                continue;
            }
            if service.has_attr(ServiceAttr::ONDEMAND) {
                self.supervisor.arm_ondemand(&service);
                continue;
            }
            if let Err(e) = self.supervisor.start(&service) {
                log::error!("Failed to start service {}: {}", service.name(), e);
            }
        }
        /* children that exited before the reactor was enabled */
        self.reactor.reap_children();
    }

    ///
    pub fn control(&self) -> ServiceControl {
        ServiceControl::new(self.supervisor.clone())
    }

    ///
    pub fn registry(&self) -> &Rc<ServiceRegistry> {
        &self.registry
    }

    ///
    pub fn events(&self) -> &Rc<Events> {
        &self.events
    }

    /// whether the fd holder socket is up
    pub fn has_fd_holder(&self) -> bool {
        self.fd_holder.is_some()
    }

    /// run until a reboot could not be carried out
    pub fn main_loop(&self) -> Result<()> {
        self.events.rloop().context(EventSnafu)?;
        Ok(())
    }

    /// drop every loop source and then the registry
    pub fn teardown(&self) {
        self.events.clear();
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::Clock;
    use crate::collaborator::Reboot;
    use crate::spawn::{SpawnPlan, Spawner};
    use crate::status::ServiceStatus;
    use crate::supervisor::ExitStatus;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;
    use std::cell::{Cell, RefCell};

    struct NoReaper;

    impl Reaper for NoReaper {
        fn try_wait(&self) -> Option<(Pid, ExitStatus)> {
            None
        }
    }

    #[derive(Clone, Default)]
    struct FakeSpawner {
        spawned: Rc<RefCell<Vec<String>>>,
        next: Rc<Cell<i32>>,
    }

    impl Spawner for FakeSpawner {
        fn spawn(&self, plan: &SpawnPlan) -> Result<Pid> {
            self.next.set(self.next.get() + 1);
            self.spawned.borrow_mut().push(plan.name().to_string());
            Ok(Pid::from_raw(30000 + self.next.get()))
        }

        fn kill(&self, _pid: Pid, _signal: Signal) -> Result<()> {
            Ok(())
        }
    }

    struct ExitLoop;

    impl Reboot for ExitLoop {
        fn exec_reboot(&self, _reason: &str) -> Result<()> {
            Err(Error::Resource {
                service: "init".to_string(),
                reason: "not pid 1".to_string(),
            })
        }
    }

    struct Fixed;

    impl Clock for Fixed {
        fn now_secs(&self) -> u64 {
            1
        }
    }

    fn manager(dir: &Path, spawner: FakeSpawner) -> Manager {
        let config = InitConfig {
            CgroupRoot: dir.join("cgroup").to_string_lossy().to_string(),
            SocketDir: dir.join("socket").to_string_lossy().to_string(),
            FdHolderSocket: dir.join("socket/fd_holder").to_string_lossy().to_string(),
            StatusDir: dir.join("status").to_string_lossy().to_string(),
            ..Default::default()
        };
        let collaborators = Collaborators {
            delegates: Delegates {
                spawner: Box::new(spawner),
                reboot: Box::new(ExitLoop),
                commands: Box::new(ShellCommands),
                resources: Box::new(UnixResources::new(&dir.join("socket"))),
                clock: Box::new(Fixed),
            },
            reaper: Box::new(NoReaper),
            status_sink: Box::new(StatusDirSink::new(&dir.join("status"))),
        };
        Manager::new(&config, collaborators).unwrap()
    }

    #[test]
    fn test_startup_skips_disabled_and_ondemand() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = FakeSpawner::default();
        let m = manager(dir.path(), spawner.clone());
        assert!(m.has_fd_holder());

        m.add_service(Service::new("netd", vec!["/bin/true".to_string()]))
            .unwrap();
        m.add_service(
            Service::new("off", vec!["/bin/true".to_string()]).with_attrs(ServiceAttr::DISABLED),
        )
        .unwrap();
        m.add_service(
            Service::new("lazy", vec!["/bin/true".to_string()]).with_attrs(ServiceAttr::ONDEMAND),
        )
        .unwrap();

        m.startup();
        assert_eq!(*spawner.spawned.borrow(), vec!["netd".to_string()]);
        assert_eq!(
            m.control().service_status("netd").unwrap(),
            ServiceStatus::Running
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("status/netd")).unwrap(),
            "running\n30001\n"
        );
        m.teardown();
        assert!(m.registry().is_empty());
    }

    #[test]
    fn test_failed_reboot_leaves_loop() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), FakeSpawner::default());
        m.add_service(Service::new("netd", vec!["/bin/true".to_string()]))
            .unwrap();
        m.startup();

        m.control().stop_all_services();
        m.reactor.terminate();
        assert!(m.events().is_exit());
        m.main_loop().unwrap();
        m.teardown();
    }
}
