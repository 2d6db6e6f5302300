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

//! Per-instance process groups of services.
//!
//! A service with cgroup enabled gets `<root>/<name>/pid_<pid>` on start.
//! When the main process is reaped every process still in the group is
//! killed right away, and the emptied directory is removed by a deferred
//! one-shot timer on the loop.
use crate::error::*;
use crate::service::Service;
use basic::time_util::USEC_PER_MSEC;
use cgroup::CgFlags;
use event::{EventState, EventType, Events, Source};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

type PendingMap = Rc<RefCell<HashMap<u64, Rc<CgroupCleanup>>>>;

/// Creates, joins, kills and removes the groups of running services.
pub struct CgroupTracker {
    events: Rc<Events>,
    root: PathBuf,
    delay_usec: u64,
    pending: PendingMap,
}

impl CgroupTracker {
    ///
    pub fn new(events: Rc<Events>, root: &Path, delay_ms: u64) -> CgroupTracker {
        CgroupTracker {
            events,
            root: root.to_path_buf(),
            delay_usec: delay_ms.saturating_mul(USEC_PER_MSEC),
            pending: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// group directory of one instance of name
    pub fn instance_path(&self, name: &str, pid: i32) -> PathBuf {
        self.root.join(name).join(format!("pid_{}", pid))
    }

    /// create the group of the running instance and move its pid into it
    pub fn attach(&self, service: &Service) -> Result<()> {
        if !service.cgroup_enabled() {
            return Ok(());
        }
        let pid = match service.running_pid() {
            None => return Ok(()),
            Some(p) => p,
        };

        let path = self.instance_path(service.name(), pid.as_raw());
        cgroup::cg_create(&path).context(CgroupSnafu)?;
        cgroup::cg_attach(pid, &path).context(CgroupSnafu)?;
        Ok(())
    }

    /// kill what is left of the instance and schedule removal of its group
    ///
    /// Must run before the pid of the service is cleared.
    pub fn detach(&self, service: &Service) -> Result<()> {
        if !service.cgroup_enabled() {
            return Ok(());
        }
        let pid = match service.running_pid() {
            None => return Ok(()),
            Some(p) => p,
        };

        let path = self.instance_path(service.name(), pid.as_raw());
        if !path.is_dir() {
            return Ok(());
        }

        let mut spared = HashSet::new();
        spared.insert(pid);
        match cgroup::cg_kill(&path, Signal::SIGKILL, CgFlags::IGNORE_SELF, spared) {
            Ok(killed) if !killed.is_empty() => {
                log::info!(
                    "Killed {} leftover process(es) of service {}",
                    killed.len(),
                    service.name()
                );
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to kill group of {}: {}", service.name(), e),
        }

        let cleanup = Rc::new(CgroupCleanup {
            path,
            service: service.name().to_string(),
            delay_usec: self.delay_usec,
            pending: self.pending.clone(),
        });
        let source: Rc<dyn Source> = cleanup.clone();
        self.events.add_source(source.clone()).context(EventSnafu)?;
        self.events
            .set_enabled(source, EventState::OneShot)
            .context(EventSnafu)?;
        self.pending.borrow_mut().insert(cleanup.token(), cleanup.clone());
        service.set_cleanup_timer(Some(cleanup.token()));
        Ok(())
    }

    /// group directories waiting for removal
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }
}

/// one-shot timer removing one instance directory
struct CgroupCleanup {
    path: PathBuf,
    service: String,
    delay_usec: u64,
    pending: PendingMap,
}

impl Source for CgroupCleanup {
    fn event_type(&self) -> EventType {
        EventType::TimerMonotonic
    }

    fn time_relative(&self) -> u64 {
        self.delay_usec
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn priority(&self) -> i8 {
        10i8
    }

    fn dispatch(&self, event: &Events) -> i32 {
        if let Err(e) = cgroup::cg_remove(&self.path) {
            log::warn!(
                "Failed to remove cgroup {:?} of service {}: {}",
                self.path,
                self.service,
                e
            );
        }

        let me = self.pending.borrow_mut().remove(&self.token());
        if let Some(me) = me {
            let source: Rc<dyn Source> = me;
            let _ = event.del_source(source);
        }
        0
    }

    fn description(&self) -> String {
        format!("cgroup cleanup of {}", self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_detach_kills_leftovers_and_defers_removal() {
        let dir = tempfile::tempdir().unwrap();
        let events = Rc::new(Events::new().unwrap());
        let tracker = CgroupTracker::new(events.clone(), dir.path(), 10);

        let mut main = Command::new("sleep").arg("30").spawn().unwrap();
        let mut orphan = Command::new("sleep").arg("30").spawn().unwrap();

        let service = Service::new("netd", vec!["/bin/sleep".to_string()]).with_cgroup(true);
        service.set_pid(main.id() as i32);
        tracker.attach(&service).unwrap();

        let path = tracker.instance_path("netd", main.id() as i32);
        cgroup::cg_attach(Pid::from_raw(orphan.id() as i32), &path).unwrap();
        assert_eq!(cgroup::cg_get_pids(&path).len(), 2);

        tracker.detach(&service).unwrap();
        assert!(orphan.wait().unwrap().code().is_none());
        assert!(main.try_wait().unwrap().is_none());
        assert!(path.is_dir());
        assert_eq!(tracker.pending(), 1);
        assert!(service.cleanup_timer().is_some());

        while tracker.pending() > 0 {
            events.run(100).unwrap();
        }
        assert!(!path.exists());

        main.kill().unwrap();
        main.wait().unwrap();
    }

    #[test]
    fn test_disabled_cgroup_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let events = Rc::new(Events::new().unwrap());
        let tracker = CgroupTracker::new(events, dir.path(), 10);
        let service = Service::new("netd", vec!["/bin/sleep".to_string()]);
        service.set_pid(12345);
        tracker.attach(&service).unwrap();
        tracker.detach(&service).unwrap();
        assert!(!dir.path().join("netd").exists());
        assert_eq!(tracker.pending(), 0);
    }
}
