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

//! Service status broadcast and in-process status watchers.
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// lifecycle states published for every service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Idle => "idle",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ServiceStatus::Idle),
            "starting" => Ok(ServiceStatus::Starting),
            "running" => Ok(ServiceStatus::Running),
            "stopping" => Ok(ServiceStatus::Stopping),
            "stopped" => Ok(ServiceStatus::Stopped),
            _ => Err(format!("unknown service status: {}", s)),
        }
    }
}

/// Receives every status change (NotifyServiceChange).
pub trait StatusSink {
    ///
    fn notify_service_change(&self, name: &str, status: ServiceStatus, pid: i32);
}

/// Publishes `<dir>/<name>` holding the status and pid, one per line.
pub struct StatusDirSink {
    dir: PathBuf,
}

impl StatusDirSink {
    ///
    pub fn new(dir: &Path) -> Self {
        StatusDirSink {
            dir: dir.to_path_buf(),
        }
    }
}

impl StatusSink for StatusDirSink {
    fn notify_service_change(&self, name: &str, status: ServiceStatus, pid: i32) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            log::debug!("Failed to create status dir {:?}: {}", self.dir, e);
            return;
        }
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let content = format!("{}\n{}\n", status, pid);
        if let Err(e) = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, &path)) {
            log::debug!("Failed to publish status of {}: {}", name, e);
        }
    }
}

/// callback of ServiceWatchForStatus
pub type StatusCallback = Rc<dyn Fn(&str, ServiceStatus)>;

/// Last known status of every service plus the watchers interested in it.
pub struct StatusBus {
    data: RefCell<StatusData>,
    sink: Box<dyn StatusSink>,
}

#[derive(Default)]
struct StatusData {
    current: HashMap<String, ServiceStatus>,
    watchers: HashMap<String, Vec<StatusCallback>>,
}

impl StatusBus {
    ///
    pub fn new(sink: Box<dyn StatusSink>) -> Self {
        StatusBus {
            data: RefCell::new(StatusData::default()),
            sink,
        }
    }

    /// record and broadcast a status change
    pub fn notify(&self, name: &str, status: ServiceStatus, pid: i32) {
        log::debug!("Service {} is {}", name, status);
        let watchers = {
            let mut data = self.data.borrow_mut();
            data.current.insert(name.to_string(), status);
            data.watchers.get(name).cloned().unwrap_or_default()
        };

        self.sink.notify_service_change(name, status, pid);
        /* callbacks may query or watch again, the borrow is released */
        for cb in watchers {
            cb(name, status);
        }
    }

    /// last status of name, Idle if it never changed
    pub fn status(&self, name: &str) -> ServiceStatus {
        self.data
            .borrow()
            .current
            .get(name)
            .copied()
            .unwrap_or(ServiceStatus::Idle)
    }

    /// call `callback` on every later status change of name
    pub fn watch(&self, name: &str, callback: StatusCallback) {
        self.data
            .borrow_mut()
            .watchers
            .entry(name.to_string())
            .or_default()
            .push(callback);
    }

    /// drop every watcher, callbacks often capture loop objects
    pub fn clear(&self) {
        self.data.borrow_mut().watchers.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// records every change, shared with the test through an Rc
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Rc<RefCell<Vec<(String, ServiceStatus)>>>,
    }

    impl RecordingSink {
        pub(crate) fn count(&self, name: &str, status: ServiceStatus) -> usize {
            self.events
                .borrow()
                .iter()
                .filter(|(n, s)| n == name && *s == status)
                .count()
        }
    }

    impl StatusSink for RecordingSink {
        fn notify_service_change(&self, name: &str, status: ServiceStatus, _pid: i32) {
            self.events.borrow_mut().push((name.to_string(), status));
        }
    }

    #[test]
    fn test_notify_updates_status_and_watchers() {
        let sink = RecordingSink::default();
        let bus = StatusBus::new(Box::new(sink.clone()));
        assert_eq!(bus.status("netd"), ServiceStatus::Idle);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        bus.watch(
            "netd",
            Rc::new(move |_: &str, status: ServiceStatus| s.borrow_mut().push(status)),
        );

        bus.notify("netd", ServiceStatus::Running, 10);
        bus.notify("other", ServiceStatus::Running, 11);
        bus.notify("netd", ServiceStatus::Stopped, -1);

        assert_eq!(bus.status("netd"), ServiceStatus::Stopped);
        assert_eq!(
            *seen.borrow(),
            vec![ServiceStatus::Running, ServiceStatus::Stopped]
        );
        assert_eq!(sink.count("netd", ServiceStatus::Running), 1);
        assert_eq!(sink.events.borrow().len(), 3);
    }

    #[test]
    fn test_status_dir_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = StatusDirSink::new(&dir.path().join("status"));
        sink.notify_service_change("netd", ServiceStatus::Running, 42);
        let content = fs::read_to_string(dir.path().join("status/netd")).unwrap();
        assert_eq!(content, "running\n42\n");
        assert_eq!("stopping".parse::<ServiceStatus>(), Ok(ServiceStatus::Stopping));
    }
}
