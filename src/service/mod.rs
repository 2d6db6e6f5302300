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

//! The supervised service record
//!
//! Immutable configuration lives directly in [`Service`]; everything the
//! supervisor mutates on the loop thread sits behind one `RefCell`.
mod attr;
mod permissions;
mod resource;

pub use attr::ServiceAttr;
pub use permissions::{CapabilitySet, Permissions, CAP_LAST_CAP};
pub use resource::{
    FileSpec, HeldFd, HeldKind, ResourceProvider, SocketSpec, UnixResources, ENV_FILE_PREFIX,
    ENV_SOCKET_PREFIX,
};

use crate::crash::CrashCounter;
use nix::unistd::Pid;
use std::cell::{Ref, RefCell};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

/// pid value of a service that is not running
pub const PID_NONE: i32 = -1;

/// a socket of the service and, while open, its descriptor
#[derive(Debug)]
pub struct ServiceSocket {
    pub spec: SocketSpec,
    pub fd: Option<OwnedFd>,
}

/// a file of the service and, while open, its descriptor
#[derive(Debug)]
pub struct ServiceFile {
    pub spec: FileSpec,
    pub fd: Option<OwnedFd>,
}

#[derive(Debug)]
struct ServiceData {
    pid: i32,
    attrs: ServiceAttr,
    crash: CrashCounter,
    sockets: Vec<ServiceSocket>,
    files: Vec<ServiceFile>,
    held: Vec<HeldFd>,
    held_poll: bool,
    restart_commands: Vec<Vec<String>>,
    cleanup_timer: Option<u64>,
}

/// one supervised OS process plus its restart, permission and resource policy
#[derive(Debug)]
pub struct Service {
    name: String,
    exec: Vec<String>,
    permissions: Permissions,
    write_pid: Vec<PathBuf>,
    cgroup_enabled: bool,
    importance: i32,
    cpu_cores: Vec<usize>,
    data: RefCell<ServiceData>,
}

impl Service {
    /// a plain service with default crash limits, no resources
    pub fn new(name: &str, exec: Vec<String>) -> Service {
        Service {
            name: name.to_string(),
            exec,
            permissions: Permissions::default(),
            write_pid: Vec::new(),
            cgroup_enabled: false,
            importance: 0,
            cpu_cores: Vec::new(),
            data: RefCell::new(ServiceData {
                pid: PID_NONE,
                attrs: ServiceAttr::empty(),
                crash: CrashCounter::default(),
                sockets: Vec::new(),
                files: Vec::new(),
                held: Vec::new(),
                held_poll: false,
                restart_commands: Vec::new(),
                cleanup_timer: None,
            }),
        }
    }

    ///
    pub fn with_attrs(self, attrs: ServiceAttr) -> Self {
        self.data.borrow_mut().attrs = attrs;
        self
    }

    ///
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// crash limit and window for this service
    pub fn with_crash_limit(self, limit: u32, window_secs: u64) -> Self {
        self.data.borrow_mut().crash = CrashCounter::new(limit, window_secs);
        self
    }

    ///
    pub fn with_cgroup(mut self, enabled: bool) -> Self {
        self.cgroup_enabled = enabled;
        self
    }

    ///
    pub fn with_sockets(self, specs: Vec<SocketSpec>) -> Self {
        self.data.borrow_mut().sockets = specs
            .into_iter()
            .map(|spec| ServiceSocket { spec, fd: None })
            .collect();
        self
    }

    ///
    pub fn with_files(self, specs: Vec<FileSpec>) -> Self {
        self.data.borrow_mut().files = specs
            .into_iter()
            .map(|spec| ServiceFile { spec, fd: None })
            .collect();
        self
    }

    ///
    pub fn with_write_pid(mut self, targets: Vec<PathBuf>) -> Self {
        self.write_pid = targets;
        self
    }

    /// nice value of the process, 0 leaves it inherited
    pub fn with_importance(mut self, importance: i32) -> Self {
        self.importance = importance;
        self
    }

    /// cpu cores the process is bound to, empty for no binding
    pub fn with_cpu_cores(mut self, cores: Vec<usize>) -> Self {
        self.cpu_cores = cores;
        self
    }

    ///
    pub fn with_restart_commands(self, commands: Vec<Vec<String>>) -> Self {
        self.data.borrow_mut().restart_commands = commands;
        self
    }

    ///
    pub fn name(&self) -> &str {
        &self.name
    }

    /// argument vector, argv[0] is the binary
    pub fn exec(&self) -> &[String] {
        &self.exec
    }

    ///
    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    ///
    pub fn write_pid(&self) -> &[PathBuf] {
        &self.write_pid
    }

    ///
    pub fn cgroup_enabled(&self) -> bool {
        self.cgroup_enabled
    }

    ///
    pub fn importance(&self) -> i32 {
        self.importance
    }

    ///
    pub fn cpu_cores(&self) -> &[usize] {
        &self.cpu_cores
    }

    /// raw pid, PID_NONE when not running
    pub fn pid(&self) -> i32 {
        self.data.borrow().pid
    }

    /// Some(pid) while running
    pub fn running_pid(&self) -> Option<Pid> {
        match self.pid() {
            p if p > 0 => Some(Pid::from_raw(p)),
            _ => None,
        }
    }

    pub(crate) fn set_pid(&self, pid: i32) {
        self.data.borrow_mut().pid = pid;
    }

    ///
    pub fn attrs(&self) -> ServiceAttr {
        self.data.borrow().attrs
    }

    ///
    pub fn has_attr(&self, attr: ServiceAttr) -> bool {
        self.data.borrow().attrs.contains(attr)
    }

    ///
    pub fn set_attr(&self, attr: ServiceAttr) {
        self.data.borrow_mut().attrs.insert(attr);
    }

    ///
    pub fn clear_attr(&self, attr: ServiceAttr) {
        self.data.borrow_mut().attrs.remove(attr);
    }

    /// snapshot of the crash counter
    pub fn crash_counter(&self) -> CrashCounter {
        self.data.borrow().crash
    }

    /// run f against the crash counter
    pub(crate) fn with_crash_counter<R>(&self, f: impl FnOnce(&mut CrashCounter) -> R) -> R {
        f(&mut self.data.borrow_mut().crash)
    }

    pub(crate) fn sockets(&self) -> Ref<'_, Vec<ServiceSocket>> {
        Ref::map(self.data.borrow(), |d| &d.sockets)
    }

    pub(crate) fn files(&self) -> Ref<'_, Vec<ServiceFile>> {
        Ref::map(self.data.borrow(), |d| &d.files)
    }

    /// specs of sockets that have no open descriptor yet
    pub(crate) fn closed_sockets(&self) -> Vec<(usize, SocketSpec)> {
        self.data
            .borrow()
            .sockets
            .iter()
            .enumerate()
            .filter(|(_, s)| s.fd.is_none())
            .map(|(i, s)| (i, s.spec.clone()))
            .collect()
    }

    pub(crate) fn set_socket_fd(&self, index: usize, fd: OwnedFd) {
        if let Some(s) = self.data.borrow_mut().sockets.get_mut(index) {
            s.fd = Some(fd);
        }
    }

    /// take every open socket descriptor out of the record
    pub(crate) fn take_socket_fds(&self) -> Vec<(SocketSpec, OwnedFd)> {
        let mut data = self.data.borrow_mut();
        data.sockets
            .iter_mut()
            .filter_map(|s| s.fd.take().map(|fd| (s.spec.clone(), fd)))
            .collect()
    }

    pub(crate) fn closed_files(&self) -> Vec<(usize, FileSpec)> {
        self.data
            .borrow()
            .files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.fd.is_none())
            .map(|(i, f)| (i, f.spec.clone()))
            .collect()
    }

    pub(crate) fn set_file_fd(&self, index: usize, fd: OwnedFd) {
        if let Some(f) = self.data.borrow_mut().files.get_mut(index) {
            f.fd = Some(fd);
        }
    }

    pub(crate) fn take_file_fds(&self) -> Vec<(FileSpec, OwnedFd)> {
        let mut data = self.data.borrow_mut();
        data.files
            .iter_mut()
            .filter_map(|f| f.fd.take().map(|fd| (f.spec.clone(), fd)))
            .collect()
    }

    /// raw socket fds currently open, in configuration order
    pub fn socket_fds(&self) -> Vec<RawFd> {
        self.data
            .borrow()
            .sockets
            .iter()
            .filter_map(|s| s.fd.as_ref().map(|fd| fd.as_raw_fd()))
            .collect()
    }

    /// replace the descriptors held through the fd holder, the old ones are closed
    pub fn hold_fds(&self, fds: Vec<HeldFd>, poll: bool) {
        let mut data = self.data.borrow_mut();
        data.held = fds;
        data.held_poll = poll;
    }

    /// raw numbers of the held descriptors, in the order they were handed over
    pub fn held_fds(&self) -> Vec<RawFd> {
        self.data
            .borrow()
            .held
            .iter()
            .map(|h| h.fd.as_raw_fd())
            .collect()
    }

    /// whether the holder asked init to poll the held descriptors
    pub fn held_poll(&self) -> bool {
        self.data.borrow().held_poll
    }

    /// number of held descriptors of kind
    pub fn held_count(&self, kind: HeldKind) -> usize {
        self.data
            .borrow()
            .held
            .iter()
            .filter(|h| h.kind == kind)
            .count()
    }

    /// give up the held descriptors
    pub fn take_held_fds(&self) -> Vec<HeldFd> {
        let mut data = self.data.borrow_mut();
        data.held_poll = false;
        std::mem::take(&mut data.held)
    }

    /// the restart commands, which are then forgotten
    pub(crate) fn take_restart_commands(&self) -> Vec<Vec<String>> {
        std::mem::take(&mut self.data.borrow_mut().restart_commands)
    }

    ///
    pub fn restart_commands(&self) -> Vec<Vec<String>> {
        self.data.borrow().restart_commands.clone()
    }

    /// handle of the pending cgroup cleanup timer
    pub fn cleanup_timer(&self) -> Option<u64> {
        self.data.borrow().cleanup_timer
    }

    pub(crate) fn set_cleanup_timer(&self, token: Option<u64>) {
        self.data.borrow_mut().cleanup_timer = token;
    }
}
