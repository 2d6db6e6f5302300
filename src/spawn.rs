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

//! fork/exec of service processes
//!
//! # The fork boundary
//!
//! Everything a child needs is computed in the parent and frozen into a
//! [`SpawnPlan`]: the program path, argv and envp as C strings with their
//! null-terminated pointer arrays, the descriptors to inherit, the target
//! identity and the writepid targets. After `fork()` the child only walks
//! the plan, in this fixed order:
//!
//! 1. reset signal dispositions and unblock every signal
//! 2. clear close-on-exec on the inherited sockets and files
//! 3. optionally become a session leader on `/dev/console`
//! 4. bind to the configured cpu cores (failure ignored)
//! 5. set the nice value, `_exit(127)` if that is refused
//! 6. drop privileges: groups, gid, uid, capabilities, then umask
//! 7. write its pid to the writepid targets
//! 8. enter the sandbox (failure ignored)
//! 9. execve, or `_exit(127)` if that fails
//!
//! Between fork and exec the child may only make raw async-signal-safe
//! libc calls. It must not allocate, take locks, log, or touch any
//! `RefCell` of the loop: the parent could have been holding any of them
//! at the moment of the fork. Nothing in the child returns to the caller.
use crate::collaborator::SandboxHook;
use crate::error::*;
use crate::fdholder::ENV_FD_HOLD_PREFIX;
use crate::service::{
    CapabilitySet, Service, ServiceAttr, CAP_LAST_CAP, ENV_FILE_PREFIX, ENV_SOCKET_PREFIX,
};
use nix::libc::{self, c_char, c_int};
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};

/// exit status of a child that could not exec
pub const EXEC_FAILED_STATUS: i32 = 127;

const ENV_PREFIXES: [&str; 3] = [ENV_SOCKET_PREFIX, ENV_FILE_PREFIX, ENV_FD_HOLD_PREFIX];

const CONSOLE_PATH: &[u8] = b"/dev/console\0";

const LINUX_CAPABILITY_VERSION_3: u32 = 0x20080522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

#[derive(Debug)]
struct Identity {
    uid: libc::uid_t,
    gid: libc::gid_t,
    groups: Vec<libc::gid_t>,
}

/// Everything the child needs, prepared before fork.
#[derive(Debug)]
pub struct SpawnPlan {
    name: String,
    path: CString,
    argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp: Vec<CString>,
    envp_ptrs: Vec<*const c_char>,
    inherit_fds: Vec<RawFd>,
    console: bool,
    cpu_set: Option<libc::cpu_set_t>,
    importance: i32,
    identity: Option<Identity>,
    capabilities: Option<CapabilitySet>,
    umask: Mode,
    write_pid: Vec<CString>,
    sandbox: bool,
}

fn to_cstring(service: &str, what: &str, bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| Error::Config {
        service: service.to_string(),
        reason: format!("{} contains a NUL byte", what),
    })
}

fn cpu_set(service: &str, cores: &[usize]) -> Result<Option<libc::cpu_set_t>> {
    if cores.is_empty() {
        return Ok(None);
    }

    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe { libc::CPU_ZERO(&mut set) };
    for core in cores {
        if *core >= libc::CPU_SETSIZE as usize {
            return Err(Error::Config {
                service: service.to_string(),
                reason: format!("cpu core {} out of range", core),
            });
        }
        unsafe { libc::CPU_SET(*core, &mut set) };
    }
    Ok(Some(set))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    ptrs
}

impl SpawnPlan {
    /// freeze argv, environment and identity of service
    ///
    /// The environment is the one of init plus one variable per open socket,
    /// open file and set of held descriptors.
    pub fn new(service: &Service) -> Result<SpawnPlan> {
        let name = service.name();
        let exec = service.exec();
        let program = match exec.first() {
            None => {
                return Err(Error::Config {
                    service: name.to_string(),
                    reason: "no exec path".to_string(),
                })
            }
            Some(p) => p,
        };

        let path = to_cstring(name, "exec path", program.as_bytes())?;
        let argv = exec
            .iter()
            .map(|a| to_cstring(name, "argument", a.as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let mut vars: Vec<(String, String)> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter(|(k, _)| !ENV_PREFIXES.iter().any(|p| k.starts_with(p)))
            .collect();

        let mut inherit_fds = Vec::new();
        for socket in service.sockets().iter() {
            if let Some(fd) = &socket.fd {
                let raw = fd.as_raw_fd();
                vars.push((socket.spec.env_name(), raw.to_string()));
                inherit_fds.push(raw);
            }
        }
        for file in service.files().iter() {
            if let Some(fd) = &file.fd {
                let raw = fd.as_raw_fd();
                vars.push((file.spec.env_name(), raw.to_string()));
                inherit_fds.push(raw);
            }
        }
        let held = service.held_fds();
        if !held.is_empty() {
            let list: Vec<String> = held.iter().map(|fd| fd.to_string()).collect();
            vars.push((format!("{}{}", ENV_FD_HOLD_PREFIX, name), list.join(" ")));
            inherit_fds.extend(held);
        }

        let envp = vars
            .iter()
            .map(|(k, v)| to_cstring(name, "environment", format!("{}={}", k, v).as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let perms = service.permissions();
        let identity = Identity {
            uid: perms.uid.as_raw(),
            gid: perms.primary_gid().as_raw(),
            groups: perms.supplementary().iter().map(|g| g.as_raw()).collect(),
        };
        let unchanged = identity.uid == unistd::geteuid().as_raw()
            && identity.gid == unistd::getegid().as_raw()
            && identity.groups.is_empty();

        let write_pid = service
            .write_pid()
            .iter()
            .map(|p| to_cstring(name, "writepid path", p.as_os_str().as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        Ok(SpawnPlan {
            name: name.to_string(),
            path,
            argv,
            argv_ptrs,
            envp,
            envp_ptrs,
            inherit_fds,
            console: service.has_attr(ServiceAttr::CONSOLE),
            cpu_set: cpu_set(name, service.cpu_cores())?,
            importance: service.importance(),
            identity: if unchanged { None } else { Some(identity) },
            capabilities: perms.capabilities,
            umask: perms.umask,
            write_pid,
            sandbox: service.has_attr(ServiceAttr::SANDBOXED),
        })
    }

    ///
    pub fn name(&self) -> &str {
        &self.name
    }

    /// argv as strings
    pub fn argv(&self) -> Vec<String> {
        self.argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// value of key in the child environment
    pub fn env(&self, key: &str) -> Option<String> {
        let prefix = format!("{}=", key);
        self.envp.iter().find_map(|e| {
            e.to_str()
                .ok()
                .and_then(|s| s.strip_prefix(&prefix))
                .map(|v| v.to_string())
        })
    }

    /// descriptors the child keeps across exec
    pub fn inherit_fds(&self) -> &[RawFd] {
        &self.inherit_fds
    }

    /// cores the child is bound to, empty when unbound
    pub fn cpu_cores(&self) -> Vec<usize> {
        match &self.cpu_set {
            None => Vec::new(),
            Some(set) => (0..libc::CPU_SETSIZE as usize)
                .filter(|c| unsafe { libc::CPU_ISSET(*c, set) })
                .collect(),
        }
    }

    /// whether the child changes uid/gid
    pub fn drops_privileges(&self) -> bool {
        self.identity.is_some()
    }
}

/// Creates and signals service processes.
pub trait Spawner {
    /// start a process according to plan, returns its pid
    fn spawn(&self, plan: &SpawnPlan) -> Result<Pid>;

    /// signal a process started by spawn
    fn kill(&self, pid: Pid, signal: Signal) -> Result<()>;
}

/// fork(2) + execve(2)
pub struct ForkSpawner {
    sandbox: Box<dyn SandboxHook>,
}

impl ForkSpawner {
    ///
    pub fn new(sandbox: Box<dyn SandboxHook>) -> ForkSpawner {
        ForkSpawner { sandbox }
    }
}

impl Spawner for ForkSpawner {
    fn spawn(&self, plan: &SpawnPlan) -> Result<Pid> {
        let ret = unsafe { unistd::fork() };

        match ret {
            Ok(ForkResult::Parent { child }) => {
                log::debug!("Service {} forked as pid {}", plan.name, child);
                Ok(child)
            }
            Ok(ForkResult::Child) => unsafe { exec_child(plan, self.sandbox.as_ref()) },
            Err(e) => Err(Error::Resource {
                service: plan.name.clone(),
                reason: format!("fork failed: {}", e),
            }),
        }
    }

    fn kill(&self, pid: Pid, signal: Signal) -> Result<()> {
        basic::process_util::kill_quiet(pid, signal).context(UtilSnafu)
    }
}

/// The child half of [`ForkSpawner::spawn`]; see the module docs for what
/// may happen here.
unsafe fn exec_child(plan: &SpawnPlan, sandbox: &dyn SandboxHook) -> ! {
    reset_signals();

    for fd in &plan.inherit_fds {
        let flags = libc::fcntl(*fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(*fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
            libc::_exit(EXEC_FAILED_STATUS);
        }
    }

    if plan.console && !open_console() {
        libc::_exit(EXEC_FAILED_STATUS);
    }

    if let Some(set) = &plan.cpu_set {
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set);
    }

    if plan.importance != 0 && libc::setpriority(libc::PRIO_PROCESS, 0, plan.importance) != 0 {
        libc::_exit(EXEC_FAILED_STATUS);
    }

    if let Some(id) = &plan.identity {
        if plan.capabilities.is_some() {
            libc::prctl(libc::PR_SET_KEEPCAPS, 1, 0, 0, 0);
        }
        if libc::setgroups(id.groups.len() as _, id.groups.as_ptr()) != 0
            || libc::setgid(id.gid) != 0
            || libc::setuid(id.uid) != 0
        {
            libc::_exit(EXEC_FAILED_STATUS);
        }
    }

    if let Some(caps) = &plan.capabilities {
        if !apply_capabilities(caps) {
            libc::_exit(EXEC_FAILED_STATUS);
        }
    }

    libc::umask(plan.umask.bits());

    let pid = libc::getpid();
    for target in &plan.write_pid {
        write_pid(target, pid);
    }

    if plan.sandbox {
        let _ = sandbox.enter(&plan.name);
    }

    libc::execve(
        plan.path.as_ptr(),
        plan.argv_ptrs.as_ptr(),
        plan.envp_ptrs.as_ptr(),
    );
    libc::_exit(EXEC_FAILED_STATUS)
}

unsafe fn reset_signals() {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut action.sa_mask);
    for sig in 1..=libc::SIGRTMAX() {
        if sig == libc::SIGKILL || sig == libc::SIGSTOP {
            continue;
        }
        libc::sigaction(sig, &action, std::ptr::null_mut());
    }

    let mut mask: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut mask);
    libc::sigprocmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut());
}

unsafe fn open_console() -> bool {
    if libc::setsid() < 0 {
        return false;
    }
    let fd = libc::open(CONSOLE_PATH.as_ptr() as *const c_char, libc::O_RDWR);
    if fd < 0 {
        return false;
    }
    libc::ioctl(fd, libc::TIOCSCTTY, 0);
    for target in 0..3 {
        if libc::dup2(fd, target) < 0 {
            return false;
        }
    }
    if fd > 2 {
        libc::close(fd);
    }
    true
}

unsafe fn apply_capabilities(caps: &CapabilitySet) -> bool {
    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];
    for (i, word) in caps.words().iter().enumerate() {
        data[i] = CapUserData {
            effective: *word,
            permitted: *word,
            inheritable: *word,
        };
    }
    if libc::syscall(libc::SYS_capset, &header as *const CapUserHeader, data.as_ptr()) != 0 {
        return false;
    }

    for cap in 0..=CAP_LAST_CAP {
        if caps.contains(cap) {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_RAISE,
                cap as libc::c_ulong,
                0,
                0,
            );
        }
    }
    true
}

/// decimal pid into target, no allocation; failures are ignored
unsafe fn write_pid(target: &CString, pid: libc::pid_t) {
    let mut buf = [0u8; 16];
    let mut n = pid as u32;
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }

    let fd = libc::open(
        target.as_ptr(),
        libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
        0o644 as libc::c_uint,
    );
    if fd < 0 {
        return;
    }
    libc::write(
        fd,
        buf[pos..].as_ptr() as *const libc::c_void,
        buf.len() - pos,
    );
    libc::close(fd);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::NoSandbox;
    use crate::service::{Permissions, SocketSpec};
    use nix::sys::socket::SockType;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{Gid, Uid};
    use std::os::unix::io::OwnedFd;

    fn current_user() -> Permissions {
        Permissions {
            uid: Uid::effective(),
            gids: vec![Gid::effective()],
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_environment() {
        let spec = SocketSpec {
            name: "netd_sock".to_string(),
            kind: SockType::Datagram,
            perm: 0o660,
            uid: Uid::from_raw(0),
            gid: Gid::from_raw(0),
            passcred: false,
        };
        let service = Service::new("netd", vec!["/bin/echo".to_string(), "hi".to_string()])
            .with_permissions(current_user())
            .with_sockets(vec![spec]);

        let (a, _b) = std::os::unix::net::UnixDatagram::pair().unwrap();
        let fd: OwnedFd = a.into();
        let raw = fd.as_raw_fd();
        service.set_socket_fd(0, fd);

        let plan = SpawnPlan::new(&service).unwrap();
        assert_eq!(plan.argv(), vec!["/bin/echo", "hi"]);
        assert_eq!(plan.env("OHOS_SOCKET_netd_sock"), Some(raw.to_string()));
        assert_eq!(plan.inherit_fds(), &[raw]);
        assert!(!plan.drops_privileges());
    }

    #[test]
    fn test_plan_rejects_nul() {
        let service = Service::new("netd", vec!["/bin/ec\0ho".to_string()]);
        assert!(matches!(SpawnPlan::new(&service), Err(Error::Config { .. })));
        let service = Service::new("netd", vec![]);
        assert!(matches!(SpawnPlan::new(&service), Err(Error::Config { .. })));
    }

    #[test]
    fn test_fork_exec_and_writepid() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("netd.pid");
        let service = Service::new("netd", vec!["/bin/true".to_string()])
            .with_permissions(current_user())
            .with_write_pid(vec![pidfile.clone()]);

        let plan = SpawnPlan::new(&service).unwrap();
        let spawner = ForkSpawner::new(Box::new(NoSandbox));
        let pid = spawner.spawn(&plan).unwrap();
        assert_eq!(waitpid(pid, None).unwrap(), WaitStatus::Exited(pid, 0));
        assert_eq!(
            std::fs::read_to_string(&pidfile).unwrap(),
            pid.as_raw().to_string()
        );
    }

    #[test]
    fn test_plan_cpu_cores() {
        let service = Service::new("netd", vec!["/bin/true".to_string()])
            .with_cpu_cores(vec![2, 0]);
        assert_eq!(SpawnPlan::new(&service).unwrap().cpu_cores(), vec![0, 2]);

        let service = Service::new("netd", vec!["/bin/true".to_string()])
            .with_cpu_cores(vec![libc::CPU_SETSIZE as usize]);
        assert!(matches!(SpawnPlan::new(&service), Err(Error::Config { .. })));
    }

    /// (nice, Cpus_allowed_list) of pid once it has exec'd sleep
    fn sched_of(pid: Pid) -> (i32, String) {
        let start = std::time::Instant::now();
        loop {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
            if stat.contains("(sleep)") {
                let fields: Vec<&str> = stat[stat.rfind(')').unwrap() + 2..]
                    .split_whitespace()
                    .collect();
                let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).unwrap();
                let cpus = status
                    .lines()
                    .find_map(|l| l.strip_prefix("Cpus_allowed_list:"))
                    .unwrap()
                    .trim()
                    .to_string();
                return (fields[16].parse().unwrap(), cpus);
            }
            assert!(start.elapsed() < std::time::Duration::from_secs(5));
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn test_child_importance_and_cpu_core() {
        let allowed = nix::sched::sched_getaffinity(Pid::from_raw(0)).unwrap();
        let core = (0..libc::CPU_SETSIZE as usize)
            .find(|c| allowed.is_set(*c).unwrap_or(false))
            .unwrap();
        let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
        let importance = (nice + 5).min(19);

        let service = Service::new("netd", vec!["/bin/sleep".to_string(), "5".to_string()])
            .with_permissions(current_user())
            .with_importance(importance)
            .with_cpu_cores(vec![core]);
        let plan = SpawnPlan::new(&service).unwrap();
        let spawner = ForkSpawner::new(Box::new(NoSandbox));
        let pid = spawner.spawn(&plan).unwrap();

        let (child_nice, cpus) = sched_of(pid);
        spawner.kill(pid, Signal::SIGKILL).unwrap();
        waitpid(pid, None).unwrap();

        assert_eq!(child_nice, importance);
        assert_eq!(cpus, core.to_string());
    }

    #[test]
    fn test_exec_failure_exits_127() {
        let service = Service::new("netd", vec!["/nonexistent/netd".to_string()])
            .with_permissions(current_user());
        let plan = SpawnPlan::new(&service).unwrap();
        let spawner = ForkSpawner::new(Box::new(NoSandbox));
        let pid = spawner.spawn(&plan).unwrap();
        assert_eq!(
            waitpid(pid, None).unwrap(),
            WaitStatus::Exited(pid, EXEC_FAILED_STATUS)
        );
    }
}
