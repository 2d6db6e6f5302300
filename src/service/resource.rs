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

//! Sockets and files a service gets pre-opened by init
use crate::error::*;
use basic::fd_util;
use nix::fcntl::{self, OFlag};
use nix::sys::socket::{self, sockopt, AddressFamily, SockFlag, SockType, UnixAddr};
use nix::sys::stat::Mode;
use nix::unistd::{self, FchownatFlags, Gid, Uid};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

/// environment variable prefix publishing a socket fd to the child
pub const ENV_SOCKET_PREFIX: &str = "OHOS_SOCKET_";
/// environment variable prefix publishing a file fd to the child
pub const ENV_FILE_PREFIX: &str = "OHOS_FILE_";

/// listen backlog of stream and seqpacket service sockets
const SOCKET_BACKLOG: usize = 128;

/// a socket created under the socket directory before the service starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketSpec {
    pub name: String,
    pub kind: SockType,
    pub perm: u32,
    pub uid: Uid,
    pub gid: Gid,
    pub passcred: bool,
}

/// a file opened before the service starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub flags: OFlag,
    pub perm: u32,
    pub uid: Uid,
    pub gid: Gid,
}

impl SocketSpec {
    ///
    pub fn env_name(&self) -> String {
        format!("{}{}", ENV_SOCKET_PREFIX, self.name)
    }
}

impl FileSpec {
    /// `OHOS_FILE_` followed by the path with '/' replaced by '_'
    pub fn env_name(&self) -> String {
        format!(
            "{}{}",
            ENV_FILE_PREFIX,
            self.path.to_string_lossy().replace('/', "_")
        )
    }
}

/// kind of a descriptor handed over through the fd holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldKind {
    Socket,
    File,
}

/// a descriptor owned by init on behalf of a service
#[derive(Debug)]
pub struct HeldFd {
    pub kind: HeldKind,
    pub fd: OwnedFd,
}

impl HeldFd {
    /// take ownership of fd, sorting it into socket or file by fstat
    pub fn classify(fd: OwnedFd) -> HeldFd {
        let kind = match fd_util::fd_is_socket(fd.as_raw_fd()) {
            true => HeldKind::Socket,
            false => HeldKind::File,
        };
        HeldFd { kind, fd }
    }
}

/// Creates and closes the resources of a service.
///
/// Called right before fork and right after stop/reap, always on the loop thread.
pub trait ResourceProvider {
    /// create the socket described by spec
    fn create_socket(&self, service: &str, spec: &SocketSpec) -> Result<OwnedFd>;

    /// release a socket created by create_socket
    fn close_socket(&self, service: &str, spec: &SocketSpec, fd: OwnedFd) {
        log::debug!("Closing socket {} of service {}", spec.name, service);
        drop(fd);
    }

    /// open the file described by spec
    fn create_file(&self, service: &str, spec: &FileSpec) -> Result<OwnedFd>;

    /// release a file opened by create_file
    fn close_file(&self, service: &str, spec: &FileSpec, fd: OwnedFd) {
        log::debug!("Closing file {:?} of service {}", spec.path, service);
        drop(fd);
    }
}

/// sockets under a directory, files at their configured path
pub struct UnixResources {
    socket_dir: PathBuf,
}

impl UnixResources {
    ///
    pub fn new(socket_dir: &Path) -> Self {
        UnixResources {
            socket_dir: socket_dir.to_path_buf(),
        }
    }

    ///
    pub fn socket_path(&self, spec: &SocketSpec) -> PathBuf {
        self.socket_dir.join(&spec.name)
    }
}

/// chown/chmod failures leave the resource usable, only log them
fn set_owner_and_mode(service: &str, path: &Path, uid: Uid, gid: Gid, perm: u32) {
    if let Err(e) = unistd::fchownat(
        None,
        path,
        Some(uid),
        Some(gid),
        FchownatFlags::NoFollowSymlink,
    ) {
        log::warn!("Failed to chown {:?} for service {}: {}", path, service, e);
    }
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(perm)) {
        log::warn!("Failed to chmod {:?} for service {}: {}", path, service, e);
    }
}

impl ResourceProvider for UnixResources {
    fn create_socket(&self, service: &str, spec: &SocketSpec) -> Result<OwnedFd> {
        let resource_err = |reason: String| Error::Resource {
            service: service.to_string(),
            reason,
        };

        fs::create_dir_all(&self.socket_dir).context(IoSnafu)?;
        let path = self.socket_path(spec);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(resource_err(format!("unlink {:?}: {}", path, e)))
            }
            _ => {}
        }

        let raw: RawFd = socket::socket(AddressFamily::Unix, spec.kind, SockFlag::SOCK_CLOEXEC, None)
            .map_err(|e| resource_err(format!("socket {}: {}", spec.name, e)))?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if spec.passcred {
            socket::setsockopt(fd.as_raw_fd(), sockopt::PassCred, &true)
                .map_err(|e| resource_err(format!("SO_PASSCRED {}: {}", spec.name, e)))?;
        }

        let addr = UnixAddr::new(&path).map_err(|e| resource_err(format!("{:?}: {}", path, e)))?;
        socket::bind(fd.as_raw_fd(), &addr)
            .map_err(|e| resource_err(format!("bind {:?}: {}", path, e)))?;

        if spec.kind == SockType::Stream || spec.kind == SockType::SeqPacket {
            socket::listen(fd.as_raw_fd(), SOCKET_BACKLOG)
                .map_err(|e| resource_err(format!("listen {:?}: {}", path, e)))?;
        }

        set_owner_and_mode(service, &path, spec.uid, spec.gid, spec.perm);
        log::debug!("Created socket {:?} for service {}", path, service);
        Ok(fd)
    }

    fn create_file(&self, service: &str, spec: &FileSpec) -> Result<OwnedFd> {
        let raw = fcntl::open(
            &spec.path,
            spec.flags | OFlag::O_CREAT | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(spec.perm),
        )
        .map_err(|e| Error::Resource {
            service: service.to_string(),
            reason: format!("open {:?}: {}", spec.path, e),
        })?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        set_owner_and_mode(service, &spec.path, spec.uid, spec.gid, spec.perm);
        Ok(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> (Uid, Gid) {
        (unistd::getuid(), unistd::getgid())
    }

    #[test]
    fn test_env_names() {
        let (uid, gid) = me();
        let file = FileSpec {
            path: PathBuf::from("/data/log/hilog.txt"),
            flags: OFlag::O_RDWR,
            perm: 0o600,
            uid,
            gid,
        };
        assert_eq!(file.env_name(), "OHOS_FILE__data_log_hilog.txt");
        let sock = SocketSpec {
            name: "netd".to_string(),
            kind: SockType::Datagram,
            perm: 0o660,
            uid,
            gid,
            passcred: false,
        };
        assert_eq!(sock.env_name(), "OHOS_SOCKET_netd");
    }

    #[test]
    fn test_create_socket_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = UnixResources::new(&dir.path().join("socket"));
        let (uid, gid) = me();
        let sock = SocketSpec {
            name: "listener".to_string(),
            kind: SockType::Stream,
            perm: 0o660,
            uid,
            gid,
            passcred: true,
        };
        let fd = res.create_socket("svc", &sock).unwrap();
        assert!(fd_util::fd_is_socket(fd.as_raw_fd()));
        assert!(fd_util::fd_is_cloexec(fd.as_raw_fd()));
        let mode = fs::metadata(res.socket_path(&sock)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        /* a second create replaces the stale socket file */
        let again = res.create_socket("svc", &sock).unwrap();
        res.close_socket("svc", &sock, fd);
        res.close_socket("svc", &sock, again);

        let file = FileSpec {
            path: dir.path().join("state"),
            flags: OFlag::O_RDWR,
            perm: 0o600,
            uid,
            gid,
        };
        let fd = res.create_file("svc", &file).unwrap();
        assert!(!fd_util::fd_is_socket(fd.as_raw_fd()));
        assert_eq!(HeldFd::classify(fd).kind, HeldKind::File);
    }
}
