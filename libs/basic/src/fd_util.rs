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

//! descriptor flag and type helpers
use crate::error::*;
use nix::{
    fcntl::{FcntlArg, FdFlag},
    sys::stat::{fstat, SFlag},
};
use std::os::unix::io::RawFd;

/// set or clear FD_CLOEXEC on fd
pub fn fd_cloexec(fd: RawFd, cloexec: bool) -> Result<()> {
    let flags = nix::fcntl::fcntl(fd, FcntlArg::F_GETFD).context(NixSnafu)?;
    let fd_flag = FdFlag::from_bits_truncate(flags);

    let nflag = match cloexec {
        true => fd_flag | FdFlag::FD_CLOEXEC,
        false => fd_flag & !FdFlag::FD_CLOEXEC,
    };
    if nflag == fd_flag {
        return Ok(());
    }

    nix::fcntl::fcntl(fd, FcntlArg::F_SETFD(nflag)).context(NixSnafu)?;
    Ok(())
}

///
pub fn fd_is_cloexec(fd: RawFd) -> bool {
    match nix::fcntl::fcntl(fd, FcntlArg::F_GETFD) {
        Ok(flags) => FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC),
        Err(_) => false,
    }
}

/// whether fd refers to a socket, false if fd is not open
pub fn fd_is_socket(fd: RawFd) -> bool {
    match fstat(fd) {
        Ok(st) => (st.st_mode & SFlag::S_IFMT.bits()) == SFlag::S_IFSOCK.bits(),
        Err(_) => false,
    }
}

/// whether fd is an open descriptor of this process
pub fn fd_is_valid(fd: RawFd) -> bool {
    fd >= 0 && nix::fcntl::fcntl(fd, FcntlArg::F_GETFD).is_ok()
}

/// close fd, ignoring errors
pub fn close(fd: RawFd) {
    if fd >= 0 {
        let _ = nix::unistd::close(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::{io::AsRawFd, net::UnixDatagram};

    #[test]
    fn test_fd_cloexec() {
        let (r, w) = nix::unistd::pipe().unwrap();
        fd_cloexec(r, true).unwrap();
        assert!(fd_is_cloexec(r));
        fd_cloexec(r, false).unwrap();
        assert!(!fd_is_cloexec(r));
        close(r);
        close(w);
    }

    #[test]
    fn test_fd_is_socket() {
        let (a, _b) = UnixDatagram::pair().unwrap();
        assert!(fd_is_socket(a.as_raw_fd()));

        let file = tempfile::tempfile().unwrap();
        assert!(!fd_is_socket(file.as_raw_fd()));
        assert!(fd_is_valid(file.as_raw_fd()));
        assert!(!fd_is_valid(-1));
    }
}
