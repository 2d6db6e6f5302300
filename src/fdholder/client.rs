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

//! Service side of the fd holder.
use super::cmsg;
use super::{FdHolderRequest, ENV_FD_HOLD_PREFIX, MAX_HOLD_FDS, SEND_DONE};
use crate::error::*;
use nix::sys::socket::{self, sockopt, UnixAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the fd holder of init on behalf of one service process.
pub struct FdHolderClient {
    path: PathBuf,
    timeout: Duration,
}

impl FdHolderClient {
    ///
    pub fn new(path: &Path) -> FdHolderClient {
        FdHolderClient {
            path: path.to_path_buf(),
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// how long get waits for the reply
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// an unbound socket that autobinds on first send, so init can answer
    fn socket(&self) -> Result<UnixDatagram> {
        let sock = UnixDatagram::unbound().context(IoSnafu)?;
        socket::setsockopt(sock.as_raw_fd(), sockopt::PassCred, &true).context(NixSnafu)?;
        sock.set_read_timeout(Some(self.timeout)).context(IoSnafu)?;
        Ok(sock)
    }

    fn send(&self, sock: &UnixDatagram, request: &FdHolderRequest, fds: &[RawFd]) -> Result<()> {
        let addr = UnixAddr::new(&self.path).context(NixSnafu)?;
        cmsg::send_message(
            sock.as_raw_fd(),
            &request.to_string(),
            fds,
            true,
            Some(&addr),
        )?;
        Ok(())
    }

    /// hand duplicates of fds to init, the caller keeps its own copies
    ///
    /// Fire and forget: a rejected request is only visible in the log of init.
    pub fn hold(&self, service: &str, fds: &[RawFd], poll: bool) -> Result<()> {
        if fds.is_empty() || fds.len() > MAX_HOLD_FDS {
            return Err(Error::Protocol {
                reason: format!("Invalid fd count: {}", fds.len()),
            });
        }

        let sock = self.socket()?;
        self.send(&sock, &FdHolderRequest::hold(service, poll), fds)
    }

    /// take back what init holds for service
    pub fn get(&self, service: &str) -> Result<Vec<OwnedFd>> {
        let sock = self.socket()?;
        self.send(&sock, &FdHolderRequest::get(service), &[])?;

        let reply = match cmsg::recv_message(sock.as_raw_fd(), false)? {
            None => {
                return Err(Error::Timeout {
                    service: service.to_string(),
                })
            }
            Some(r) => r,
        };
        reply.validate()?;
        if reply.payload != SEND_DONE {
            return Err(Error::Protocol {
                reason: reply.payload,
            });
        }
        if reply.fds.is_empty() {
            return Err(Error::Protocol {
                reason: "Reply carries no fds".to_string(),
            });
        }
        Ok(reply.fds)
    }
}

/// parse the space separated fd list of `OHOS_FD_HOLD_<service>`
pub fn parse_fd_list(value: &str) -> Vec<RawFd> {
    value
        .split_whitespace()
        .filter_map(|s| s.parse::<RawFd>().ok())
        .filter(|fd| *fd >= 0)
        .take(MAX_HOLD_FDS)
        .collect()
}

/// descriptors init passed to this process across exec
///
/// The process already owns them, so nothing is authenticated here.
pub fn inherited_fds(service: &str) -> Vec<OwnedFd> {
    let value = match std::env::var(format!("{}{}", ENV_FD_HOLD_PREFIX, service)) {
        Err(_) => return Vec::new(),
        Ok(v) => v,
    };

    parse_fd_list(&value)
        .into_iter()
        .filter(|fd| basic::fd_util::fd_is_valid(*fd))
        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .collect()
}
