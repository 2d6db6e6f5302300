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

//! datagrams carrying descriptors and credentials
use super::MAX_HOLD_FDS;
use crate::error::*;
use nix::libc;
use nix::errno::Errno;
use nix::sys::socket::{
    self, ControlMessage, ControlMessageOwned, MsgFlags, SockaddrLike, UnixAddr, UnixCredentials,
};
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

/// largest payload of a request or reply
pub const MAX_MESSAGE_LEN: usize = 1024;

/// one received datagram, descriptors already owned
#[derive(Debug)]
pub struct Received {
    pub payload: String,
    pub fds: Vec<OwnedFd>,
    pub credentials: Option<UnixCredentials>,
    pub sender: Option<UnixAddr>,
    pub ctrunc: bool,
    pub truncated: bool,
}

impl Received {
    /// reject truncated messages and too many descriptors
    ///
    /// The descriptors stay owned by self and are closed when it drops.
    pub fn validate(&self) -> Result<()> {
        if self.ctrunc {
            return Err(Error::Protocol {
                reason: "Control message truncated".to_string(),
            });
        }
        if self.truncated {
            return Err(Error::Protocol {
                reason: "Message truncated".to_string(),
            });
        }
        if self.fds.len() > MAX_HOLD_FDS {
            return Err(Error::Protocol {
                reason: format!("Too many fds: {}", self.fds.len()),
            });
        }
        Ok(())
    }

    /// sender pid from SCM_CREDENTIALS
    pub fn sender_pid(&self) -> Option<i32> {
        self.credentials.as_ref().map(|c| c.pid())
    }
}

/// address of the sender of the next queued datagram, which stays queued
///
/// `recvmsg` of nix 0.24 hands back the name without `msg_namelen`, so the
/// address could not be replied to. `None` for an unbound sender.
fn peek_sender(fd: RawFd, flags: MsgFlags) -> nix::Result<Option<UnixAddr>> {
    let mut name: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
    let ret = unsafe {
        libc::recvfrom(
            fd,
            std::ptr::null_mut(),
            0,
            (flags | MsgFlags::MSG_PEEK).bits(),
            &mut name as *mut libc::sockaddr_un as *mut libc::sockaddr,
            &mut len,
        )
    };
    Errno::result(ret)?;

    if len as usize <= std::mem::size_of::<libc::sa_family_t>() {
        return Ok(None);
    }
    Ok(unsafe {
        UnixAddr::from_raw(
            &name as *const libc::sockaddr_un as *const libc::sockaddr,
            Some(len),
        )
    })
}

/// receive one datagram
///
/// Every descriptor passed with it is wrapped before anything can fail, so
/// an early return closes them. `Ok(None)` means nothing was queued, or
/// for a blocking call that the socket receive timeout passed.
pub fn recv_message(fd: RawFd, nonblock: bool) -> Result<Option<Received>> {
    let mut buf = [0u8; MAX_MESSAGE_LEN];
    let mut cmsg = nix::cmsg_space!(libc::ucred, [RawFd; MAX_HOLD_FDS]);
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut flags = MsgFlags::MSG_CMSG_CLOEXEC;
    if nonblock {
        flags |= MsgFlags::MSG_DONTWAIT;
    }

    let sender = match peek_sender(fd, flags & MsgFlags::MSG_DONTWAIT) {
        Ok(s) => s,
        Err(Errno::EAGAIN) => return Ok(None),
        Err(e) => return Err(Error::Nix { source: e }),
    };
    let msg = match socket::recvmsg::<UnixAddr>(fd, &mut iov, Some(&mut cmsg), flags) {
        Ok(m) => m,
        Err(Errno::EAGAIN) => return Ok(None),
        Err(e) => return Err(Error::Nix { source: e }),
    };

    let mut fds = Vec::new();
    let mut credentials = None;
    for c in msg.cmsgs() {
        match c {
            ControlMessageOwned::ScmRights(raw) => {
                fds.extend(raw.into_iter().map(|f| unsafe { OwnedFd::from_raw_fd(f) }));
            }
            ControlMessageOwned::ScmCredentials(cred) => credentials = Some(cred),
            other => log::debug!("Ignoring control message {:?}", other),
        }
    }

    let bytes = msg.bytes;
    let ctrunc = msg.flags.contains(MsgFlags::MSG_CTRUNC);
    let truncated = msg.flags.contains(MsgFlags::MSG_TRUNC);
    let payload = String::from_utf8_lossy(&buf[..bytes])
        .trim_end_matches('\0')
        .to_string();

    Ok(Some(Received {
        payload,
        fds,
        credentials,
        sender,
        ctrunc,
        truncated,
    }))
}

/// send payload with optional descriptors and credentials
///
/// `addr` is needed on unconnected sockets.
pub fn send_message(
    fd: RawFd,
    payload: &str,
    fds: &[RawFd],
    with_credentials: bool,
    addr: Option<&UnixAddr>,
) -> Result<usize> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(Error::Protocol {
            reason: "Message too long".to_string(),
        });
    }
    if fds.len() > MAX_HOLD_FDS {
        return Err(Error::Protocol {
            reason: format!("Too many fds: {}", fds.len()),
        });
    }

    let creds = UnixCredentials::new();
    let mut cmsgs = Vec::new();
    if !fds.is_empty() {
        cmsgs.push(ControlMessage::ScmRights(fds));
    }
    if with_credentials {
        cmsgs.push(ControlMessage::ScmCredentials(&creds));
    }

    let iov = [IoSlice::new(payload.as_bytes())];
    socket::sendmsg(fd, &iov, &cmsgs, MsgFlags::MSG_NOSIGNAL, addr).context(NixSnafu)
}

