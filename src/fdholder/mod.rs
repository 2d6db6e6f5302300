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

//! The fd holder: services park descriptors in init across a restart.
//!
//! Requests are datagrams on a well-known unix socket, see [`message`] for
//! the payload and [`cmsg`] for descriptor passing. Every request is
//! authenticated by comparing the kernel supplied sender pid with the pid
//! recorded for the named service. A rejected request gets its error text
//! back and its descriptors are closed.
mod client;
pub mod cmsg;
pub mod message;

pub use client::{inherited_fds, parse_fd_list, FdHolderClient};
pub use message::{FdAction, FdHolderRequest};

use crate::error::*;
use crate::registry::ServiceRegistry;
use crate::service::{HeldFd, HeldKind, Service};
use cmsg::Received;
use event::{EventType, Events, Source};
use nix::sys::socket::{self, sockopt, AddressFamily, SockFlag, SockType, UnixAddr};
use std::fs;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// most descriptors one request may carry
pub const MAX_HOLD_FDS: usize = 64;

/// payload of a successful GET reply
pub const SEND_DONE: &str = "send done";

/// environment variable prefix publishing held descriptors to a new process
pub const ENV_FD_HOLD_PREFIX: &str = "OHOS_FD_HOLD_";

/// Server side of the fd-holder socket, an io source of the loop.
pub struct FdHolder {
    fd: OwnedFd,
    path: PathBuf,
    registry: Rc<ServiceRegistry>,
}

impl FdHolder {
    /// bind the holder socket at path, replacing a stale one
    pub fn new(path: &Path, registry: Rc<ServiceRegistry>) -> Result<FdHolder> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context(IoSnafu)?;
        }
        match fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(Error::Io { source: e })
            }
            _ => {}
        }

        let raw = socket::socket(
            AddressFamily::Unix,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            None,
        )
        .context(NixSnafu)?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        socket::setsockopt(fd.as_raw_fd(), sockopt::PassCred, &true).context(NixSnafu)?;
        let addr = UnixAddr::new(path).context(NixSnafu)?;
        socket::bind(fd.as_raw_fd(), &addr).context(NixSnafu)?;

        log::debug!("Fd holder listening on {:?}", path);
        Ok(FdHolder {
            fd,
            path: path.to_path_buf(),
            registry,
        })
    }

    ///
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// handle every queued request, returns how many were seen
    pub fn process_pending(&self) -> usize {
        let mut n = 0;
        loop {
            let received = match cmsg::recv_message(self.fd.as_raw_fd(), true) {
                Ok(Some(r)) => r,
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to receive fd holder request: {}", e);
                    break;
                }
            };
            n += 1;

            let sender = received.sender;
            if let Err(e) = self.serve(received) {
                log::error!("Fd holder request rejected: {}", e);
                self.reply(sender.as_ref(), &e.to_string());
            }
        }
        n
    }

    /// on error the request, and so its descriptors, is already dropped
    fn serve(&self, received: Received) -> Result<()> {
        received.validate()?;
        let request: FdHolderRequest = received
            .payload
            .parse()
            .map_err(|reason| Error::Protocol { reason })?;

        let service = self.authenticate(&request, &received)?;
        match request.action {
            FdAction::Hold => self.hold(&service, request.poll, received.fds),
            FdAction::Get => self.give_back(&service, received.sender.as_ref()),
        }
    }

    fn authenticate(&self, request: &FdHolderRequest, received: &Received) -> Result<Rc<Service>> {
        let pid = match received.sender_pid() {
            None => {
                return Err(Error::Protocol {
                    reason: "Missing credentials".to_string(),
                })
            }
            Some(p) => p,
        };

        match self.registry.get(&request.service) {
            Some(s) if s.pid() > 0 && s.pid() == pid => Ok(s),
            _ => Err(Error::Protocol {
                reason: "Invalid service".to_string(),
            }),
        }
    }

    fn hold(&self, service: &Service, poll: bool, fds: Vec<OwnedFd>) -> Result<()> {
        if fds.is_empty() || fds.len() > MAX_HOLD_FDS {
            return Err(Error::Protocol {
                reason: format!("Invalid fd count: {}", fds.len()),
            });
        }

        let held: Vec<HeldFd> = fds.into_iter().map(HeldFd::classify).collect();
        let n = held.len();
        service.hold_fds(held, poll);
        log::info!(
            "Holding {} fd(s) for service {} ({} socket(s), poll: {})",
            n,
            service.name(),
            service.held_count(HeldKind::Socket),
            service.held_poll()
        );
        Ok(())
    }

    fn give_back(&self, service: &Service, sender: Option<&UnixAddr>) -> Result<()> {
        let fds = service.held_fds();
        if fds.is_empty() {
            return Err(Error::Protocol {
                reason: format!("No fds held for {}", service.name()),
            });
        }
        if sender.is_none() {
            return Err(Error::Protocol {
                reason: "Unknown sender".to_string(),
            });
        }

        cmsg::send_message(self.fd.as_raw_fd(), SEND_DONE, &fds, false, sender)?;

        /* ownership moved to the client, close our copies */
        let given = service.take_held_fds();
        log::info!("Returned {} fd(s) to service {}", given.len(), service.name());
        Ok(())
    }

    fn reply(&self, to: Option<&UnixAddr>, text: &str) {
        if to.is_none() {
            return;
        }
        if let Err(e) = cmsg::send_message(self.fd.as_raw_fd(), text, &[], false, to) {
            log::debug!("Failed to reply to fd holder client: {}", e);
        }
    }
}

impl Source for FdHolder {
    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn event_type(&self) -> EventType {
        EventType::Io
    }

    fn epoll_event(&self) -> u32 {
        (libc::EPOLLIN) as u32
    }

    fn priority(&self) -> i8 {
        0i8
    }

    fn dispatch(&self, _: &Events) -> i32 {
        self.process_pending();
        0
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn description(&self) -> String {
        "fd holder".to_string()
    }
}
