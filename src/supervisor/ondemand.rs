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

//! Socket activation: watch the sockets of an idle ONDEMAND service and
//! start it when one becomes readable.
use super::ProcessSupervisor;
use crate::service::Service;
use event::{EventType, Events, Source};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

pub(super) struct OndemandWatch {
    supervisor: Weak<ProcessSupervisor>,
    service: Rc<Service>,
    fd: RawFd,
}

impl OndemandWatch {
    pub(super) fn new(
        supervisor: Weak<ProcessSupervisor>,
        service: Rc<Service>,
        fd: RawFd,
    ) -> OndemandWatch {
        OndemandWatch {
            supervisor,
            service,
            fd,
        }
    }
}

impl Source for OndemandWatch {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn event_type(&self) -> EventType {
        EventType::Io
    }

    fn epoll_event(&self) -> u32 {
        libc::EPOLLIN as u32
    }

    fn priority(&self) -> i8 {
        0i8
    }

    fn dispatch(&self, _: &Events) -> i32 {
        let supervisor = match self.supervisor.upgrade() {
            None => return 0,
            Some(s) => s,
        };

        log::info!(
            "Socket {} of ondemand service {} is readable, starting it",
            self.fd,
            self.service.name()
        );
        if let Err(e) = supervisor.start(&self.service) {
            log::error!("Failed to start ondemand service {}: {}", self.service.name(), e);
        }
        0
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn description(&self) -> String {
        format!("ondemand watch of {}", self.service.name())
    }
}
