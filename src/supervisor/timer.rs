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

use super::ProcessSupervisor;
use crate::service::Service;
use basic::time_util::USEC_PER_MSEC;
use event::{EventType, Events, Source};
use std::rc::{Rc, Weak};

/// one-shot delayed start of a service
pub(super) struct ServiceTimer {
    supervisor: Weak<ProcessSupervisor>,
    service: Rc<Service>,
    delay_usec: u64,
}

impl ServiceTimer {
    pub(super) fn new(
        supervisor: Weak<ProcessSupervisor>,
        service: Rc<Service>,
        delay_ms: u64,
    ) -> ServiceTimer {
        ServiceTimer {
            supervisor,
            service,
            delay_usec: delay_ms.saturating_mul(USEC_PER_MSEC),
        }
    }
}

impl Source for ServiceTimer {
    fn event_type(&self) -> EventType {
        EventType::TimerMonotonic
    }

    fn time_relative(&self) -> u64 {
        self.delay_usec
    }

    fn priority(&self) -> i8 {
        0i8
    }

    fn dispatch(&self, _: &Events) -> i32 {
        if let Some(supervisor) = self.supervisor.upgrade() {
            supervisor.timer_fired(&self.service);
        }
        0
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn description(&self) -> String {
        format!("start timer of {}", self.service.name())
    }
}
