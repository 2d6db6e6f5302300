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

//! Service attribute flags
use bitflags::bitflags;

bitflags! {
    /// independent per-service flags
    pub struct ServiceAttr: u32 {
        /// not restarted merely because it exited
        const ONCE = 1 << 0;
        /// boot-relevant, logged louder when it fails
        const IMPORTANT = 1 << 1;
        /// permanent failure reboots the system
        const CRITICAL = 1 << 2;
        /// not started at boot
        const DISABLED = 1 << 3;
        /// gets /dev/console as controlling terminal
        const CONSOLE = 1 << 4;
        /// registered after boot
        const DYNAMIC = 1 << 5;
        /// started by activity on its sockets
        const ONDEMAND = 1 << 6;
        /// enters the sandbox before exec
        const SANDBOXED = 1 << 7;
        /// a restart was requested explicitly
        const NEED_RESTART = 1 << 8;
        /// a stop is in flight, the next exit is deliberate
        const NEED_STOP = 1 << 9;
        /// failed validation at start time, never started again
        const INVALID = 1 << 10;
    }
}

impl Default for ServiceAttr {
    fn default() -> Self {
        ServiceAttr::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_independent() {
        let mut attr = ServiceAttr::ONCE | ServiceAttr::CRITICAL;
        attr.insert(ServiceAttr::NEED_STOP);
        attr.remove(ServiceAttr::ONCE);
        assert!(attr.contains(ServiceAttr::CRITICAL | ServiceAttr::NEED_STOP));
        assert!(!attr.contains(ServiceAttr::ONCE));
        assert_eq!(ServiceAttr::default(), ServiceAttr::empty());
    }
}
