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

//! the library of operation on the cgroup
//!
//! Paths handed to these functions are absolute cgroup directories, the
//! caller decides where the hierarchy is mounted.

use bitflags::bitflags;
mod cgroup;
pub mod error;
pub use crate::cgroup::cg_attach;
pub use crate::cgroup::cg_create;
pub use crate::cgroup::cg_get_pids;
pub use crate::cgroup::cg_kill;
pub use crate::cgroup::cg_remove;
pub use crate::cgroup::CGROUP_PROCS;

bitflags! {
    /// the flag that operate on the cgroup controller
    pub struct CgFlags: u8 {
        /// ignore the process which call the kill operation
        const IGNORE_SELF = 1 << 0;
        /// remove the cgroup dir after killing it
        const REMOVE = 1 << 1;
    }
}
