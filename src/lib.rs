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

//! sysinit: the service supervision core of a PID 1 init process.
//!
//! One thread runs an epoll loop ([`event::Events`]). Child exits arrive as
//! SIGCHLD through a signalfd and end up in [`supervisor::ProcessSupervisor::reap`],
//! which applies the crash policy. Services may park descriptors with init
//! through the fd holder socket so that listeners survive a restart.
pub mod cgroup_tracker;
pub mod collaborator;
pub mod config;
pub mod control;
pub mod crash;
pub mod descriptor;
pub mod error;
pub mod fdholder;
pub mod manager;
pub mod registry;
pub mod service;
pub mod signals;
pub mod spawn;
pub mod status;
pub mod supervisor;

pub use crate::error::{Error, Result};
pub use crate::manager::{Collaborators, Manager};
