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

//! # A single-threaded event loop based on epoll
//!
//! Supports io, signal and monotonic one-shot timer sources. Everything is
//! dispatched on the thread that calls [`Events::run`] or [`Events::rloop`];
//! a source callback may add, remove or re-enable sources, including itself.
//!
//! # Example:
//! ```rust
//! # use std::os::unix::io::RawFd;
//! # use std::rc::Rc;
//! # use event::{EventState, EventType, Events, Source};
//! struct Timeout;
//!
//! impl Source for Timeout {
//!     fn event_type(&self) -> EventType {
//!         EventType::TimerMonotonic
//!     }
//!
//!     fn time_relative(&self) -> u64 {
//!         10000
//!     }
//!
//!     fn priority(&self) -> i8 {
//!         0i8
//!     }
//!
//!     fn dispatch(&self, e: &Events) -> i32 {
//!         e.set_exit();
//!         0
//!     }
//!
//!     fn token(&self) -> u64 {
//!         let data: u64 = unsafe { std::mem::transmute(self) };
//!         data
//!     }
//! }
//!
//! let e = Events::new().unwrap();
//! let s: Rc<dyn Source> = Rc::new(Timeout);
//! e.add_source(s.clone()).unwrap();
//! e.set_enabled(s.clone(), EventState::OneShot).unwrap();
//! e.rloop().unwrap();
//! e.del_source(s).unwrap();
//! ```
pub mod error;
pub mod events;
mod poll;
pub mod source;
mod timer;

pub use crate::events::Events;
pub(crate) use crate::poll::Epoll;
pub use crate::source::Source;
pub use error::*;

/// Source kinds understood by the loop
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub enum EventType {
    /// readiness of a file descriptor
    Io,
    /// delivery of one of [`Source::signals`], read through a signalfd
    Signal,
    /// fires once [`Source::time_relative`] microseconds after being enabled
    TimerMonotonic,
}

/// The dispatch status of the event
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum EventState {
    /// Start scheduling
    On,
    /// Close scheduling
    Off,
    /// Stop after dispatching once
    OneShot,
}
