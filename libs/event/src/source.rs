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

//! # Events must implement the Source trait
use crate::EventType;
use crate::Events;
use nix::sys::signal::Signal;
use std::fmt::Debug;
use std::os::unix::io::RawFd;

/// Events must implement the Source trait
pub trait Source {
    /// For Io sources, the fd to listen to
    fn fd(&self) -> RawFd {
        -1
    }

    /// For Signal sources, the signals to listen to
    fn signals(&self) -> Vec<Signal> {
        vec![]
    }

    /// For timer sources, microseconds from enabling to firing
    fn time_relative(&self) -> u64 {
        u64::MAX
    }

    /// Specify the type of source
    fn event_type(&self) -> EventType {
        EventType::Io
    }

    /// Specifies the epoll event type to listen for
    fn epoll_event(&self) -> u32 {
        libc::EPOLLIN as u32
    }

    ///
    /// The token is used to distinguish the source of the event, unless you can specify it uniformly,
    /// it is recommended to use the recommended implementation
    /// ```bash
    /// fn token(&self) -> u64 {
    ///     let data: u64 = unsafe { std::mem::transmute(self) };
    ///     data
    /// }
    /// ```
    fn token(&self) -> u64;

    /// Set the priority, -127i8 ~ 128i8, the smaller the value, the higher the priority
    fn priority(&self) -> i8;

    /// The code of callback
    fn dispatch(&self, event: &Events) -> i32;

    /// The short description of this source
    fn description(&self) -> String {
        String::from("default")
    }
}

// for HashSet
impl std::hash::Hash for dyn Source {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.token().hash(state);
    }
}

impl PartialEq for dyn Source {
    fn eq(&self, other: &dyn Source) -> bool {
        self.token() == other.token()
    }
}

impl Eq for dyn Source {}

// for BinaryHeap
impl Ord for dyn Source {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority()).reverse()
    }
}

impl PartialOrd for dyn Source {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Source {{ {} }}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::rc::Rc;

    struct TestSource {
        token: u64,
        priority: i8,
    }

    impl Source for TestSource {
        fn token(&self) -> u64 {
            self.token
        }

        fn priority(&self) -> i8 {
            self.priority
        }

        fn dispatch(&self, _: &Events) -> i32 {
            0
        }
    }

    #[test]
    fn test_heap_pops_highest_priority_first() {
        let mut heap: BinaryHeap<Rc<dyn Source>> = BinaryHeap::new();
        heap.push(Rc::new(TestSource { token: 1, priority: 0 }));
        heap.push(Rc::new(TestSource { token: 2, priority: -10 }));
        heap.push(Rc::new(TestSource { token: 3, priority: 5 }));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|s| s.token())).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_source_defaults() {
        let source = TestSource { token: 7, priority: 0 };
        assert_eq!(source.fd(), -1);
        assert!(source.signals().is_empty());
        assert_eq!(source.event_type(), EventType::Io);
        assert_eq!(source.description(), "default");
    }
}
