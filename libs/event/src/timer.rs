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

//! Relative one-shot timers multiplexed over a single CLOCK_MONOTONIC timerfd
use crate::{error::*, syscall};
use basic::time_util::{now_monotonic_usec, usec_to_timespec, USEC_INFINITY};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::os::unix::io::RawFd;
use std::ptr;

#[derive(Debug)]
pub(crate) struct Timer {
    fd: RawFd,
    /// (deadline, token), stale entries are skipped lazily
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    armed: HashMap<u64, u64>,
}

impl Timer {
    pub(crate) fn new() -> Result<Timer> {
        let fd = syscall!(timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC
        ))?;
        Ok(Timer {
            fd,
            queue: BinaryHeap::new(),
            armed: HashMap::new(),
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn now(&self) -> u64 {
        now_monotonic_usec()
    }

    /// arm token to fire `relative` usec from now, replacing any earlier deadline
    pub(crate) fn arm(&mut self, token: u64, relative: u64) {
        let now = self.now();
        let deadline = if relative > USEC_INFINITY - now {
            USEC_INFINITY
        } else {
            now + relative
        };
        self.armed.insert(token, deadline);
        self.queue.push(Reverse((deadline, token)));
    }

    pub(crate) fn disarm(&mut self, token: u64) {
        self.armed.remove(&token);
    }

    pub(crate) fn is_armed(&self, token: u64) -> bool {
        self.armed.contains_key(&token)
    }

    fn drop_stale(&mut self) {
        while let Some(Reverse((deadline, token))) = self.queue.peek().copied() {
            if self.armed.get(&token) == Some(&deadline) {
                break;
            }
            self.queue.pop();
        }
    }

    /// earliest live deadline
    pub(crate) fn next(&mut self) -> Option<u64> {
        self.drop_stale();
        self.queue.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// pop one token whose deadline has passed
    pub(crate) fn pop_expired(&mut self, now: u64) -> Option<u64> {
        let next = self.next()?;
        if next > now {
            return None;
        }
        let Reverse((_, token)) = self.queue.pop()?;
        self.armed.remove(&token);
        Some(token)
    }

    /// program the timerfd for the earliest deadline, or disarm it
    pub(crate) fn program(&mut self) -> Result<()> {
        let value = match self.next() {
            Some(next) if next != USEC_INFINITY => usec_to_timespec(next.max(1)),
            _ => usec_to_timespec(0),
        };
        let spec = libc::itimerspec {
            it_interval: usec_to_timespec(0),
            it_value: value,
        };
        syscall!(timerfd_settime(
            self.fd,
            libc::TFD_TIMER_ABSTIME,
            &spec,
            ptr::null_mut()
        ))?;
        Ok(())
    }

    /// consume the expiration counter
    pub(crate) fn flush(&self) {
        let mut buf = [0u8; 8];
        let _ = nix::unistd::read(self.fd, &mut buf);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let _ = syscall!(close(self.fd));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut t = Timer::new().unwrap();
        t.arm(1, 1000);
        t.arm(2, 5000);
        t.arm(1, 10_000_000);
        let now = t.now() + 6000;
        assert_eq!(t.pop_expired(now), Some(2));
        assert_eq!(t.pop_expired(now), None);
        assert!(t.is_armed(1));
        t.disarm(1);
        assert_eq!(t.next(), None);
        t.program().unwrap();
    }
}
