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

//! Crash policy: restart, give up or reboot, decided from two counters.
use basic::time_util;

/// default crashes tolerated inside one window
pub const DEFAULT_CRASH_COUNT: u32 = 4;
/// default crash window in seconds
pub const DEFAULT_CRASH_WINDOW_SEC: u64 = 240;

/// what to do after an unexpected exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashVerdict {
    /// start the service again
    Restart,
    /// leave the service stopped
    GiveUp,
    /// a critical service keeps failing, reboot the system
    RebootSystem,
}

/// crash history of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashCounter {
    window_start: u64,
    count: u32,
    limit: u32,
    window_secs: u64,
}

impl Default for CrashCounter {
    fn default() -> Self {
        CrashCounter::new(DEFAULT_CRASH_COUNT, DEFAULT_CRASH_WINDOW_SEC)
    }
}

impl CrashCounter {
    ///
    pub fn new(limit: u32, window_secs: u64) -> Self {
        CrashCounter {
            window_start: 0,
            count: 0,
            limit,
            window_secs,
        }
    }

    /// crashes counted in the current window
    pub fn count(&self) -> u32 {
        self.count
    }

    ///
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    ///
    pub fn limit(&self) -> u32 {
        self.limit
    }

    ///
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// forget the history, used after a deliberate stop
    pub fn reset(&mut self) {
        self.window_start = 0;
        self.count = 0;
    }
}

/// Classify one crash at monotonic time `now` (seconds).
///
/// The first crash, or one arriving after the window has elapsed, opens a new
/// window with a count of one. Later crashes inside the window increment the
/// count, and once it exceeds the limit the service is given up, or the
/// system rebooted if it is critical.
pub fn classify(counter: &mut CrashCounter, critical: bool, now: u64) -> CrashVerdict {
    if counter.count == 0 || now.saturating_sub(counter.window_start) > counter.window_secs {
        counter.window_start = now;
        counter.count = 1;
        return CrashVerdict::Restart;
    }

    counter.count = counter.count.saturating_add(1);
    if counter.count <= counter.limit {
        return CrashVerdict::Restart;
    }

    match critical {
        true => CrashVerdict::RebootSystem,
        false => CrashVerdict::GiveUp,
    }
}

/// time source of the crash policy
pub trait Clock {
    /// monotonic seconds
    fn now_secs(&self) -> u64;
}

/// CLOCK_MONOTONIC
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_secs(&self) -> u64 {
        time_util::now_monotonic_sec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_crash_restarts() {
        let mut c = CrashCounter::new(2, 5);
        assert_eq!(classify(&mut c, false, 100), CrashVerdict::Restart);
        assert_eq!(c.count(), 1);
        assert_eq!(c.window_start(), 100);
    }

    #[test]
    fn test_limit_exceeded_inside_window() {
        let mut c = CrashCounter::new(2, 5);
        assert_eq!(classify(&mut c, false, 100), CrashVerdict::Restart);
        assert_eq!(classify(&mut c, false, 102), CrashVerdict::Restart);
        assert_eq!(classify(&mut c, false, 104), CrashVerdict::GiveUp);

        let mut c = CrashCounter::new(2, 5);
        classify(&mut c, true, 100);
        classify(&mut c, true, 101);
        assert_eq!(classify(&mut c, true, 102), CrashVerdict::RebootSystem);
    }

    #[test]
    fn test_window_expiry_resets() {
        let mut c = CrashCounter::new(2, 5);
        classify(&mut c, true, 100);
        classify(&mut c, true, 103);
        /* exactly at the window edge still counts */
        assert_eq!(classify(&mut c, true, 105), CrashVerdict::RebootSystem);

        let mut c = CrashCounter::new(2, 5);
        classify(&mut c, true, 100);
        classify(&mut c, true, 103);
        assert_eq!(classify(&mut c, true, 106), CrashVerdict::Restart);
        assert_eq!(c.count(), 1);
        assert_eq!(c.window_start(), 106);
    }

    #[test]
    fn test_reset() {
        let mut c = CrashCounter::default();
        classify(&mut c, false, 10);
        classify(&mut c, false, 11);
        c.reset();
        assert_eq!(c.count(), 0);
        assert_eq!(c.limit(), DEFAULT_CRASH_COUNT);
        assert_eq!(c.window_secs(), DEFAULT_CRASH_WINDOW_SEC);
        assert_eq!(classify(&mut c, false, 500), CrashVerdict::Restart);
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn test_zero_limit_gives_up_on_second_crash() {
        let mut c = CrashCounter::new(0, 240);
        assert_eq!(classify(&mut c, false, 1), CrashVerdict::Restart);
        assert_eq!(classify(&mut c, false, 2), CrashVerdict::GiveUp);
    }
}
