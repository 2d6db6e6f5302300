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

//! time constants and the monotonic clock
use std::mem::MaybeUninit;

///
pub const USEC_INFINITY: u64 = u64::MAX;
///
pub const USEC_PER_SEC: u64 = 1000000;
///
pub const USEC_PER_MSEC: u64 = 1000;
///
pub const NSEC_PER_SEC: u64 = 1000000000;
///
pub const NSEC_PER_USEC: u64 = 1000;

fn load_usec(ts: &libc::timespec) -> u64 {
    if ts.tv_sec < 0 || ts.tv_nsec < 0 {
        return USEC_INFINITY;
    }

    if (ts.tv_sec as u64) > (USEC_INFINITY - (ts.tv_nsec as u64) / NSEC_PER_USEC) / USEC_PER_SEC {
        return USEC_INFINITY;
    }

    (ts.tv_sec as u64) * USEC_PER_SEC + (ts.tv_nsec as u64) / NSEC_PER_USEC
}

/// CLOCK_MONOTONIC in microseconds
pub fn now_monotonic_usec() -> u64 {
    let mut tp = MaybeUninit::<libc::timespec>::zeroed();
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, tp.as_mut_ptr()) };
    if ret < 0 {
        return 0;
    }
    load_usec(unsafe { &tp.assume_init() })
}

/// CLOCK_MONOTONIC in whole seconds
pub fn now_monotonic_sec() -> u64 {
    now_monotonic_usec() / USEC_PER_SEC
}

/// convert an absolute usec value into a timespec
pub fn usec_to_timespec(usec: u64) -> libc::timespec {
    libc::timespec {
        tv_sec: (usec / USEC_PER_SEC) as libc::time_t,
        tv_nsec: ((usec % USEC_PER_SEC) * NSEC_PER_USEC) as libc::c_long,
    }
}
