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

//! process helpers for the init process
use crate::error::*;
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};

/// whether we are running as the first process of the pid namespace
pub fn is_init() -> bool {
    unistd::getpid() == Pid::from_raw(1)
}

/// make orphaned descendants reparent to us instead of the real pid 1
pub fn set_child_subreaper() -> Result<()> {
    let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if ret < 0 {
        return Err(Error::Syscall {
            syscall: "prctl(PR_SET_CHILD_SUBREAPER)",
            ret,
            errno: Errno::last() as i32,
        });
    }
    Ok(())
}

/// check whether pid still exists (zombies included)
pub fn alive(pid: Pid) -> bool {
    if pid.as_raw() <= 0 {
        return false;
    }
    !matches!(signal::kill(pid, None), Err(Errno::ESRCH))
}

/// send sig to pid, ESRCH is not an error
pub fn kill_quiet(pid: Pid, sig: Signal) -> Result<()> {
    match signal::kill(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Nix { source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive() {
        assert!(alive(unistd::getpid()));
        assert!(!alive(Pid::from_raw(-1)));
        assert!(!is_init());
    }

    #[test]
    fn test_kill_quiet_missing_pid() {
        // pid_max never reaches this value
        assert!(kill_quiet(Pid::from_raw(i32::MAX), Signal::SIGKILL).is_ok());
    }
}
