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

//! SIGCHLD and SIGTERM, handled on the loop through a signalfd.
use crate::supervisor::{ExitStatus, ProcessSupervisor};
use event::{EventType, Events, Source};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::rc::Rc;

/// Collects exited children without blocking.
pub trait Reaper {
    /// one exited child, None once nothing is left to collect
    fn try_wait(&self) -> Option<(Pid, ExitStatus)>;
}

/// waitpid(-1, WNOHANG)
pub struct WaitpidReaper;

impl Reaper for WaitpidReaper {
    fn try_wait(&self) -> Option<(Pid, ExitStatus)> {
        loop {
            match wait::waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => return Some((pid, ExitStatus::Exited(code))),
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    return Some((pid, ExitStatus::Signaled(sig as i32)))
                }
                Ok(WaitStatus::StillAlive) => return None,
                Ok(status) => {
                    log::debug!("Ignoring wait status {:?}", status);
                    continue;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return None,
                Err(e) => {
                    log::error!("waitpid failed: {}", e);
                    return None;
                }
            }
        }
    }
}

/// Turns child exits into reaps and SIGTERM into an orderly shutdown.
pub struct SignalReactor {
    supervisor: Rc<ProcessSupervisor>,
    reaper: Box<dyn Reaper>,
}

impl SignalReactor {
    ///
    pub fn new(supervisor: Rc<ProcessSupervisor>, reaper: Box<dyn Reaper>) -> SignalReactor {
        SignalReactor { supervisor, reaper }
    }

    /// reap every child that already exited, returns how many were collected
    pub fn reap_children(&self) -> usize {
        let mut n = 0;
        while let Some((pid, status)) = self.reaper.try_wait() {
            n += 1;
            match self.supervisor.registry().find_by_pid(pid) {
                Some(service) => self.supervisor.reap(&service, status),
                None => log::debug!("Reaped unknown child {} ({})", pid, status),
            }
        }
        n
    }

    /// stop everything and reboot; the reboot path does the stopping
    pub fn terminate(&self) {
        log::info!("Received SIGTERM, stopping all services");
        self.supervisor.reboot_system("reboot");
    }

    fn handle(&self, signo: i32) {
        match Signal::try_from(signo) {
            Ok(Signal::SIGCHLD) => {
                self.reap_children();
            }
            Ok(Signal::SIGTERM) => self.terminate(),
            _ => log::debug!("Unexpected signal {}", signo),
        }
    }
}

impl Source for SignalReactor {
    fn event_type(&self) -> EventType {
        EventType::Signal
    }

    fn signals(&self) -> Vec<Signal> {
        vec![Signal::SIGCHLD, Signal::SIGTERM]
    }

    fn priority(&self) -> i8 {
        -50i8
    }

    fn dispatch(&self, e: &Events) -> i32 {
        while let Some(info) = e.read_signals() {
            self.handle(info.ssi_signo as i32);
        }
        0
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn description(&self) -> String {
        "signal reactor".to_string()
    }
}
