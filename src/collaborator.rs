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

//! Side effects the supervisor delegates: rebooting, running restart
//! commands and sandboxing a child.
use crate::error::*;
use basic::process_util;
use nix::sys::reboot::{self, RebootMode};
use std::process::Command;

/// Brings the machine down.
pub trait Reboot {
    /// `reason` is "panic", "reboot" or "shutdown"; Err means the loop
    /// should exit instead
    fn exec_reboot(&self, reason: &str) -> Result<()>;
}

/// sync + reboot(2), only when running as PID 1
pub struct SystemReboot;

impl Reboot for SystemReboot {
    fn exec_reboot(&self, reason: &str) -> Result<()> {
        if !process_util::is_init() {
            return Err(Error::Resource {
                service: "init".to_string(),
                reason: format!("not pid 1, refusing to {}", reason),
            });
        }

        log::info!("Rebooting the system, reason: {}", reason);
        nix::unistd::sync();
        let mode = match reason {
            "shutdown" => RebootMode::RB_POWER_OFF,
            _ => RebootMode::RB_AUTOBOOT,
        };
        reboot::reboot(mode).context(NixSnafu)?;
        Ok(())
    }
}

/// Runs the restart commands of a service before it comes back.
pub trait CommandRunner {
    /// argv[0] is the program, the command is awaited
    fn run(&self, service: &str, argv: &[String]) -> Result<()>;
}

/// runs commands synchronously through std::process
pub struct ShellCommands;

impl CommandRunner for ShellCommands {
    fn run(&self, service: &str, argv: &[String]) -> Result<()> {
        let (program, args) = match argv.split_first() {
            None => {
                return Err(Error::Config {
                    service: service.to_string(),
                    reason: "empty restart command".to_string(),
                })
            }
            Some(v) => v,
        };

        let status = Command::new(program)
            .args(args)
            .status()
            .context(IoSnafu)?;
        if !status.success() {
            return Err(Error::Resource {
                service: service.to_string(),
                reason: format!("restart command {:?} exited with {}", argv, status),
            });
        }
        Ok(())
    }
}

/// Enters a sandbox in the forked child, right before exec.
///
/// Only async-signal-safe work is allowed in `enter`; a non-zero return is
/// ignored and the child execs unsandboxed.
pub trait SandboxHook {
    ///
    fn enter(&self, service: &str) -> i32;
}

/// no sandbox support on this system
pub struct NoSandbox;

impl SandboxHook for NoSandbox {
    fn enter(&self, _service: &str) -> i32 {
        0
    }
}
