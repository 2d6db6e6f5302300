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

//! Error define for the supervision core.
//!
//! Every failure is either contained to one service or escalated through the
//! reboot path; nothing here is allowed to terminate the init process.
pub use nix::errno::Errno;
use snafu::prelude::*;
#[allow(unused_imports)]
pub use snafu::ResultExt;

/// sysinit Error
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[non_exhaustive]
pub enum Error {
    /// bad path/uid/gid, the service is flagged INVALID
    #[snafu(display("Invalid config of service '{}': {}", service, reason))]
    Config { service: String, reason: String },

    /// fork, console, fd or cmsg failure, contained to the operation
    #[snafu(display("Resource error of service '{}': {}", service, reason))]
    Resource { service: String, reason: String },

    /// rejected fd-holder request
    #[snafu(display("{}", reason))]
    Protocol { reason: String },

    #[snafu(display("Service '{}' crashed too often, giving up", service))]
    CrashLoop { service: String },

    #[snafu(display("Service '{}' not found", service))]
    NotFound { service: String },

    #[snafu(display("Timed out waiting for service '{}'", service))]
    Timeout { service: String },

    #[snafu(display("IoError: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("NixError: {}", source))]
    Nix { source: nix::Error },

    #[snafu(display("EventError: {}", source))]
    Event { source: event::Error },

    #[snafu(display("CgroupError: {}", source))]
    Cgroup { source: cgroup::error::Error },

    #[snafu(display("UtilError: {}", source))]
    Util { source: basic::Error },

    #[snafu(display("Confique error: {}", source))]
    Confique { source: confique::Error },

    #[snafu(display("Toml error in {}: {}", path, source))]
    TomlDe {
        path: String,
        source: toml::de::Error,
    },
}

/// new Result
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::Config {
            service: "netd".to_string(),
            reason: "/system/bin/netd does not exist".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Invalid config of service 'netd': /system/bin/netd does not exist"
        );
        let e = Error::Protocol {
            reason: "Invalid service".to_string(),
        };
        assert_eq!(e.to_string(), "Invalid service");
    }
}
