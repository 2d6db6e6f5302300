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

//! Settings of the init process itself, loaded with confique.
#![allow(non_snake_case)]

use confique::{Config, FileFormat, Partial};
use log::LevelFilter;
use logger::LogTarget;
use std::path::PathBuf;

/// default location of the settings file
pub const SYSTEM_CONFIG: &str = "/etc/sysinit/system.toml";

#[derive(Config, Debug, Clone)]
pub struct InitConfig {
    #[config(default = "info")]
    pub LogLevel: String,
    #[config(default = "kmsg")]
    pub LogTarget: String,

    /// crashes tolerated inside one window before giving up
    #[config(default = 4)]
    pub DefaultCrashCount: u32,
    #[config(default = 240)]
    pub DefaultCrashWindowSec: u64,

    #[config(default = "/dev/pids/native")]
    pub CgroupRoot: String,
    #[config(default = 200)]
    pub CgroupCleanupDelayMs: u64,

    #[config(default = "/dev/unix/socket")]
    pub SocketDir: String,
    #[config(default = "/dev/unix/socket/fd_holder")]
    pub FdHolderSocket: String,
    #[config(default = "/etc/sysinit/services")]
    pub ServiceDir: String,
    #[config(default = "/dev/sysinit/status")]
    pub StatusDir: String,
}

impl InitConfig {
    /// load settings from `file` (or the default location), any failure
    /// falls back to the built-in defaults
    pub fn new(file: Option<&str>) -> InitConfig {
        type ConfigPartial = <InitConfig as Config>::Partial;
        let mut partial: ConfigPartial = match Partial::from_env() {
            Err(_) => return InitConfig::default(),
            Ok(v) => v,
        };
        partial = match confique::File::with_format(file.unwrap_or(SYSTEM_CONFIG), FileFormat::Toml)
            .load()
        {
            Err(e) => {
                log::debug!("Using default settings: {}", e);
                return InitConfig::default();
            }
            Ok(v) => partial.with_fallback(v),
        };
        partial = partial.with_fallback(ConfigPartial::default_values());
        match InitConfig::from_partial(partial) {
            Ok(v) => v,
            Err(_) => InitConfig::default(),
        }
    }

    ///
    pub fn log_level(&self) -> LevelFilter {
        self.LogLevel.parse().unwrap_or(LevelFilter::Info)
    }

    ///
    pub fn log_target(&self) -> LogTarget {
        self.LogTarget.parse().unwrap_or(LogTarget::Kmsg)
    }

    ///
    pub fn cgroup_root(&self) -> PathBuf {
        PathBuf::from(&self.CgroupRoot)
    }
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            LogLevel: "info".to_string(),
            LogTarget: "kmsg".to_string(),
            DefaultCrashCount: 4,
            DefaultCrashWindowSec: 240,
            CgroupRoot: "/dev/pids/native".to_string(),
            CgroupCleanupDelayMs: 200,
            SocketDir: "/dev/unix/socket".to_string(),
            FdHolderSocket: "/dev/unix/socket/fd_holder".to_string(),
            ServiceDir: "/etc/sysinit/services".to_string(),
            StatusDir: "/dev/sysinit/status".to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("system.toml");
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(f, "DefaultCrashCount = 2").unwrap();
        writeln!(f, "LogTarget = \"console\"").unwrap();
        drop(f);

        let config = InitConfig::new(file.to_str());
        assert_eq!(config.DefaultCrashCount, 2);
        assert_eq!(config.DefaultCrashWindowSec, 240);
        assert_eq!(config.log_target(), LogTarget::Console);
        assert_eq!(config.log_level(), LevelFilter::Info);
    }

    #[test]
    fn load_missing_file() {
        let config = InitConfig::new(Some("/nonexistent/system.toml"));
        assert_eq!(config.CgroupRoot, "/dev/pids/native");
        assert_eq!(config.CgroupCleanupDelayMs, 200);
    }
}
