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

//! sysinit, the init process
use basic::process_util;
use clap::Parser;
use log::LevelFilter;
use logger::LogTarget;
use std::path::Path;
use sysinit::config::{InitConfig, SYSTEM_CONFIG};
use sysinit::{Collaborators, Manager};

/// parse program arguments
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// settings file
    #[clap(long, default_value = SYSTEM_CONFIG)]
    config: String,

    /// directory of service descriptors, overrides the settings file
    #[clap(long)]
    services: Option<String>,

    /// log level, overrides the settings file
    #[clap(long)]
    log_level: Option<LevelFilter>,

    /// log target: console, kmsg, syslog or console-kmsg
    #[clap(long)]
    log_target: Option<LogTarget>,
}

fn main() {
    let args = Args::parse();
    let config = InitConfig::new(Some(&args.config));

    logger::init_log(
        "sysinit",
        args.log_level.unwrap_or_else(|| config.log_level()),
        args.log_target.unwrap_or_else(|| config.log_target()),
    );
    log::info!("sysinit starting, pid {}", nix::unistd::getpid());

    if let Err(e) = process_util::set_child_subreaper() {
        log::warn!("Failed to become child subreaper: {}", e);
    }

    let manager = match Manager::new(&config, Collaborators::system(&config)) {
        Ok(m) => m,
        Err(e) => {
            log::error!("Failed to set up the service manager: {}", e);
            leave(1)
        }
    };

    let dir = args.services.unwrap_or_else(|| config.ServiceDir.clone());
    match manager.load_services(Path::new(&dir), &config) {
        Ok(n) => log::info!("Loaded {} service(s) from {}", n, dir),
        Err(e) => log::error!("Failed to load services from {}: {}", dir, e),
    }

    manager.startup();
    if let Err(e) = manager.main_loop() {
        log::error!("Event loop failed: {}", e);
    }

    log::info!("sysinit leaving the event loop");
    manager.teardown();
    leave(0);
}

/// exit, unless this is pid 1 which must never return
fn leave(code: i32) -> ! {
    if process_util::is_init() {
        log::error!("Init has nothing left to do, parking");
        loop {
            nix::unistd::pause();
        }
    }
    std::process::exit(code)
}
