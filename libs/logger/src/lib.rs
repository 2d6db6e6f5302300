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

//! log backends for the init process
//!
//! PID 1 starts before syslog exists, so the kernel ring buffer is the
//! default sink; the console and /dev/log can be combined with it.
use basic::time_util::{now_monotonic_usec, USEC_PER_SEC};
use log::{Level, LevelFilter, Log};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    os::unix::net::UnixDatagram,
    path::Path,
    sync::Mutex,
};

/// where log records go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// stdout with a monotonic timestamp
    Console,
    /// /dev/kmsg
    Kmsg,
    /// /dev/log
    Syslog,
    /// console and kmsg at once
    ConsoleKmsg,
}

impl std::str::FromStr for LogTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(LogTarget::Console),
            "kmsg" => Ok(LogTarget::Kmsg),
            "syslog" => Ok(LogTarget::Syslog),
            "console-kmsg" => Ok(LogTarget::ConsoleKmsg),
            _ => Err(format!("unknown log target: {}", s)),
        }
    }
}

/// syslog severity of a log level
fn severity(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

fn format_console(record: &log::Record, now_usec: u64) -> String {
    format!(
        "[{:>5}.{:06}] {:<5} {} {}\n",
        now_usec / USEC_PER_SEC,
        now_usec % USEC_PER_SEC,
        record.level(),
        record.module_path().unwrap_or("unknown"),
        record.args()
    )
}

/// `<pri>app[pid]: msg`, the kernel adds its own timestamp
fn format_prefixed(app_name: &str, facility: u8, record: &log::Record) -> String {
    format!(
        "<{}>{}[{}]: {}\n",
        (facility << 3) | severity(record.level()),
        app_name,
        std::process::id(),
        record.args()
    )
}

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let msg = format_console(record, now_monotonic_usec());
        let _ = std::io::stdout().write_all(msg.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

struct KmsgLogger {
    app_name: String,
    kmsg: Mutex<File>,
}

impl KmsgLogger {
    fn open(app_name: &str, path: &Path) -> Result<Self, std::io::Error> {
        let kmsg = OpenOptions::new().write(true).open(path)?;
        Ok(Self {
            app_name: app_name.to_string(),
            kmsg: Mutex::new(kmsg),
        })
    }
}

impl Log for KmsgLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let msg = format_prefixed(&self.app_name, 0, record);
        if let Ok(mut kmsg) = self.kmsg.lock() {
            /* one write per record, kmsg splits records on write boundaries */
            let _ = kmsg.write_all(msg.as_bytes());
        }
    }

    fn flush(&self) {}
}

struct SysLogger {
    app_name: String,
    dgram: Mutex<UnixDatagram>,
}

impl SysLogger {
    fn connect(app_name: &str) -> Result<Self, std::io::Error> {
        let sock = UnixDatagram::unbound()?;
        sock.connect("/dev/log")?;
        Ok(Self {
            app_name: app_name.to_string(),
            dgram: Mutex::new(sock),
        })
    }
}

impl Log for SysLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        /* LOG_DAEMON */
        let msg = format_prefixed(&self.app_name, 3, record);
        if let Ok(dgram) = self.dgram.lock() {
            let _ = dgram.send(msg.trim_end().as_bytes());
        }
    }

    fn flush(&self) {}
}

struct CombinedLogger {
    loggers: Vec<Box<dyn Log>>,
}

impl Log for CombinedLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        for logger in &self.loggers {
            logger.log(record);
        }
    }

    fn flush(&self) {
        for logger in &self.loggers {
            logger.flush();
        }
    }
}

impl CombinedLogger {
    fn empty() -> Self {
        Self {
            loggers: Vec::new(),
        }
    }

    fn push(&mut self, logger: Box<dyn Log>) {
        self.loggers.push(logger)
    }
}

fn build(app_name: &str, target: LogTarget) -> CombinedLogger {
    let mut logger = CombinedLogger::empty();

    if matches!(target, LogTarget::Console | LogTarget::ConsoleKmsg) {
        logger.push(Box::new(ConsoleLogger));
    }

    if matches!(target, LogTarget::Kmsg | LogTarget::ConsoleKmsg) {
        match KmsgLogger::open(app_name, Path::new("/dev/kmsg")) {
            Ok(l) => logger.push(Box::new(l)),
            Err(e) => eprintln!("Failed to open /dev/kmsg: {}", e),
        }
    }

    if target == LogTarget::Syslog {
        match SysLogger::connect(app_name) {
            Ok(l) => logger.push(Box::new(l)),
            Err(e) => eprintln!("Failed to connect to /dev/log: {}", e),
        }
    }

    /* never leave the process without any sink */
    if logger.loggers.is_empty() {
        logger.push(Box::new(ConsoleLogger));
    }
    logger
}

/// Init and set the logger
///
/// [`app_name`]: which app output the log
///
/// level:  maximum log level
///
/// target: log target
pub fn init_log(app_name: &str, level: LevelFilter, target: LogTarget) {
    if let Err(e) = log::set_boxed_logger(Box::new(build(app_name, target))) {
        eprintln!("Failed to set logger: {:?}", e);
    }
    log::set_max_level(level);
}

/// Init and set the log target to console
pub fn init_log_to_console(app_name: &str, level: LevelFilter) {
    init_log(app_name, level, LogTarget::Console);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn record<'a>(level: Level, args: std::fmt::Arguments<'a>) -> log::Record<'a> {
        log::Record::builder()
            .level(level)
            .module_path(Some("sysinit::supervisor"))
            .args(args)
            .build()
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("kmsg".parse::<LogTarget>(), Ok(LogTarget::Kmsg));
        assert_eq!(
            "console-kmsg".parse::<LogTarget>(),
            Ok(LogTarget::ConsoleKmsg)
        );
        assert!("file".parse::<LogTarget>().is_err());
    }

    #[test]
    fn test_format_console() {
        let msg = format_console(
            &record(Level::Warn, format_args!("svc crashed")),
            3 * USEC_PER_SEC + 42,
        );
        assert_eq!(
            msg,
            "[    3.000042] WARN  sysinit::supervisor svc crashed\n"
        );
    }

    #[test]
    fn test_format_prefixed_priority() {
        let msg = format_prefixed("init", 3, &record(Level::Error, format_args!("boom")));
        assert!(msg.starts_with("<27>init["));
        assert!(msg.ends_with("]: boom\n"));
    }

    #[test]
    fn test_kmsg_logger_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kmsg");
        File::create(&path).unwrap();
        let logger = KmsgLogger::open("init", &path).unwrap();
        logger.log(&record(Level::Info, format_args!("started")));
        logger.log(&record(Level::Debug, format_args!("reaped")));

        let mut content = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("<6>init["));
        assert!(lines[1].starts_with("<7>init["));
    }
}
