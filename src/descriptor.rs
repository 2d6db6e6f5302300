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

//! Service descriptors: TOML files under the service directory, each with
//! one or more `[[services]]` tables.
//!
//! ```toml
//! [[services]]
//! name = "netd"
//! path = ["/system/bin/netd", "-d"]
//! uid = "system"
//! gid = ["system", "inet"]
//! caps = ["NET_ADMIN", "NET_RAW"]
//! critical = true
//! crash_count = 2
//! importance = -10
//! cpucore = [0, 1]
//!
//! [[services.socket]]
//! name = "netd"
//! type = "dgram"
//! perm = "0660"
//! ```
use crate::config::InitConfig;
use crate::error::*;
use crate::service::{
    CapabilitySet, FileSpec, Permissions, Service, ServiceAttr, SocketSpec,
};
use nix::fcntl::OFlag;
use nix::sys::socket::SockType;
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Group, Uid, User};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// uid or gid, numeric or by name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdSpec {
    Id(u32),
    Name(String),
}

impl IdSpec {
    fn uid(&self, service: &str) -> Result<Uid> {
        match self {
            IdSpec::Id(id) => Ok(Uid::from_raw(*id)),
            IdSpec::Name(name) => match User::from_name(name) {
                Ok(Some(user)) => Ok(user.uid),
                _ => Err(Error::Config {
                    service: service.to_string(),
                    reason: format!("unknown user {}", name),
                }),
            },
        }
    }

    fn gid(&self, service: &str) -> Result<Gid> {
        match self {
            IdSpec::Id(id) => Ok(Gid::from_raw(*id)),
            IdSpec::Name(name) => match Group::from_name(name) {
                Ok(Some(group)) => Ok(group.gid),
                _ => Err(Error::Config {
                    service: service.to_string(),
                    reason: format!("unknown group {}", name),
                }),
            },
        }
    }
}

impl Default for IdSpec {
    fn default() -> Self {
        IdSpec::Id(0)
    }
}

/// `[[services.socket]]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SocketDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub perm: Option<String>,
    pub uid: IdSpec,
    pub gid: IdSpec,
    pub passcred: bool,
}

/// `[[services.file]]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub flags: Vec<String>,
    pub perm: Option<String>,
    pub uid: IdSpec,
    pub gid: IdSpec,
}

/// one `[[services]]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceDescriptor {
    pub name: String,
    pub path: Vec<String>,
    pub uid: Option<IdSpec>,
    pub gid: Vec<IdSpec>,
    pub caps: Option<Vec<String>>,
    pub umask: Option<String>,

    pub once: bool,
    pub important: bool,
    pub critical: bool,
    pub disabled: bool,
    pub console: bool,
    pub dynamic: bool,
    pub ondemand: bool,
    pub sandbox: bool,

    pub importance: i32,
    pub cpucore: Vec<usize>,

    pub crash_count: Option<u32>,
    pub crash_window: Option<u64>,
    pub cgroup: bool,
    pub writepid: Vec<PathBuf>,
    pub restart_commands: Vec<Vec<String>>,
    pub socket: Vec<SocketDescriptor>,
    pub file: Vec<FileDescriptor>,
}

/// content of one descriptor file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceFile {
    pub services: Vec<ServiceDescriptor>,
}

fn octal(service: &str, what: &str, value: &Option<String>, default: u32) -> Result<u32> {
    match value {
        None => Ok(default),
        Some(v) => u32::from_str_radix(v.trim_start_matches("0o"), 8).map_err(|_| Error::Config {
            service: service.to_string(),
            reason: format!("invalid {} {}", what, v),
        }),
    }
}

fn socket_type(service: &str, kind: &str) -> Result<SockType> {
    match kind {
        "stream" => Ok(SockType::Stream),
        "dgram" => Ok(SockType::Datagram),
        "seqpacket" => Ok(SockType::SeqPacket),
        _ => Err(Error::Config {
            service: service.to_string(),
            reason: format!("invalid socket type {}", kind),
        }),
    }
}

fn open_flags(service: &str, flags: &[String]) -> Result<OFlag> {
    let mut oflag = OFlag::empty();
    for f in flags {
        oflag |= match f.as_str() {
            "rd" | "rdonly" => OFlag::O_RDONLY,
            "wr" | "wronly" => OFlag::O_WRONLY,
            "rdwr" => OFlag::O_RDWR,
            "append" => OFlag::O_APPEND,
            "trunc" => OFlag::O_TRUNC,
            _ => {
                return Err(Error::Config {
                    service: service.to_string(),
                    reason: format!("invalid file flag {}", f),
                })
            }
        };
    }
    Ok(oflag)
}

impl ServiceDescriptor {
    fn attrs(&self) -> ServiceAttr {
        let mut attrs = ServiceAttr::empty();
        for (set, attr) in [
            (self.once, ServiceAttr::ONCE),
            (self.important, ServiceAttr::IMPORTANT),
            (self.critical, ServiceAttr::CRITICAL),
            (self.disabled, ServiceAttr::DISABLED),
            (self.console, ServiceAttr::CONSOLE),
            (self.dynamic, ServiceAttr::DYNAMIC),
            (self.ondemand, ServiceAttr::ONDEMAND),
            (self.sandbox, ServiceAttr::SANDBOXED),
        ] {
            if set {
                attrs |= attr;
            }
        }
        attrs
    }

    fn permissions(&self) -> Result<Permissions> {
        let name = self.name.as_str();
        let mut perms = Permissions::default();
        if let Some(uid) = &self.uid {
            perms.uid = uid.uid(name)?;
        }
        perms.gids = self
            .gid
            .iter()
            .map(|g| g.gid(name))
            .collect::<Result<Vec<_>>>()?;
        if let Some(caps) = &self.caps {
            let mut set = CapabilitySet::empty();
            for cap in caps {
                set.add_name(cap).map_err(|reason| Error::Config {
                    service: name.to_string(),
                    reason,
                })?;
            }
            perms.capabilities = Some(set);
        }
        perms.umask = Mode::from_bits_truncate(octal(name, "umask", &self.umask, 0o022)?);
        Ok(perms)
    }

    /// build the service; unset crash limits come from the init settings
    pub fn into_service(&self, defaults: &InitConfig) -> Result<Service> {
        let name = self.name.as_str();
        if name.is_empty() {
            return Err(Error::Config {
                service: String::new(),
                reason: "missing service name".to_string(),
            });
        }

        let sockets = self
            .socket
            .iter()
            .map(|s| {
                Ok(SocketSpec {
                    name: s.name.clone(),
                    kind: socket_type(name, &s.kind)?,
                    perm: octal(name, "socket perm", &s.perm, 0o660)?,
                    uid: s.uid.uid(name)?,
                    gid: s.gid.gid(name)?,
                    passcred: s.passcred,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let files = self
            .file
            .iter()
            .map(|f| {
                Ok(FileSpec {
                    path: f.path.clone(),
                    flags: open_flags(name, &f.flags)?,
                    perm: octal(name, "file perm", &f.perm, 0o600)?,
                    uid: f.uid.uid(name)?,
                    gid: f.gid.gid(name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if !(-20..=19).contains(&self.importance) {
            return Err(Error::Config {
                service: name.to_string(),
                reason: format!("importance {} not between -20 and 19", self.importance),
            });
        }

        let crash_count = self.crash_count.unwrap_or(defaults.DefaultCrashCount);
        let crash_window = self.crash_window.unwrap_or(defaults.DefaultCrashWindowSec);

        Ok(Service::new(name, self.path.clone())
            .with_attrs(self.attrs())
            .with_permissions(self.permissions()?)
            .with_crash_limit(crash_count, crash_window)
            .with_cgroup(self.cgroup)
            .with_importance(self.importance)
            .with_cpu_cores(self.cpucore.clone())
            .with_sockets(sockets)
            .with_files(files)
            .with_write_pid(self.writepid.clone())
            .with_restart_commands(self.restart_commands.clone()))
    }
}

/// parse one descriptor file
pub fn parse(content: &str, path: &Path) -> Result<ServiceFile> {
    toml::from_str(content).context(TomlDeSnafu {
        path: path.to_string_lossy().to_string(),
    })
}

/// every service of the `*.toml` files in dir, in file name order
///
/// A broken file or service is logged and skipped.
pub fn load_dir(dir: &Path, defaults: &InitConfig) -> Result<Vec<Service>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .context(IoSnafu)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut services = Vec::new();
    for path in paths {
        let file = match fs::read_to_string(&path)
            .context(IoSnafu)
            .and_then(|c| parse(&c, &path))
        {
            Ok(f) => f,
            Err(e) => {
                log::error!("Skipping service file {:?}: {}", path, e);
                continue;
            }
        };

        for desc in file.services {
            match desc.into_service(defaults) {
                Ok(s) => services.push(s),
                Err(e) => log::error!("Skipping service in {:?}: {}", path, e),
            }
        }
    }
    Ok(services)
}
