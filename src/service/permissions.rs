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

//! Identity and capabilities a service runs with
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Uid};

/// highest capability number known to this build (CAP_CHECKPOINT_RESTORE)
pub const CAP_LAST_CAP: u32 = 40;

const CAP_NAMES: [&str; (CAP_LAST_CAP + 1) as usize] = [
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// a set of capability numbers, bit n is capability n
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    bits: u64,
}

impl CapabilitySet {
    /// every known capability
    pub fn full() -> Self {
        CapabilitySet {
            bits: (1u64 << (CAP_LAST_CAP + 1)) - 1,
        }
    }

    ///
    pub fn empty() -> Self {
        CapabilitySet { bits: 0 }
    }

    /// add capability `cap`, out of range numbers are rejected
    pub fn add(&mut self, cap: u32) -> Result<(), String> {
        if cap > CAP_LAST_CAP {
            return Err(format!("capability {} out of range", cap));
        }
        self.bits |= 1u64 << cap;
        Ok(())
    }

    /// add a capability by name (`CAP_NET_ADMIN` or `net_admin`) or by number
    pub fn add_name(&mut self, name: &str) -> Result<(), String> {
        if let Ok(n) = name.parse::<u32>() {
            return self.add(n);
        }
        let upper = name.to_ascii_uppercase();
        let full = if upper.starts_with("CAP_") {
            upper
        } else {
            format!("CAP_{}", upper)
        };
        match CAP_NAMES.iter().position(|n| *n == full) {
            Some(n) => self.add(n as u32),
            None => Err(format!("unknown capability {}", name)),
        }
    }

    ///
    pub fn contains(&self, cap: u32) -> bool {
        cap <= CAP_LAST_CAP && self.bits & (1u64 << cap) != 0
    }

    /// raw 64-bit mask
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// the two 32-bit words capset(2) expects, low word first
    pub fn words(&self) -> [u32; 2] {
        [self.bits as u32, (self.bits >> 32) as u32]
    }
}

/// uid, ordered gid list (first one is primary), capabilities and umask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub uid: Uid,
    pub gids: Vec<Gid>,
    /// None leaves the inherited capabilities untouched
    pub capabilities: Option<CapabilitySet>,
    pub umask: Mode,
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions {
            uid: Uid::from_raw(0),
            gids: Vec::new(),
            capabilities: None,
            umask: Mode::from_bits_truncate(0o022),
        }
    }
}

impl Permissions {
    /// primary gid, the uid doubles as gid when no group was configured
    pub fn primary_gid(&self) -> Gid {
        match self.gids.first() {
            Some(g) => *g,
            None => Gid::from_raw(self.uid.as_raw()),
        }
    }

    /// supplementary groups
    pub fn supplementary(&self) -> &[Gid] {
        match self.gids.len() {
            0 => &[],
            _ => &self.gids[1..],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names() {
        let mut caps = CapabilitySet::empty();
        caps.add_name("CAP_NET_ADMIN").unwrap();
        caps.add_name("sys_boot").unwrap();
        caps.add_name("1").unwrap();
        assert!(caps.contains(12));
        assert!(caps.contains(22));
        assert!(caps.contains(1));
        assert!(!caps.contains(0));
        assert!(caps.add_name("CAP_FLY").is_err());
        assert!(caps.add(41).is_err());
    }

    #[test]
    fn test_capability_words() {
        let mut caps = CapabilitySet::empty();
        caps.add(0).unwrap();
        caps.add(CAP_LAST_CAP).unwrap();
        assert_eq!(caps.words(), [1, 1 << (CAP_LAST_CAP - 32)]);
        assert_eq!(CapabilitySet::full().bits().count_ones(), CAP_LAST_CAP + 1);
    }

    #[test]
    fn test_primary_gid() {
        let mut p = Permissions {
            uid: Uid::from_raw(1000),
            ..Default::default()
        };
        assert_eq!(p.primary_gid(), Gid::from_raw(1000));
        assert!(p.supplementary().is_empty());
        p.gids = vec![Gid::from_raw(1001), Gid::from_raw(1002)];
        assert_eq!(p.primary_gid(), Gid::from_raw(1001));
        assert_eq!(p.supplementary(), &[Gid::from_raw(1002)]);
    }
}
