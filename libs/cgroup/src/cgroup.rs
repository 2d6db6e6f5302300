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

use crate::error::*;
use crate::CgFlags;
use nix::sys::signal::Signal;
use nix::libc;
use nix::sys::statfs::{statfs, FsType};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use walkdir::WalkDir;

#[cfg(target_env = "musl")]
type FsTypeT = libc::c_ulong;

#[cfg(not(target_env = "musl"))]
type FsTypeT = libc::c_long;

/// the file listing the member processes of a cgroup
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// create the cgroup directory, parents included.
pub fn cg_create(cg_path: &Path) -> Result<()> {
    log::debug!("cgroup create path {:?}", cg_path);
    fs::create_dir_all(cg_path).context(IoSnafu)?;
    Ok(())
}

/// attach the pid to the cgroup by appending it to cgroup.procs
pub fn cg_attach(pid: Pid, cg_path: &Path) -> Result<()> {
    log::debug!("attach pid {} to path {:?}", pid, cg_path);
    if !cg_path.is_dir() {
        return Err(Error::NotADirectory {
            path: cg_path.to_string_lossy().to_string(),
        });
    }

    let p = if pid == Pid::from_raw(0) {
        nix::unistd::getpid()
    } else {
        pid
    };

    let mut file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(cg_path.join(CGROUP_PROCS))
        .context(IoSnafu)?;
    file.write_all(format!("{}\n", p).as_bytes())
        .context(IoSnafu)?;

    Ok(())
}

fn get_pids(cg_path: &Path) -> Result<Vec<Pid>> {
    let file = fs::File::open(cg_path.join(CGROUP_PROCS)).context(IoSnafu)?;

    let reader = BufReader::new(file);
    let mut pids = Vec::new();
    for line in reader.lines() {
        let line = line.context(IoSnafu)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        pids.push(Pid::from_raw(line.parse::<i32>().context(ParseIntSnafu)?));
    }

    Ok(pids)
}

/// return all the pids in the cg_path, read from cgroup.procs.
pub fn cg_get_pids(cg_path: &Path) -> Vec<Pid> {
    get_pids(cg_path).unwrap_or_default()
}

/// send signal to every process of the cgroup except those in `pids`.
///
/// Processes that vanished meanwhile are skipped. Returns the pids that were
/// signalled.
pub fn cg_kill(cg_path: &Path, signal: Signal, flags: CgFlags, pids: HashSet<Pid>) -> Result<Vec<Pid>> {
    let cur_pid = nix::unistd::getpid();
    let mut killed = Vec::new();

    for pid in get_pids(cg_path)? {
        if pid.as_raw() <= 0 || pids.contains(&pid) {
            continue;
        }
        if flags.contains(CgFlags::IGNORE_SELF) && cur_pid == pid {
            continue;
        }

        log::debug!(
            "kill pid {} in cgroup {:?} with signal {}",
            pid,
            cg_path,
            signal
        );
        match nix::sys::signal::kill(pid, signal) {
            Ok(_) => killed.push(pid),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => {
                log::warn!("Failed to kill {} in {:?}: {}", pid, cg_path, e);
            }
        }
    }

    if flags.contains(CgFlags::REMOVE) {
        cg_remove(cg_path)?;
    }

    Ok(killed)
}

fn is_cgroupfs(path: &Path) -> bool {
    match statfs(path) {
        Ok(st) => {
            let t = st.filesystem_type();
            t == FsType(libc::CGROUP_SUPER_MAGIC as FsTypeT)
                || t == FsType(libc::CGROUP2_SUPER_MAGIC as FsTypeT)
        }
        Err(_) => false,
    }
}

fn remove_dir_retry(path: &Path) -> Result<()> {
    /* Sometimes there are still tasks in cg_path, and rmdir will return EBUSY,
     * we wait 10 us for 10 times. */
    let mut try_times = 0;
    loop {
        let e = match fs::remove_dir(path) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        match e.raw_os_error() {
            Some(libc_errno) if libc_errno == libc::ENOENT => return Ok(()),
            Some(libc_errno) if libc_errno == libc::EBUSY && try_times < 10 => {
                std::thread::sleep(std::time::Duration::from_micros(10));
                try_times += 1;
            }
            _ => return Err(Error::Io { source: e }),
        }
    }
}

/// remove the cgroup directory and its sub cgroups, a missing directory is fine.
///
/// On a real cgroup hierarchy only directories may be removed, the control
/// files disappear with them. Anywhere else the files are deleted first.
pub fn cg_remove(cg_path: &Path) -> Result<()> {
    if !cg_path.exists() {
        return Ok(());
    }
    if !cg_path.is_dir() {
        return Err(Error::NotADirectory {
            path: cg_path.to_string_lossy().to_string(),
        });
    }

    let pseudo = is_cgroupfs(cg_path);
    for entry in WalkDir::new(cg_path).contents_first(true) {
        let entry = entry.context(WalkDirSnafu)?;
        if entry.file_type().is_dir() {
            remove_dir_retry(entry.path())?;
        } else if !pseudo {
            match fs::remove_file(entry.path()) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(Error::Io { source: e })
                }
                _ => {}
            }
        }
    }

    log::debug!("Successfully removed {:?}", cg_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    #[test]
    fn test_attach_and_get_pids() {
        let dir = tempfile::tempdir().unwrap();
        let cg = dir.path().join("svc").join("pid_100");
        cg_create(&cg).unwrap();
        cg_attach(Pid::from_raw(100), &cg).unwrap();
        cg_attach(Pid::from_raw(101), &cg).unwrap();
        assert_eq!(
            cg_get_pids(&cg),
            vec![Pid::from_raw(100), Pid::from_raw(101)]
        );
        assert!(cg_get_pids(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_attach_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ret = cg_attach(Pid::from_raw(1), &dir.path().join("nope"));
        assert!(matches!(ret, Err(Error::NotADirectory { .. })));
    }

    #[test]
    fn test_kill_spares_listed_pids() {
        let dir = tempfile::tempdir().unwrap();
        let cg = dir.path().join("svc");
        cg_create(&cg).unwrap();

        let mut orphan = Command::new("sleep").arg("30").spawn().unwrap();
        let orphan_pid = Pid::from_raw(orphan.id() as i32);
        let me = nix::unistd::getpid();
        cg_attach(me, &cg).unwrap();
        cg_attach(orphan_pid, &cg).unwrap();

        let killed = cg_kill(&cg, Signal::SIGKILL, CgFlags::IGNORE_SELF, HashSet::new()).unwrap();
        assert_eq!(killed, vec![orphan_pid]);
        let status = orphan.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cg = dir.path().join("svc").join("pid_7");
        cg_create(&cg.join("child")).unwrap();
        cg_attach(Pid::from_raw(7), &cg).unwrap();

        cg_remove(&cg).unwrap();
        assert!(!cg.exists());
        cg_remove(&cg).unwrap();
        assert!(dir.path().join("svc").exists());
    }
}
