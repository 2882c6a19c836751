// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{Context, Result};

/// `/proc` is not mounted, so nothing about processes can be known.
#[derive(Debug, thiserror::Error)]
#[error("proc filesystem is not available at /proc")]
pub struct ProcNotAvailable;

/// A point-in-time snapshot of one process.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    /// Executable name from `stat`, without the parentheses.
    pub comm: String,
    /// Command line with NUL separators replaced by spaces; empty for
    /// kernel threads.
    pub cmdline: String,
    /// Single-character scheduler state (R, S, D, Z, ...).
    pub state: char,
    pub uid: u32,
    pub gid: u32,
}

impl ProcessInfo {
    /// Kernel threads hang off PID 0 or kthreadd (PID 2) and show a
    /// bracketed comm.
    pub fn is_kernel_thread(&self) -> bool {
        self.ppid == 0 || self.ppid == 2 || self.comm.starts_with('[')
    }

    pub fn is_self(&self) -> bool {
        self.pid == std::process::id() as i32
    }

    pub fn is_init(&self) -> bool {
        self.pid == 1
    }
}

/// Pulls comm, state, and ppid out of a `/proc/<pid>/stat` line. The comm
/// field is delimited by the first `(` and the *last* `)` because comm
/// itself may contain spaces and parentheses.
pub(crate) fn parse_stat(stat: &str) -> Result<(String, char, i32)> {
    let open = stat.find('(').context("stat line has no '('")?;
    let close = stat.rfind(')').context("stat line has no ')'")?;
    let comm = stat
        .get(open + 1..close)
        .context("stat comm field is out of bounds")?
        .to_string();

    let mut rest = stat
        .get(close + 1..)
        .context("stat line ends at comm")?
        .split_whitespace();
    let state = rest
        .next()
        .and_then(|s| s.chars().next())
        .context("stat line has no state field")?;
    let ppid: i32 = rest
        .next()
        .context("stat line has no ppid field")?
        .parse()
        .context("stat ppid is not a number")?;
    Ok((comm, state, ppid))
}

/// Pulls the real uid and gid out of `/proc/<pid>/status`.
pub(crate) fn parse_status_ids(status: &str) -> (u32, u32) {
    let field = |key: &str| -> Option<u32> {
        status
            .lines()
            .find(|line| line.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    (field("Uid:").unwrap_or(0), field("Gid:").unwrap_or(0))
}

/// Reads one process from `/proc`. Fails if the process vanished.
pub fn read_process(pid: i32) -> Result<ProcessInfo> {
    let proc_dir = Path::new("/proc").join(pid.to_string());

    let stat = std::fs::read_to_string(proc_dir.join("stat"))?;
    let (comm, state, ppid) = parse_stat(&stat)?;

    let cmdline = std::fs::read(proc_dir.join("cmdline"))
        .map(|bytes| {
            String::from_utf8_lossy(&bytes)
                .replace('\0', " ")
                .trim_end()
                .to_string()
        })
        .unwrap_or_default();

    let status = std::fs::read_to_string(proc_dir.join("status")).unwrap_or_default();
    let (uid, gid) = parse_status_ids(&status);

    Ok(ProcessInfo {
        pid,
        ppid,
        comm,
        cmdline,
        state,
        uid,
        gid,
    })
}

/// Snapshots every process currently visible in `/proc`. Processes that
/// exit mid-scan are skipped silently.
pub fn scan() -> Result<Vec<ProcessInfo>> {
    let entries = std::fs::read_dir("/proc").map_err(|_| ProcNotAvailable)?;
    let mut processes = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        if let Ok(info) = read_process(pid) {
            processes.push(info);
        }
    }
    Ok(processes)
}

/// Returns true if the process still has a `/proc` entry.
pub fn process_exists(pid: i32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_stat_line() -> Result<()> {
        let (comm, state, ppid) =
            parse_stat("1234 (bash) S 1 1234 1234 34816 1300 4194304 1000")?;
        assert_eq!(comm, "bash");
        assert_eq!(state, 'S');
        assert_eq!(ppid, 1);
        Ok(())
    }

    #[test]
    fn comm_may_contain_spaces_and_parens() -> Result<()> {
        let (comm, state, ppid) = parse_stat("987 ((sd-pam)) S 950 987 987 0 -1")?;
        assert_eq!(comm, "(sd-pam)");
        assert_eq!(state, 'S');
        assert_eq!(ppid, 950);

        let (comm, _, ppid) = parse_stat("55 (tmux: server) S 1 55 55 0 -1")?;
        assert_eq!(comm, "tmux: server");
        assert_eq!(ppid, 1);
        Ok(())
    }

    #[test]
    fn rejects_garbage_stat_lines() {
        assert!(parse_stat("1234 bash S 1").is_err());
        assert!(parse_stat("1234 (bash)").is_err());
    }

    #[test]
    fn parses_status_ids() {
        let status = "Name:\tbash\nUid:\t1000\t1000\t1000\t1000\nGid:\t1001\t1001\t1001\t1001\n";
        assert_eq!(parse_status_ids(status), (1000, 1001));
        assert_eq!(parse_status_ids(""), (0, 0));
    }

    #[test]
    fn kernel_thread_predicate() {
        let mut info = ProcessInfo {
            pid: 57,
            ppid: 2,
            comm: "kworker/0:1".to_string(),
            cmdline: String::new(),
            state: 'I',
            uid: 0,
            gid: 0,
        };
        assert!(info.is_kernel_thread());

        info.ppid = 1;
        assert!(!info.is_kernel_thread());

        info.comm = "[netns]".to_string();
        assert!(info.is_kernel_thread());
    }

    #[test]
    fn scan_sees_the_current_process() -> Result<()> {
        let me = std::process::id() as i32;
        let processes = scan()?;
        let this = processes
            .iter()
            .find(|p| p.pid == me)
            .context("self missing from scan")?;
        assert!(this.is_self());
        assert!(!this.cmdline.is_empty());
        assert!(process_exists(me));
        Ok(())
    }
}
