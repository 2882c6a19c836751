// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::{Duration, Instant};

use anyhow::Result;
use syscalls::Signal;
use tracing::{debug, info, warn};

use crate::essential::is_essential;
use crate::scan::{process_exists, scan};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct TerminateOptions {
    /// How long processes get to exit after SIGTERM.
    pub graceful_timeout_ms: u64,
    /// How long to wait after SIGKILL before declaring a process stubborn.
    pub forceful_timeout_ms: u64,
    /// Leave essential processes (device, logging, network, storage
    /// daemons) alone.
    pub skip_essential: bool,
    /// Additional PIDs to leave alone.
    pub exclude_pids: Vec<i32>,
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: 5000,
            forceful_timeout_ms: 2000,
            skip_essential: true,
            exclude_pids: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TerminateReport {
    /// Processes that are gone: graceful exits plus SIGKILLed ones.
    pub terminated_count: usize,
    /// Processes that needed SIGKILL.
    pub killed_count: usize,
    /// Processes that survived even SIGKILL (usually stuck in D state).
    pub stubborn_pids: Vec<i32>,
}

fn signal_each(pids: &[i32], signal: Signal) {
    for &pid in pids {
        if let Err(e) = syscalls::kill(pid, signal) {
            // The process may simply have exited already.
            debug!("Failed to send {} to {}: {}", signal, pid, e);
        }
    }
}

fn wait_for_exit(pids: &[i32], timeout: Duration) -> Vec<i32> {
    let deadline = Instant::now() + timeout;
    loop {
        let alive: Vec<i32> = pids.iter().copied().filter(|&pid| process_exists(pid)).collect();
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Terminates exactly the given PIDs: SIGTERM to all, a grace period, then
/// SIGKILL for the holdouts. Per-PID signal failures are logged and
/// skipped; they never abort the sweep.
pub fn terminate_pids(pids: &[i32], options: &TerminateOptions) -> TerminateReport {
    if pids.is_empty() {
        return TerminateReport::default();
    }

    info!("Sending SIGTERM to {} processes", pids.len());
    signal_each(pids, Signal::SIGTERM);

    let survivors = wait_for_exit(pids, Duration::from_millis(options.graceful_timeout_ms));
    let graceful = pids.len() - survivors.len();

    if !survivors.is_empty() {
        info!("Sending SIGKILL to {} survivors: {:?}", survivors.len(), survivors);
        signal_each(&survivors, Signal::SIGKILL);
    }

    std::thread::sleep(Duration::from_millis(options.forceful_timeout_ms));
    let stubborn: Vec<i32> = survivors
        .iter()
        .copied()
        .filter(|&pid| process_exists(pid))
        .collect();
    if !stubborn.is_empty() {
        warn!("Processes survived SIGKILL: {:?}", stubborn);
    }

    TerminateReport {
        terminated_count: graceful + survivors.len(),
        killed_count: survivors.len(),
        stubborn_pids: stubborn,
    }
}

/// Picks the PIDs that are safe to stop out of a process snapshot: not
/// init, not a kernel thread, not this process or its parent, not excluded,
/// and (unless disabled) not essential.
fn select_targets(
    processes: &[crate::ProcessInfo],
    options: &TerminateOptions,
    parent_pid: i32,
) -> Vec<i32> {
    processes
        .iter()
        .filter(|p| {
            !p.is_init()
                && !p.is_kernel_thread()
                && !p.is_self()
                && p.pid != parent_pid
                && !options.exclude_pids.contains(&p.pid)
                && !(options.skip_essential && is_essential(p))
        })
        .map(|p| p.pid)
        .collect()
}

/// Scans the system and terminates everything [`select_targets`] deems safe
/// to stop.
pub fn terminate_all(options: &TerminateOptions) -> Result<TerminateReport> {
    let parent = std::os::unix::process::parent_id() as i32;
    let targets = select_targets(&scan()?, options, parent);
    debug!("Termination targets: {:?}", targets);
    Ok(terminate_pids(&targets, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::process::{Child, Command};

    use anyhow::Context;

    fn spawn_sleeper(ignore_sigterm: bool) -> Result<Child> {
        let script = if ignore_sigterm {
            "trap '' TERM; while :; do sleep 0.1; done"
        } else {
            "while :; do sleep 0.1; done"
        };
        let child = Command::new("sh").arg("-c").arg(script).spawn()?;
        // Give the shell a moment to install the trap.
        std::thread::sleep(Duration::from_millis(200));
        Ok(child)
    }

    fn fast_options() -> TerminateOptions {
        TerminateOptions {
            graceful_timeout_ms: 500,
            forceful_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Reaps the child from a background thread. A terminated direct child
    /// lingers in /proc as a zombie until waited on, which would confuse
    /// the existence probe; on a live system the terminated processes are
    /// init's children and init reaps them.
    fn reap_in_background(mut child: Child) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let _ = child.wait();
        })
    }

    #[test]
    fn cooperative_process_exits_gracefully() -> Result<()> {
        let child = spawn_sleeper(false)?;
        let pid = child.id() as i32;
        let reaper = reap_in_background(child);

        let report = terminate_pids(&[pid], &fast_options());
        assert_eq!(report.terminated_count, 1);
        assert_eq!(report.killed_count, 0);
        assert!(report.stubborn_pids.is_empty());

        reaper.join().unwrap();
        Ok(())
    }

    #[test]
    fn sigterm_ignorer_is_killed_not_stubborn() -> Result<()> {
        let child = spawn_sleeper(true)?;
        let pid = child.id() as i32;
        let reaper = reap_in_background(child);

        let report = terminate_pids(&[pid], &fast_options());
        assert!(report.killed_count >= 1);
        assert!(report.terminated_count >= 1);
        assert!(!report.stubborn_pids.contains(&pid));

        reaper.join().unwrap();
        Ok(())
    }

    #[test]
    fn selection_never_includes_init_self_or_essentials() {
        let mk = |pid: i32, ppid: i32, comm: &str| crate::ProcessInfo {
            pid,
            ppid,
            comm: comm.to_string(),
            cmdline: String::new(),
            state: 'S',
            uid: 0,
            gid: 0,
        };
        let me = std::process::id() as i32;
        let snapshot = vec![
            mk(1, 0, "systemd"),
            mk(2, 0, "kthreadd"),
            mk(64, 2, "kworker/1:0"),
            mk(me, 400, "xenomorph"),
            mk(400, 1, "login"),
            mk(700, 1, "systemd-journald"),
            mk(800, 1, "nginx"),
            mk(900, 1, "postgres"),
        ];

        let targets = select_targets(&snapshot, &fast_options(), 400);
        assert_eq!(targets, vec![800, 900]);

        // Exclusions are honored, and disabling skip_essential still never
        // touches PID 1, kernel threads, or this process.
        let options = TerminateOptions {
            skip_essential: false,
            exclude_pids: vec![900],
            ..fast_options()
        };
        let targets = select_targets(&snapshot, &options, 400);
        assert_eq!(targets, vec![700, 800]);
    }

    #[test]
    fn empty_target_set_is_a_no_op() {
        let report = terminate_pids(&[], &fast_options());
        assert_eq!(report.terminated_count, 0);
        assert_eq!(report.killed_count, 0);
    }

    #[test]
    fn already_dead_pid_counts_as_terminated() -> Result<()> {
        let mut child = spawn_sleeper(false)?;
        let pid = child.id() as i32;
        syscalls::kill(pid, Signal::SIGKILL).context("seed kill failed")?;
        child.wait()?;

        let report = terminate_pids(&[pid], &fast_options());
        assert_eq!(report.terminated_count, 1);
        assert_eq!(report.killed_count, 0);
        Ok(())
    }
}
