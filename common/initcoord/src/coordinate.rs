// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::detect::{InitInfo, InitSystem};
use crate::CoordError;

const QUIESCENCE_POLL: Duration = Duration::from_millis(500);

/// Systemd targets the coordinator can isolate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SystemdTarget {
    Rescue,
    Emergency,
    MultiUser,
    Poweroff,
    Reboot,
}

impl SystemdTarget {
    pub fn unit(&self) -> String {
        format!("{}.target", self)
    }
}

fn run_vendor(cmd: &mut Command) -> Result<(), CoordError> {
    let status = processes::run(cmd)
        .map_err(|e| CoordError::CommandFailed(format!("{:?}: {:#}", cmd, e)))?;
    if !status.success() {
        return Err(CoordError::CommandFailed(format!(
            "{:?} exited with {}",
            cmd, status
        )));
    }
    Ok(())
}

/// Counts the non-empty lines of `systemctl list-jobs --no-legend` output.
fn count_pending_jobs(output: &str) -> usize {
    output.lines().filter(|line| !line.trim().is_empty()).count()
}

/// Drives the detected init system toward quiescence. All operations spawn
/// the init system's own tooling and inspect exit codes; nothing here talks
/// wire protocols.
pub struct Coordinator {
    info: InitInfo,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(info: InitInfo, timeout: Duration) -> Self {
        Self { info, timeout }
    }

    pub fn info(&self) -> &InitInfo {
        &self.info
    }

    /// The full coordination pass: enter rescue mode (falling back to a
    /// plain stop-all if that fails), then wait for pending work to drain.
    /// Only the quiescence timeout is surfaced; the caller decides whether
    /// to care.
    pub fn quiesce(&self) -> Result<()> {
        if let Err(e) = self.transition_to_rescue() {
            warn!("{:#}; stopping services directly instead", e);
            if let Err(e) = self.stop_all_services() {
                warn!("Stop-all also failed: {:#}", e);
            }
        }
        self.wait_for_quiescence()
    }

    /// Asks the init system to drop to its rescue / single-user mode.
    pub fn transition_to_rescue(&self) -> Result<(), CoordError> {
        info!("Transitioning {} to rescue mode", self.info.system);
        let result = match self.info.system {
            InitSystem::Systemd => self.isolate(SystemdTarget::Rescue),
            InitSystem::Openrc => run_vendor(Command::new("openrc").arg("single")),
            InitSystem::Sysvinit | InitSystem::Upstart => {
                run_vendor(Command::new("telinit").arg("1"))
            }
            InitSystem::Runit | InitSystem::S6 | InitSystem::Unknown => {
                warn!(
                    "No rescue transition known for init system {:?}; \
                     relying on process termination",
                    self.info.system
                );
                Ok(())
            }
        };
        result.map_err(|e| CoordError::TransitionFailed(e.to_string()))
    }

    /// `systemctl isolate <target>`.
    pub fn isolate(&self, target: SystemdTarget) -> Result<(), CoordError> {
        run_vendor(Command::new("systemctl").arg("isolate").arg(target.unit()))
    }

    /// Stops every service the init system manages.
    pub fn stop_all_services(&self) -> Result<(), CoordError> {
        match self.info.system {
            InitSystem::Systemd => {
                run_vendor(Command::new("systemctl").args(["stop", "--all"]))
            }
            InitSystem::Openrc => {
                run_vendor(Command::new("rc-service").args(["--all", "stop"]))
            }
            InitSystem::Sysvinit => run_vendor(Command::new("killall5").arg("-15")),
            _ => {
                warn!(
                    "No stop-all operation for init system {:?}",
                    self.info.system
                );
                Ok(())
            }
        }
    }

    /// How many jobs the init system still has in flight. Init systems
    /// without a job queue report zero.
    pub fn pending_jobs(&self) -> Result<usize, CoordError> {
        match self.info.system {
            InitSystem::Systemd => {
                let output = processes::check_output(
                    Command::new("systemctl").args(["list-jobs", "--no-legend"]),
                )
                .map_err(|e| CoordError::CommandFailed(format!("{:#}", e)))?;
                Ok(count_pending_jobs(&output))
            }
            _ => Ok(0),
        }
    }

    /// Polls until the init system reports no pending jobs, bounded by the
    /// coordinator timeout.
    pub fn wait_for_quiescence(&self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.pending_jobs() {
                Ok(0) => return Ok(()),
                Ok(jobs) => debug!("{} init jobs still pending", jobs),
                Err(e) => {
                    // Can't observe the queue; assume the terminator will
                    // have to do the work.
                    warn!("Failed to query pending jobs: {:#}", e);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(CoordError::Timeout(self.timeout).into());
            }
            std::thread::sleep(QUIESCENCE_POLL);
        }
    }
}
