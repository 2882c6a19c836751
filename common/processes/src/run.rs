// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::process::{Command, ExitStatus};

use anyhow::{bail, Context, Result};
use signal_hook::consts::signal::{SIGCHLD, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use syscalls::Signal;
use tracing::instrument;

// run runs a child process, with some special signal handling:
//   - Forwards SIGTERM to the child process
//   - Ignores SIGINT while the process is running. SIGINT is normally
//     generated by the terminal when Ctrl+C is pressed and is sent to every
//     process in the foreground process group, so the child already receives
//     it by default.
#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run(cmd: &mut Command) -> Result<ExitStatus> {
    // Register the signal handler before spawning the process to ensure we
    // don't drop any signals.
    let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTERM])?;

    let mut child = cmd.spawn().with_context(|| format!("Failed to spawn {:?}", cmd))?;

    for signal in signals.forever() {
        match signal {
            SIGCHLD => match &child.try_wait()? {
                Some(status) => return Ok(*status),
                None => continue,
            },
            SIGINT => {}
            SIGTERM => syscalls::kill(child.id().try_into()?, Signal::SIGTERM)?,
            _ => unreachable!(),
        }
    }
    unreachable!()
}

/// Runs a command and returns its stdout as a string. A non-zero exit is an
/// error carrying whatever the command wrote to stderr.
#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn check_output(cmd: &mut Command) -> Result<String> {
    let output = cmd
        .output()
        .with_context(|| format!("Failed to spawn {:?}", cmd))?;
    if !output.status.success() {
        bail!(
            "Command {:?} failed with {}: {}",
            cmd,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
