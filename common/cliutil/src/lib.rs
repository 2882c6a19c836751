// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Provides functions common to all Rust-based CLI programs.

mod logging;

pub use crate::logging::*;

use std::ffi::OsStr;
use std::fmt::Debug;
use std::process::{ExitCode, Termination};

use itertools::Itertools;

/// Logs the command line of the current process.
pub fn log_current_command_line() {
    let escaped_command = std::env::args()
        .map(|s| shell_escape::escape(s.into()))
        .join(" ");
    tracing::info!("COMMAND: {}", escaped_command);
}

/// Handles the top-level [`Result`] and returns the [`ExitCode`] to report.
/// Failures print a FATAL line to stderr and exit nonzero.
pub fn handle_top_level_result<T: Termination, E: Debug>(result: Result<T, E>) -> ExitCode {
    match result {
        Err(error) => {
            eprintln!("FATAL: {}: {:?}", get_current_process_name(), error);
            ExitCode::FAILURE
        }
        Ok(value) => value.report(),
    }
}

/// Returns the current process name, or `__unknown__` if it failed to get
/// one.
fn get_current_process_name() -> String {
    let current_exe = std::env::current_exe().unwrap_or_default();
    current_exe
        .file_name()
        .unwrap_or(OsStr::new("__unknown__"))
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ExitCode has no PartialEq; compare the Debug renderings.
    #[test]
    fn ok_result_reports_success() {
        assert_eq!(
            format!("{:?}", handle_top_level_result::<(), anyhow::Error>(Ok(()))),
            format!("{:?}", ExitCode::SUCCESS)
        );
    }
}
