// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// The configuration for the logger. Logs go to stderr; `RUST_LOG`
/// overrides the default level.
pub struct LoggingConfig {
    /// Log at debug level by default instead of info.
    pub verbose: bool,
}

impl LoggingConfig {
    /// Sets up the process-wide tracing subscriber. Call once, before any
    /// pipeline work.
    pub fn setup(self) -> Result<()> {
        let default_level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();
        tracing_subscriber::fmt()
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context(
                "Failed to start tracing. You probably already have a log subscriber running.",
            )?;
        Ok(())
    }
}
