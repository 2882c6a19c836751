// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Detects the active init system and asks it to wind the machine down to a
//! quiescent state before processes are terminated. Everything here is
//! advisory: failures are reported but the pipeline's authoritative stopper
//! is the process terminator.

mod coordinate;
mod detect;

pub use coordinate::*;
pub use detect::*;

/// Coordination failures. These are warnings at the pipeline level.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("init system did not become quiescent within {0:?}")]
    Timeout(std::time::Duration),
    #[error("vendor command failed: {0}")]
    CommandFailed(String),
    #[error("runlevel transition failed: {0}")]
    TransitionFailed(String),
}
