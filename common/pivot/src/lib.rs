// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The commit pipeline: prepare a new root for pivoting, perform the pivot
//! (falling back to the switch_root sequence where pivot_root cannot work),
//! optionally tear down the old root, and exec the replacement command.
//!
//! Everything up to and including [`prepare`] is reversible by exiting the
//! process; nothing after a successful pivot_root or mount-move is.

mod cleanup;
mod execute;
mod prepare;

pub use cleanup::*;
pub use execute::*;
pub use prepare::*;

use std::path::PathBuf;

/// Failures on the commit path.
#[derive(Debug, thiserror::Error)]
pub enum PivotError {
    #[error("new root {0} does not exist or is not a directory")]
    NewRootNotFound(PathBuf),
    #[error("failed to create old-root mount point {0}")]
    OldRootCreationFailed(PathBuf),
    #[error("pivot_root failed")]
    PivotRootFailed(#[source] syscalls::SysError),
    #[error("chdir failed")]
    ChdirFailed(#[source] syscalls::SysError),
    #[error("chroot failed")]
    ChrootFailed(#[source] syscalls::SysError),
    #[error("exec of {0:?} returned")]
    ExecFailed(String),
    #[error("preparing the new root failed: {0}")]
    PreparationFailed(String),
}
