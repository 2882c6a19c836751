// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use syscalls::MsFlags;

use crate::ops::MountGuard;

/// Builds the overlayfs option string. Overlayfs treats the first lower
/// directory as the topmost layer, while callers pass layers bottom-up, so
/// the list is reversed here.
fn overlay_options(lower_dirs: &[&Path], upper_dir: &Path, work_dir: &Path) -> String {
    format!(
        "lowerdir={},upperdir={},workdir={}",
        lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .join(":"),
        upper_dir.display(),
        work_dir.display(),
    )
}

/// Mounts an overlayfs at `mount_dir`. This is a standalone helper for
/// keeping a writable layer over a read-only tree; the pivot pipeline itself
/// never calls it.
///
/// `work_dir` must be an empty directory on the same filesystem as
/// `upper_dir`.
pub fn mount_overlayfs(
    mount_dir: &Path,
    lower_dirs: &[&Path],
    upper_dir: &Path,
    work_dir: &Path,
) -> Result<MountGuard> {
    ensure!(
        !lower_dirs.is_empty(),
        "Mounting overlayfs with zero lower directories is not supported"
    );

    let options = overlay_options(lower_dirs, upper_dir, work_dir);
    syscalls::mount(
        Some(Path::new("overlay")),
        mount_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .with_context(|| format!("Failed to mount overlayfs at {}", mount_dir.display()))?;
    Ok(MountGuard::new(mount_dir))
}
