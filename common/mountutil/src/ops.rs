// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use syscalls::{MntFlags, MsFlags};

use crate::table::is_mount_point;

/// A path that does not fit in a mount(2) argument.
#[derive(Debug, thiserror::Error)]
#[error("path exceeds PATH_MAX: {0}")]
pub struct PathTooLong(pub PathBuf);

fn check_path(path: &Path) -> Result<()> {
    if path.as_os_str().len() >= libc::PATH_MAX as usize {
        return Err(PathTooLong(path.to_path_buf()).into());
    }
    Ok(())
}

/// Bind-mounts `src` at `dst` (non-recursive).
pub fn bind(src: &Path, dst: &Path) -> Result<()> {
    check_path(src)?;
    check_path(dst)?;
    syscalls::mount(Some(src), dst, None, MsFlags::MS_BIND, None).with_context(|| {
        format!("Bind-mounting {} to {} failed", src.display(), dst.display())
    })
}

/// Bind-mounts `src` at `dst` together with all of its submounts.
pub fn rbind(src: &Path, dst: &Path) -> Result<()> {
    check_path(src)?;
    check_path(dst)?;
    syscalls::mount(
        Some(src),
        dst,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
    .with_context(|| {
        format!(
            "Recursive bind-mounting {} to {} failed",
            src.display(),
            dst.display()
        )
    })
}

/// Moves the mount at `src` to `dst`. The source must be a mount point and
/// must not live on a shared peer group.
pub fn move_mount(src: &Path, dst: &Path) -> Result<()> {
    check_path(src)?;
    check_path(dst)?;
    syscalls::mount(Some(src), dst, None, MsFlags::MS_MOVE, None).with_context(|| {
        format!("Moving mount {} to {} failed", src.display(), dst.display())
    })
}

/// Mounts a fresh tmpfs at `target`, capped at `size_bytes`.
pub fn mount_tmpfs(target: &Path, size_bytes: u64) -> Result<()> {
    check_path(target)?;
    let options = format!("size={},mode=0755", size_bytes);
    syscalls::mount(
        Some(Path::new("tmpfs")),
        target,
        Some("tmpfs"),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .with_context(|| format!("Mounting tmpfs at {} failed", target.display()))
}

/// Unmounts `target`, failing if it is busy.
pub fn umount(target: &Path) -> Result<()> {
    check_path(target)?;
    syscalls::umount2(target, MntFlags::empty())
        .with_context(|| format!("Unmounting {} failed", target.display()))
}

/// Lazily detaches the mount at `target`. The mount disappears from the
/// namespace immediately; the filesystem is released once the last user is
/// gone.
pub fn umount_detach(target: &Path) -> Result<()> {
    check_path(target)?;
    syscalls::umount2(target, MntFlags::MNT_DETACH)
        .with_context(|| format!("Detaching {} failed", target.display()))
}

/// Recursively marks `target` as a private mount so that mount events no
/// longer propagate out of this namespace.
pub fn make_private(target: &Path) -> Result<()> {
    check_path(target)?;
    syscalls::mount(
        None,
        target,
        None,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None,
    )
    .with_context(|| format!("Remounting {} as private failed", target.display()))
}

/// Recursively marks `target` as a shared mount.
pub fn make_shared(target: &Path) -> Result<()> {
    check_path(target)?;
    syscalls::mount(
        None,
        target,
        None,
        MsFlags::MS_SHARED | MsFlags::MS_REC,
        None,
    )
    .with_context(|| format!("Remounting {} as shared failed", target.display()))
}

/// Creates `path` and any missing parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Creating directory {} failed", path.display()))
}

/// Makes sure `path` is a mount point, bind-mounting it onto itself if it is
/// not one already. pivot_root requires its new root to be a mount point, so
/// a plain directory has to be promoted first.
pub fn ensure_mount_point(path: &Path) -> Result<()> {
    ensure_dir(path)?;
    if is_mount_point(path)? {
        return Ok(());
    }
    bind(path, path)
}

/// Unmounts a mount point on drop. Dropped guards use a lazy detach so that
/// lingering file descriptors cannot wedge cleanup.
#[must_use]
pub struct MountGuard {
    dir: Option<PathBuf>,
}

impl MountGuard {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
        }
    }

    // Forgets this mount point. After calling this method, it is your
    // responsibility to unmount it.
    pub fn leak(mut self) {
        self.dir = None;
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = umount_detach(&dir) {
                tracing::warn!("Failed to unmount {}: {:#}", dir.display(), e);
            }
        }
    }
}
