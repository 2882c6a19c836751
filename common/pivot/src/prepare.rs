// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use syscalls::CloneFlags;
use tracing::{info, warn};

use crate::PivotError;

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Skip the rootfs sanity check (the caller already ran it, or really
    /// knows better).
    pub skip_verify: bool,
    /// Unshare into a new mount namespace first. Disabled only by tests and
    /// callers that already entered one.
    pub create_namespace: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            skip_verify: false,
            create_namespace: true,
        }
    }
}

#[derive(Debug)]
pub struct PrepareResult {
    /// The validated new root.
    pub new_root: PathBuf,
    /// Whether this stage created a mount namespace, so cleanup knows which
    /// mounts are namespace-scoped.
    pub namespace_created: bool,
}

struct Submount {
    src: &'static str,
    tgt: &'static str,
    /// A fresh filesystem to mount; None means rbind from `src`.
    fstype: Option<&'static str>,
    /// Missing sources of this entry are tolerated.
    optional: bool,
}

/// The kernel-facing directories the new root needs before anything in it
/// can run. /dev and /run are recursive binds from the current root; /proc
/// and /sys are fresh mounts. /run is optional since minimal systems don't
/// have it.
const ESSENTIAL_SUBMOUNTS: &[Submount] = &[
    Submount {
        src: "/dev",
        tgt: "dev",
        fstype: None,
        optional: false,
    },
    Submount {
        src: "/proc",
        tgt: "proc",
        fstype: Some("proc"),
        optional: false,
    },
    Submount {
        src: "/sys",
        tgt: "sys",
        fstype: Some("sysfs"),
        optional: false,
    },
    Submount {
        src: "/run",
        tgt: "run",
        fstype: None,
        optional: true,
    },
];

fn mount_essential(new_root: &Path) -> Result<()> {
    for submount in ESSENTIAL_SUBMOUNTS {
        let source = Path::new(submount.src);
        let target = new_root.join(submount.tgt);

        if submount.optional && !source.exists() {
            warn!("Skipping {}: source does not exist", submount.src);
            continue;
        }
        mountutil::ensure_dir(&target)?;

        let result = match submount.fstype {
            Some(fstype) => syscalls::mount(
                Some(source),
                &target,
                Some(fstype),
                syscalls::MsFlags::empty(),
                None,
            )
            .with_context(|| format!("Mounting {} at {} failed", fstype, target.display())),
            None => mountutil::rbind(source, &target),
        };

        match result {
            Ok(()) => {}
            Err(e) if submount.optional => {
                warn!("Optional submount {} failed: {:#}", submount.src, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Readies `new_root` for the pivot. Order matters: the mount namespace
/// must exist and the old namespace must be cut off (private propagation)
/// before any mount below leaks to the host, and pivot_root later requires
/// the new root to be a mount point.
///
/// Every failure here aborts before anything irreversible has happened;
/// exiting the process discards the namespace and all mounts in it.
pub fn prepare(new_root: &Path, options: &PrepareOptions) -> Result<PrepareResult> {
    if !options.skip_verify {
        let report = rootfs::verify(new_root);
        for warning in &report.warnings {
            warn!("New root: {}", warning);
        }
        if !report.valid {
            bail!(PivotError::PreparationFailed(format!(
                "{} is not a usable root filesystem: {}",
                new_root.display(),
                report.errors.join("; ")
            )));
        }
    }

    let mut namespace_created = false;
    if options.create_namespace {
        info!("Entering a new mount namespace");
        syscalls::unshare(CloneFlags::CLONE_NEWNS)
            .context("Failed to enter a mount namespace")?;
        // Remount everything private so our mounts never propagate back to
        // the host namespace.
        mountutil::make_private(Path::new("/"))?;
        namespace_created = true;
    }

    mountutil::ensure_mount_point(new_root)
        .with_context(|| format!("Failed to promote {} to a mount point", new_root.display()))?;

    mount_essential(new_root)?;

    Ok(PrepareResult {
        new_root: new_root.to_path_buf(),
        namespace_created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_invalid_root_before_touching_mounts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = prepare(dir.path(), &PrepareOptions::default()).unwrap_err();
        let prep = err
            .downcast_ref::<PivotError>()
            .expect("expected a preparation failure");
        assert!(matches!(prep, PivotError::PreparationFailed(_)));
        Ok(())
    }

    #[test]
    fn essential_submount_table_shape() {
        let targets: Vec<&str> = ESSENTIAL_SUBMOUNTS.iter().map(|s| s.tgt).collect();
        assert_eq!(targets, vec!["dev", "proc", "sys", "run"]);
        // Only /run may be absent.
        for submount in ESSENTIAL_SUBMOUNTS {
            assert_eq!(submount.optional, submount.tgt == "run", "{}", submount.tgt);
        }
        // /proc and /sys are fresh mounts, the rest are binds.
        assert_eq!(
            ESSENTIAL_SUBMOUNTS
                .iter()
                .filter(|s| s.fstype.is_some())
                .map(|s| s.fstype.unwrap())
                .collect::<Vec<_>>(),
            vec!["proc", "sysfs"]
        );
    }
}
