// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use syscalls::MsFlags;
use tracing::{info, warn};

use crate::cleanup::cleanup_old_root;
use crate::PivotError;

/// Everything `execute` needs to commit the root switch.
#[derive(Debug, Clone)]
pub struct PivotConfig {
    /// Absolute path of the prepared new root.
    pub new_root: PathBuf,
    /// Where to keep the old root, relative to the new root (no leading
    /// slash), e.g. `mnt/oldroot`.
    pub old_root_mount: PathBuf,
    /// Command to exec after the switch. None leaves the caller running in
    /// the new root.
    pub exec_cmd: Option<String>,
    pub exec_args: Vec<String>,
    /// Leave the old root mounted for inspection instead of detaching it.
    pub keep_old_root: bool,
}

impl PivotConfig {
    /// The old root's location as seen from inside the new root.
    pub fn old_root_after_pivot(&self) -> PathBuf {
        Path::new("/").join(&self.old_root_mount)
    }
}

fn exec_replacement(cmd: &str, args: &[String]) -> PivotError {
    info!("Executing {} {:?}", cmd, args);
    let Ok(program) = CString::new(cmd) else {
        return PivotError::ExecFailed(cmd.to_string());
    };
    let mut argv = vec![program.clone()];
    for arg in args {
        match CString::new(arg.as_str()) {
            Ok(arg) => argv.push(arg),
            Err(_) => return PivotError::ExecFailed(cmd.to_string()),
        }
    }
    // execvp only returns on failure; the environment rides along as-is.
    match nix::unistd::execvp(&program, &argv) {
        Ok(infallible) => match infallible {},
        Err(errno) => {
            warn!("exec failed: {}", errno);
            PivotError::ExecFailed(cmd.to_string())
        }
    }
}

/// The busybox switch_root sequence: move the new root over `/` and chroot
/// into it. Works where pivot_root cannot (the running root is an initramfs
/// rootfs, which can never be unmounted), at the cost of not preserving the
/// old root anywhere.
fn switch_root(new_root: &Path) -> Result<()> {
    info!("Falling back to switch_root semantics");
    syscalls::chdir(new_root).map_err(PivotError::ChdirFailed)?;
    syscalls::mount(
        Some(Path::new(".")),
        Path::new("/"),
        None,
        MsFlags::MS_MOVE,
        None,
    )
    .context("Failed to move the new root over /")?;
    syscalls::chroot(Path::new(".")).map_err(PivotError::ChrootFailed)?;
    syscalls::chdir(Path::new("/")).map_err(PivotError::ChdirFailed)?;
    Ok(())
}

/// Commits the root switch. On success this function either execs (and
/// never returns) or returns `Ok(())` with the process already running on
/// the new root.
///
/// There is no rollback once pivot_root or the mount move has succeeded;
/// any later failure is terminal and the only recovery is a reboot.
pub fn execute(config: &PivotConfig) -> Result<()> {
    std::fs::read_dir(&config.new_root)
        .map_err(|_| PivotError::NewRootNotFound(config.new_root.clone()))?;

    let old_root_abs = config.new_root.join(&config.old_root_mount);
    std::fs::create_dir_all(&old_root_abs)
        .map_err(|_| PivotError::OldRootCreationFailed(old_root_abs.clone()))?;

    // Propagation must be private on both sides or pivot_root refuses with
    // EINVAL. Failures are survivable: the mounts may already be private.
    if let Err(e) = mountutil::make_private(Path::new("/")) {
        warn!("Failed to make / private: {:#}", e);
    }
    if let Err(e) = mountutil::make_private(&config.new_root) {
        warn!("Failed to make {} private: {:#}", config.new_root.display(), e);
    }

    info!(
        "pivot_root({}, {})",
        config.new_root.display(),
        old_root_abs.display()
    );
    match syscalls::pivot_root(&config.new_root, &old_root_abs) {
        Ok(()) => {
            syscalls::chdir(Path::new("/")).map_err(PivotError::ChdirFailed)?;
            if !config.keep_old_root {
                // Best-effort: a busy old root must not block the exec.
                if let Err(e) = cleanup_old_root(&config.old_root_after_pivot()) {
                    warn!("Old root cleanup failed: {:#}", e);
                }
            }
        }
        Err(e) => {
            // Typical when the current root is an initramfs: pivot_root
            // reports EINVAL because the root filesystem cannot be moved.
            warn!("pivot_root failed ({}); trying switch_root", e);
            switch_root(&config.new_root)?;
        }
    }

    if let Some(cmd) = &config.exec_cmd {
        // Only reached if exec itself failed.
        return Err(exec_replacement(cmd, &config.exec_args).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_new_root_is_detected_first() {
        let config = PivotConfig {
            new_root: PathBuf::from("/nonexistent-xenomorph-root"),
            old_root_mount: PathBuf::from("mnt/oldroot"),
            exec_cmd: None,
            exec_args: Vec::new(),
            keep_old_root: true,
        };
        let err = execute(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PivotError>(),
            Some(PivotError::NewRootNotFound(_))
        ));
    }

    #[test]
    fn old_root_location_is_rooted_after_pivot() {
        let config = PivotConfig {
            new_root: PathBuf::from("/tmp/newroot"),
            old_root_mount: PathBuf::from("mnt/oldroot"),
            exec_cmd: None,
            exec_args: Vec::new(),
            keep_old_root: true,
        };
        assert_eq!(config.old_root_after_pivot(), PathBuf::from("/mnt/oldroot"));
    }

    #[test]
    fn unreadable_new_root_reports_not_found() -> Result<()> {
        // A file is not a directory, so read_dir fails the same way.
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("plain");
        std::fs::write(&file, "")?;
        let config = PivotConfig {
            new_root: file,
            old_root_mount: PathBuf::from("mnt/oldroot"),
            exec_cmd: None,
            exec_args: Vec::new(),
            keep_old_root: true,
        };
        let err = execute(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PivotError>(),
            Some(PivotError::NewRootNotFound(_))
        ));
        Ok(())
    }
}
