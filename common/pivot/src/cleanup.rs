// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

const RELEASE_POLL: Duration = Duration::from_millis(500);

/// Mount targets under `old_root`, deepest first so every mount is detached
/// before its parent.
fn submounts_below(mounts: &[mountutil::MountInfo], old_root: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = mounts
        .iter()
        .filter(|m| m.target.starts_with(old_root) && m.target != old_root)
        .map(|m| m.target.clone())
        .collect();
    targets.sort_by_key(|path| std::cmp::Reverse(path.as_os_str().len()));
    targets
}

/// Tears down the old root after a successful pivot. `old_root` is the
/// absolute path of the preserved mount as seen from the new root, e.g.
/// `/mnt/oldroot`.
///
/// Submounts are lazily detached deepest-first; per-path failures are
/// warnings because a busy mount must not block the exec that follows.
/// The old root itself is unmounted (lazily if necessary) and its
/// directory removed if possible.
pub fn cleanup_old_root(old_root: &Path) -> Result<()> {
    info!("Cleaning up old root at {}", old_root.display());
    let mounts = mountutil::read_mounts()?;

    for target in submounts_below(&mounts, old_root) {
        debug!("Detaching {}", target.display());
        if let Err(e) = mountutil::umount_detach(&target) {
            warn!("{:#}", e);
        }
    }

    if let Err(e) = mountutil::umount(old_root) {
        debug!("Plain unmount of old root failed ({:#}); detaching lazily", e);
        if let Err(e) = mountutil::umount_detach(old_root) {
            warn!("{:#}", e);
        }
    }
    if let Err(e) = std::fs::remove_dir(old_root) {
        debug!("Old root directory not removed: {}", e);
    }
    Ok(())
}

/// PIDs whose root link still points below `old_root`. While any exist, a
/// non-lazy unmount of the old root cannot succeed.
fn processes_holding_root(old_root: &Path) -> Vec<i32> {
    let Ok(processes) = processes::scan() else {
        return Vec::new();
    };
    processes
        .iter()
        .filter(|p| {
            let link = Path::new("/proc").join(p.pid.to_string()).join("root");
            match std::fs::read_link(link) {
                Ok(target) => target.starts_with(old_root),
                Err(_) => false,
            }
        })
        .map(|p| p.pid)
        .collect()
}

/// Like [`cleanup_old_root`], but first waits for processes rooted in the
/// old root to go away, polling up to `retries` times before forcing the
/// lazy detach anyway.
pub fn cleanup_old_root_graceful(old_root: &Path, retries: u32) -> Result<()> {
    for attempt in 0..retries {
        let holdouts = processes_holding_root(old_root);
        if holdouts.is_empty() {
            break;
        }
        debug!(
            "Waiting for {} processes still rooted in the old root (attempt {}/{}): {:?}",
            holdouts.len(),
            attempt + 1,
            retries,
            holdouts
        );
        std::thread::sleep(RELEASE_POLL);
    }
    cleanup_old_root(old_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    use mountutil::MountInfo;

    fn mount(target: &str) -> MountInfo {
        MountInfo {
            source: "none".to_string(),
            target: PathBuf::from(target),
            fstype: "tmpfs".to_string(),
            options: "rw".to_string(),
        }
    }

    #[test]
    fn selects_only_descendants() {
        let mounts = vec![
            mount("/"),
            mount("/proc"),
            mount("/mnt/oldroot"),
            mount("/mnt/oldroot/proc"),
            mount("/mnt/oldroot/sys"),
            mount("/mnt/oldroot-sibling"),
        ];
        let targets = submounts_below(&mounts, Path::new("/mnt/oldroot"));
        assert!(targets.contains(&PathBuf::from("/mnt/oldroot/proc")));
        assert!(targets.contains(&PathBuf::from("/mnt/oldroot/sys")));
        assert!(!targets.contains(&PathBuf::from("/mnt/oldroot")));
        assert!(!targets.contains(&PathBuf::from("/mnt/oldroot-sibling")));
        assert!(!targets.contains(&PathBuf::from("/proc")));
    }

    #[test]
    fn detaches_deepest_first() {
        let mounts = vec![
            mount("/old/dev"),
            mount("/old/dev/pts"),
            mount("/old/sys/kernel/debug"),
            mount("/old/sys"),
        ];
        let targets = submounts_below(&mounts, Path::new("/old"));
        assert_eq!(
            targets,
            vec![
                PathBuf::from("/old/sys/kernel/debug"),
                PathBuf::from("/old/dev/pts"),
                PathBuf::from("/old/dev"),
                PathBuf::from("/old/sys"),
            ]
        );
    }

    #[test]
    fn no_processes_hold_a_nonexistent_root() {
        assert!(processes_holding_root(Path::new("/nonexistent-xenomorph-old")).is_empty());
    }
}
