// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// One row of `/proc/mounts`, read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
    pub options: String,
}

/// Parses the contents of `/proc/mounts`. Fields are separated by ASCII
/// spaces; only the leading four are meaningful here, the dump frequency and
/// fsck order are ignored. Lines with fewer than four fields are skipped.
pub fn parse_mounts(text: &str) -> Vec<MountInfo> {
    let mut mounts = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 4 {
            continue;
        }
        mounts.push(MountInfo {
            source: fields[0].to_string(),
            target: PathBuf::from(fields[1]),
            fstype: fields[2].to_string(),
            options: fields[3].to_string(),
        });
    }
    mounts
}

/// Returns a snapshot of the current mount table.
pub fn read_mounts() -> Result<Vec<MountInfo>> {
    let text = std::fs::read_to_string("/proc/mounts").context("Failed to read /proc/mounts")?;
    Ok(parse_mounts(&text))
}

/// Returns true if `path` appears as a mount target in `/proc/mounts`.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let path = match path.canonicalize() {
        Ok(path) => path,
        // A path that does not exist cannot be a mount point.
        Err(_) => return Ok(false),
    };
    Ok(read_mounts()?.iter().any(|m| m.target == path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/vda2 / ext4 rw,relatime 0 0
tmpfs /run tmpfs rw,nosuid,nodev,size=402092k,mode=755 0 0
corrupt-line
";

    #[test]
    fn parses_leading_fields() {
        let mounts = parse_mounts(SAMPLE);
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[0].source, "sysfs");
        assert_eq!(mounts[0].target, PathBuf::from("/sys"));
        assert_eq!(mounts[0].fstype, "sysfs");
        assert_eq!(mounts[0].options, "rw,nosuid,nodev,noexec,relatime");
        assert_eq!(mounts[2].source, "/dev/vda2");
        assert_eq!(mounts[2].target, PathBuf::from("/"));
    }

    #[test]
    fn skips_short_lines() {
        assert!(parse_mounts("a b\n\n").is_empty());
    }

    #[test]
    fn root_is_a_mount_point() -> Result<()> {
        assert!(is_mount_point(Path::new("/"))?);
        Ok(())
    }

    #[test]
    fn missing_path_is_not_a_mount_point() -> Result<()> {
        assert!(!is_mount_point(Path::new("/nonexistent-xenomorph-test"))?);
        Ok(())
    }
}
