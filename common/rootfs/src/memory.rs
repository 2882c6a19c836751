// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ociimage::Compression;
use tracing::debug;

use crate::build::is_tarball_ref;

const MIB: u64 = 1024 * 1024;

/// Compressed tarballs tend to expand about threefold.
const COMPRESSED_EXPANSION: u64 = 3;

/// Floor for directory-based estimates; tiny trees still need scratch space
/// for extraction bookkeeping.
const DIRECTORY_FLOOR: u64 = 32 * MIB;

/// Registry images report no usable size up front.
const DEFAULT_REGISTRY_SIZE: u64 = 1024 * MIB;

/// Memory kept out of the budget no matter what the image needs.
const MIN_HEADROOM: u64 = 256 * MIB;

/// Not enough memory to hold the materialized root filesystem.
#[derive(Debug, thiserror::Error)]
#[error(
    "insufficient memory: need {required} bytes but only {usable} are usable \
     ({available} available minus {headroom} headroom)"
)]
pub struct InsufficientMemory {
    pub required: u64,
    pub available: u64,
    pub headroom: u64,
    pub usable: u64,
}

/// Estimates how many bytes of tmpfs the materialized image will need.
///
/// Tarballs scale their on-disk size by the expected compression ratio,
/// directories (OCI layouts and plain trees) take their recursive content
/// size plus half again, and registry references fall back to a fixed
/// default because nothing has been fetched yet.
pub fn estimate_image_size(image: &str) -> Result<u64> {
    let path = Path::new(image);
    if is_tarball_ref(image) {
        let size = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        let factor = match Compression::from_file_name(image) {
            Compression::None => 1,
            Compression::Gzip | Compression::Zstd => COMPRESSED_EXPANSION,
        };
        return Ok(size * factor);
    }
    if path.is_dir() {
        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(path) {
            let entry = entry?;
            if entry.file_type().is_file() {
                total += entry.metadata()?.len();
            }
        }
        return Ok((total + total / 2).max(DIRECTORY_FLOOR));
    }
    Ok(DEFAULT_REGISTRY_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub available: u64,
}

/// Parses `/proc/meminfo` content. Values are in kibibytes on the wire.
/// `MemAvailable` is preferred; old kernels without it get the classic
/// free + buffers + cached estimate.
pub fn parse_meminfo(text: &str) -> Result<MemInfo> {
    let mut fields = std::collections::HashMap::new();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(value) = rest.split_whitespace().next() else {
            continue;
        };
        if let Ok(value) = value.parse::<u64>() {
            fields.insert(key.to_string(), value * 1024);
        }
    }

    let total = *fields
        .get("MemTotal")
        .context("MemTotal missing from meminfo")?;
    let available = match fields.get("MemAvailable") {
        Some(available) => *available,
        None => {
            fields.get("MemFree").copied().unwrap_or(0)
                + fields.get("Buffers").copied().unwrap_or(0)
                + fields.get("Cached").copied().unwrap_or(0)
        }
    };
    Ok(MemInfo { total, available })
}

pub fn read_meminfo() -> Result<MemInfo> {
    let text =
        std::fs::read_to_string("/proc/meminfo").context("Failed to read /proc/meminfo")?;
    parse_meminfo(&text)
}

fn headroom_for(total: u64) -> u64 {
    (total / 10).max(MIN_HEADROOM)
}

/// Fails unless `required` bytes fit in memory after reserving headroom for
/// the rest of the system.
pub fn check_available_memory(required: u64) -> Result<()> {
    let meminfo = read_meminfo()?;
    let headroom = headroom_for(meminfo.total);
    let usable = meminfo.available.saturating_sub(headroom);
    debug!(
        "Memory budget: required={} available={} headroom={} usable={}",
        required, meminfo.available, headroom, usable
    );
    if required > usable {
        bail!(InsufficientMemory {
            required,
            available: meminfo.available,
            headroom,
            usable,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::extract::tests::{gzip, make_tar};

    const SAMPLE_MEMINFO: &str = "\
MemTotal:       16106536 kB
MemFree:         1181484 kB
MemAvailable:    9474900 kB
Buffers:          786420 kB
Cached:          7416716 kB
SwapTotal:             0 kB
";

    #[test]
    fn parses_meminfo_with_memavailable() -> Result<()> {
        let meminfo = parse_meminfo(SAMPLE_MEMINFO)?;
        assert_eq!(meminfo.total, 16106536 * 1024);
        assert_eq!(meminfo.available, 9474900 * 1024);
        Ok(())
    }

    #[test]
    fn falls_back_without_memavailable() -> Result<()> {
        let meminfo = parse_meminfo(
            "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 200 kB\n",
        )?;
        assert_eq!(meminfo.available, 350 * 1024);
        Ok(())
    }

    #[test]
    fn meminfo_without_total_is_an_error() {
        assert!(parse_meminfo("MemFree: 100 kB\n").is_err());
    }

    #[test]
    fn headroom_is_ten_percent_with_a_floor() {
        assert_eq!(headroom_for(100 * 1024 * MIB), 10 * 1024 * MIB);
        assert_eq!(headroom_for(1024 * MIB), MIN_HEADROOM);
    }

    #[test]
    fn estimates_scale_by_compression() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tar_bytes = make_tar(&[("etc", None), ("etc/a", Some("payload"))]);

        let plain = dir.path().join("root.tar");
        std::fs::write(&plain, &tar_bytes)?;
        assert_eq!(
            estimate_image_size(plain.to_str().unwrap())?,
            tar_bytes.len() as u64
        );

        let compressed = dir.path().join("root.tar.gz");
        let gz_bytes = gzip(&tar_bytes);
        std::fs::write(&compressed, &gz_bytes)?;
        assert_eq!(
            estimate_image_size(compressed.to_str().unwrap())?,
            gz_bytes.len() as u64 * COMPRESSED_EXPANSION
        );
        Ok(())
    }

    #[test]
    fn directory_estimate_has_a_floor() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("small"), "tiny")?;
        assert_eq!(estimate_image_size(dir.path().to_str().unwrap())?, DIRECTORY_FLOOR);
        Ok(())
    }

    #[test]
    fn registry_reference_gets_the_default() -> Result<()> {
        assert_eq!(estimate_image_size("alpine:latest")?, DEFAULT_REGISTRY_SIZE);
        Ok(())
    }
}
