// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ociimage::Compression;

/// Prefix marking a deletion entry in a layer: `.wh.<name>` removes the
/// sibling `<name>` from the accumulated tree.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker making its directory opaque: everything accumulated from lower
/// layers is dropped, content from this layer onward stays.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Whiteout {
    /// Remove the entry (file or directory) at this path.
    Remove(PathBuf),
    /// Clear the accumulated contents of this directory.
    Opaque(PathBuf),
}

/// Layer tars commonly prefix every member with `./`.
fn normalize(path: &Path) -> PathBuf {
    path.strip_prefix(".").unwrap_or(path).to_path_buf()
}

fn whiteout_for(path: &Path) -> Option<Whiteout> {
    let name = path.file_name()?.to_str()?;
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    if name == OPAQUE_MARKER {
        Some(Whiteout::Opaque(parent.to_path_buf()))
    } else {
        name.strip_prefix(WHITEOUT_PREFIX)
            .map(|victim| Whiteout::Remove(parent.join(victim)))
    }
}

fn open_archive(blob: &Path, compression: Compression) -> Result<tar::Archive<Box<dyn Read>>> {
    let file =
        File::open(blob).with_context(|| format!("Failed to open layer {}", blob.display()))?;
    let decoded: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        Compression::Zstd => Box::new(
            zstd::stream::read::Decoder::new(file)
                .with_context(|| format!("Failed to decode layer {}", blob.display()))?,
        ),
        Compression::None => Box::new(file),
    };
    let mut archive = tar::Archive::new(decoded);
    archive.set_preserve_permissions(true);
    // chown only works as root; everyone else gets the extracting user.
    archive.set_preserve_ownerships(nix::unistd::Uid::effective().is_root());
    Ok(archive)
}

fn remove_dir_contents(dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn apply_whiteout(target: &Path, whiteout: &Whiteout) -> Result<()> {
    match whiteout {
        Whiteout::Remove(rel) => {
            let victim = target.join(rel);
            match std::fs::symlink_metadata(&victim) {
                Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(&victim)
                    .with_context(|| format!("Failed to remove {}", victim.display()))?,
                Ok(_) => std::fs::remove_file(&victim)
                    .with_context(|| format!("Failed to remove {}", victim.display()))?,
                // Nothing below to delete; the marker is simply dropped.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to inspect {}", victim.display()))
                }
            }
        }
        Whiteout::Opaque(rel) => {
            let dir = target.join(rel);
            if dir.is_dir() {
                remove_dir_contents(&dir)
                    .with_context(|| format!("Failed to clear {}", dir.display()))?;
            }
        }
    }
    Ok(())
}

/// Extracts one layer blob into `target`.
///
/// When `apply_whiteouts` is set, the blob is decoded twice: the first pass
/// collects the layer's whiteout entries and applies the deletions to the
/// accumulated tree, the second pass unpacks everything else. Running the
/// deletions first keeps an opaque directory from swallowing files the same
/// layer writes into it, whatever order the tar happens to store them in.
/// Whiteout markers never reach the target tree.
pub fn extract_layer(
    blob: &Path,
    compression: Compression,
    target: &Path,
    apply_whiteouts: bool,
) -> Result<()> {
    if apply_whiteouts {
        let mut whiteouts = Vec::new();
        let mut archive = open_archive(blob, compression)?;
        for entry in archive.entries()? {
            let entry = entry?;
            let path = normalize(&entry.path()?);
            if let Some(whiteout) = whiteout_for(&path) {
                whiteouts.push(whiteout);
            }
        }
        for whiteout in &whiteouts {
            tracing::debug!("Applying whiteout {:?}", whiteout);
            apply_whiteout(target, whiteout)?;
        }
    }

    let mut archive = open_archive(blob, compression)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = normalize(&entry.path()?);
        if apply_whiteouts && whiteout_for(&path).is_some() {
            continue;
        }
        if !entry.unpack_in(target)? {
            tracing::warn!("Skipped layer entry escaping the target: {:?}", path);
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::io::Write;

    use flate2::write::GzEncoder;

    /// Builds an uncompressed tar from (path, contents) pairs. A None
    /// contents makes a directory entry.
    pub(crate) fn make_tar(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            match contents {
                Some(data) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(data.len() as u64);
                    header.set_mode(0o755);
                    builder
                        .append_data(&mut header, path, data.as_bytes())
                        .unwrap();
                }
                None => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    builder.append_data(&mut header, path, std::io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn whiteout_classification() {
        assert_eq!(
            whiteout_for(Path::new("etc/.wh.a")),
            Some(Whiteout::Remove(PathBuf::from("etc/a")))
        );
        assert_eq!(
            whiteout_for(Path::new("etc/.wh..wh..opq")),
            Some(Whiteout::Opaque(PathBuf::from("etc")))
        );
        assert_eq!(whiteout_for(Path::new("etc/passwd")), None);
        // A top-level marker has an empty parent.
        assert_eq!(
            whiteout_for(Path::new(".wh.boot")),
            Some(Whiteout::Remove(PathBuf::from("boot")))
        );
    }

    #[test]
    fn extracts_a_plain_layer() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blob = dir.path().join("layer.tar");
        std::fs::write(
            &blob,
            make_tar(&[
                ("etc", None),
                ("etc/hostname", Some("axiom\n")),
                ("bin", None),
                ("bin/sh", Some("#!/bin/true\n")),
            ]),
        )?;

        let target = dir.path().join("root");
        std::fs::create_dir(&target)?;
        extract_layer(&blob, Compression::None, &target, true)?;

        assert_eq!(std::fs::read_to_string(target.join("etc/hostname"))?, "axiom\n");
        assert!(target.join("bin/sh").is_file());
        Ok(())
    }

    #[test]
    fn whiteout_removes_lower_entry() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("root");
        std::fs::create_dir(&target)?;

        let lower = dir.path().join("lower.tar");
        std::fs::write(
            &lower,
            make_tar(&[("etc", None), ("etc/a", Some("a")), ("etc/b", Some("b"))]),
        )?;
        extract_layer(&lower, Compression::None, &target, true)?;

        let upper = dir.path().join("upper.tar.gz");
        std::fs::write(&upper, gzip(&make_tar(&[("etc", None), ("etc/.wh.a", Some(""))])))?;
        extract_layer(&upper, Compression::Gzip, &target, true)?;

        assert!(!target.join("etc/a").exists());
        assert_eq!(std::fs::read_to_string(target.join("etc/b"))?, "b");
        assert!(!target.join("etc/.wh.a").exists());
        Ok(())
    }

    #[test]
    fn opaque_marker_clears_lower_content_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("root");
        std::fs::create_dir(&target)?;

        let lower = dir.path().join("lower.tar");
        std::fs::write(
            &lower,
            make_tar(&[
                ("opt", None),
                ("opt/old", Some("old")),
                ("opt/sub", None),
                ("opt/sub/deep", Some("deep")),
            ]),
        )?;
        extract_layer(&lower, Compression::None, &target, true)?;

        // The upper layer replaces /opt wholesale and writes a new file into
        // it; tar order puts the new file before the marker on purpose.
        let upper = dir.path().join("upper.tar");
        std::fs::write(
            &upper,
            make_tar(&[
                ("opt", None),
                ("opt/new", Some("new")),
                ("opt/.wh..wh..opq", Some("")),
            ]),
        )?;
        extract_layer(&upper, Compression::None, &target, true)?;

        assert!(!target.join("opt/old").exists());
        assert!(!target.join("opt/sub").exists());
        assert_eq!(std::fs::read_to_string(target.join("opt/new"))?, "new");
        assert!(!target.join("opt/.wh..wh..opq").exists());
        Ok(())
    }

    #[test]
    fn whiteouts_can_be_left_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("root");
        std::fs::create_dir(&target)?;

        let blob = dir.path().join("layer.tar");
        std::fs::write(&blob, make_tar(&[("etc", None), ("etc/.wh.a", Some(""))]))?;
        extract_layer(&blob, Compression::None, &target, false)?;

        assert!(target.join("etc/.wh.a").exists());
        Ok(())
    }

    #[test]
    fn whiteout_for_missing_entry_is_harmless() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("root");
        std::fs::create_dir(&target)?;

        let blob = dir.path().join("layer.tar");
        std::fs::write(&blob, make_tar(&[("etc", None), ("etc/.wh.ghost", Some(""))]))?;
        extract_layer(&blob, Compression::None, &target, true)?;
        assert!(!target.join("etc/ghost").exists());
        Ok(())
    }
}
