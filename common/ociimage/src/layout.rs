// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Digest, ImageIndex, OciError};

/// The marker file distinguishing an OCI layout directory from any other
/// directory.
pub const LAYOUT_MARKER: &str = "oci-layout";

/// The entry point of a layout.
pub const INDEX_FILE: &str = "index.json";

/// Returns true if `dir` looks like an OCI image layout.
pub fn is_layout(dir: &Path) -> bool {
    dir.join(LAYOUT_MARKER).is_file()
}

/// Reads and parses `index.json` from a layout directory.
pub fn read_index(layout: &Path) -> Result<ImageIndex> {
    let path = layout.join(INDEX_FILE);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("Failed to read image index {}", path.display()))?;
    let index: ImageIndex = serde_json::from_slice(&bytes)
        .map_err(OciError::ManifestParse)
        .with_context(|| format!("Failed to parse image index {}", path.display()))?;
    Ok(index)
}

/// The blob location inside a layout directory.
pub fn blob_path(layout: &Path, digest: &Digest) -> PathBuf {
    layout
        .join("blobs")
        .join(&digest.algorithm)
        .join(&digest.hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::Result;

    #[test]
    fn detects_layout_marker() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!is_layout(dir.path()));
        std::fs::write(
            dir.path().join(LAYOUT_MARKER),
            br#"{"imageLayoutVersion": "1.0.0"}"#,
        )?;
        assert!(is_layout(dir.path()));
        Ok(())
    }

    #[test]
    fn reads_index_and_resolves_blob_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join(INDEX_FILE),
            br#"{
                "schemaVersion": 2,
                "manifests": [
                    {
                        "mediaType": "application/vnd.oci.image.manifest.v1+json",
                        "digest": "sha256:ab12",
                        "size": 120
                    }
                ]
            }"#,
        )?;
        let index = read_index(dir.path())?;
        assert_eq!(index.manifests.len(), 1);

        let digest: Digest = index.manifests[0].digest.parse()?;
        assert_eq!(
            blob_path(dir.path(), &digest),
            dir.path().join("blobs/sha256/ab12")
        );
        Ok(())
    }
}
