// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::Digest;

/// One cached blob, as reported by [`BlobCache::entries`]. The last-used
/// time is the file's mtime; an eviction policy could order by it, though
/// none is applied today.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub digest: Digest,
    pub size: u64,
    pub last_used: SystemTime,
    pub path: PathBuf,
}

/// A content-addressed blob store under `<root>/blobs/<algorithm>/<hash>`.
///
/// Presence of the file is the validity contract: a blob is written to a
/// temporary name and renamed into place, so a path that exists always holds
/// the complete bytes for its digest. There is no eviction; the operator
/// owns the cache directory's lifetime.
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The canonical on-disk location for a blob.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(&digest.algorithm)
            .join(&digest.hash)
    }

    /// Where a manifest fetched from a registry would be stored.
    pub fn manifest_path(&self, registry: &str, repository: &str, tag: &str) -> PathBuf {
        self.root
            .join("manifests")
            .join(registry)
            .join(repository)
            .join(tag)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Stores a blob and returns its path.
    pub fn put(&self, digest: &Digest, data: &[u8]) -> Result<PathBuf> {
        let path = self.blob_path(digest);
        let dir = path.parent().context("Blob path must have a parent")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Creating cache directory {} failed", dir.display()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .with_context(|| format!("Writing cache blob {} failed", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Committing cache blob {} failed", path.display()))?;
        Ok(path)
    }

    /// Lists every cached blob. Files whose names don't parse as digests
    /// (leftover temporaries, stray files) are ignored.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let blobs = self.root.join("blobs");
        let mut entries = Vec::new();
        let algorithms = match std::fs::read_dir(&blobs) {
            Ok(algorithms) => algorithms,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", blobs.display()))
            }
        };
        for algorithm in algorithms {
            let algorithm = algorithm?;
            let algorithm_name = algorithm.file_name().to_string_lossy().into_owned();
            for blob in std::fs::read_dir(algorithm.path())? {
                let blob = blob?;
                let Ok(digest) =
                    format!("{}:{}", algorithm_name, blob.file_name().to_string_lossy())
                        .parse::<Digest>()
                else {
                    continue;
                };
                let metadata = blob.metadata()?;
                entries.push(CacheEntry {
                    digest,
                    size: metadata.len(),
                    last_used: metadata.modified()?,
                    path: blob.path(),
                });
            }
        }
        Ok(entries)
    }

    /// Reads a blob back, or None if it has never been stored.
    pub fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(digest);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Reading cache blob {} failed", path.display()))
            }
        }
    }
}
