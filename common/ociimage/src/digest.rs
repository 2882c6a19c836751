// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use crate::OciError;

/// A content digest in `algorithm:hash` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: String,
    pub hash: String,
}

impl FromStr for Digest {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hash) = s
            .split_once(':')
            .ok_or_else(|| OciError::InvalidDigest(s.to_string()))?;
        if algorithm.is_empty() || hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(OciError::InvalidDigest(s.to_string()));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

impl Digest {
    pub fn is_sha256(&self) -> bool {
        self.algorithm == "sha256"
    }
}

/// Computes the sha256 of a file without loading it into memory.
pub fn sha256_of_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks a blob file against its descriptor digest. Only sha256 digests are
/// checked; other algorithms are accepted without verification. The hash
/// comparison is case-insensitive.
pub fn verify_blob(path: &Path, digest: &Digest) -> Result<(), OciError> {
    if !digest.is_sha256() {
        tracing::debug!("Skipping verification of non-sha256 digest {}", digest);
        return Ok(());
    }
    let actual = sha256_of_file(path)
        .map_err(|e| OciError::Download(format!("{}: {}", path.display(), e)))?;
    if !actual.eq_ignore_ascii_case(&digest.hash) {
        return Err(OciError::VerificationFailed {
            digest: digest.to_string(),
            actual,
        });
    }
    Ok(())
}
