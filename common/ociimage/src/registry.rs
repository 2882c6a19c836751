// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use crate::{Digest, OciError};

/// The registry transport boundary. The builder only needs these three
/// operations; how they are satisfied (HTTP client, mirror, test double) is
/// the implementor's business.
pub trait RegistryClient {
    /// Fetches the manifest for `reference` (a tag or digest) as raw bytes.
    fn get_manifest(&self, repository: &str, reference: &str) -> Result<Vec<u8>, OciError>;

    /// Downloads a blob into `dest`.
    fn get_blob(&self, repository: &str, digest: &Digest, dest: &Path) -> Result<(), OciError>;

    /// Returns true if the registry has the blob.
    fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool, OciError>;
}

/// The client used when no network transport is wired up. Every operation
/// reports `NotImplemented`, which the builder surfaces as a download
/// failure; local tarballs and OCI layouts are unaffected.
#[derive(Debug, Default)]
pub struct OfflineRegistry;

impl RegistryClient for OfflineRegistry {
    fn get_manifest(&self, _repository: &str, _reference: &str) -> Result<Vec<u8>, OciError> {
        Err(OciError::NotImplemented("registry manifest download"))
    }

    fn get_blob(&self, _repository: &str, _digest: &Digest, _dest: &Path) -> Result<(), OciError> {
        Err(OciError::NotImplemented("registry blob download"))
    }

    fn blob_exists(&self, _repository: &str, _digest: &Digest) -> Result<bool, OciError> {
        Err(OciError::NotImplemented("registry blob probe"))
    }
}
