// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The OCI side of the rootfs builder: image reference parsing, the media
//! object model (index, manifest, config), digests, the on-disk blob cache,
//! and the registry client boundary.

mod cache;
mod digest;
mod layout;
mod media;
mod reference;
mod registry;

pub use cache::*;
pub use digest::*;
pub use layout::*;
pub use media::*;
pub use reference::*;
pub use registry::*;

/// Failures while resolving or materializing OCI artifacts.
#[derive(Debug, thiserror::Error)]
pub enum OciError {
    #[error("invalid image reference: {0}")]
    InvalidImage(String),
    #[error("failed to parse image manifest")]
    ManifestParse(#[source] serde_json::Error),
    #[error("failed to parse image config")]
    ConfigParse(#[source] serde_json::Error),
    #[error("failed to extract layer {0}")]
    LayerExtraction(String),
    #[error("failed to download {0}")]
    Download(String),
    #[error("unsupported compression in media type {0:?}")]
    UnsupportedCompression(String),
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),
    #[error("digest verification failed for {digest}: blob hashes to {actual}")]
    VerificationFailed { digest: String, actual: String },
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
}
