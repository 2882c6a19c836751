// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use serde::{Deserialize, Serialize};

use crate::OciError;

/// A content-addressed reference to a blob, as it appears in indexes and
/// manifests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// The top-level `index.json` of an OCI layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub manifests: Vec<Descriptor>,
}

/// An image manifest: one config blob plus the ordered layer list. The layer
/// order is the application order; whiteouts in a layer apply to the state
/// accumulated below it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, OciError> {
        serde_json::from_slice(bytes).map_err(OciError::ManifestParse)
    }
}

/// The runtime section of an image config blob. Field names are capitalized
/// on the wire.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Env", default)]
    pub env: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RootFsSection {
    #[serde(rename = "type", default)]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

/// An image config blob.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub config: RuntimeConfig,
    #[serde(default)]
    pub rootfs: RootFsSection,
}

impl ImageConfig {
    pub fn parse(bytes: &[u8]) -> Result<Self, OciError> {
        serde_json::from_slice(bytes).map_err(OciError::ConfigParse)
    }
}

/// How a layer blob is compressed, derived from its media type suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn from_media_type(media_type: &str) -> Self {
        if media_type.contains("+gzip") {
            Compression::Gzip
        } else if media_type.contains("+zstd") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// Like [`Compression::from_media_type`], but rejects media types that
    /// declare a compression this implementation cannot decode.
    pub fn from_media_type_checked(media_type: &str) -> Result<Self, OciError> {
        match Self::from_media_type(media_type) {
            Compression::None if media_type.rsplit('+').nth(1).is_some() => {
                Err(OciError::UnsupportedCompression(media_type.to_string()))
            }
            other => Ok(other),
        }
    }

    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Compression::Gzip
        } else if name.ends_with(".tar.zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}
