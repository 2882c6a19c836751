// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::str::FromStr;

use crate::OciError;

/// The registry implied by bare references like `alpine` or `nginx:1.25`.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// The tag implied when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed image reference: `[registry/]repository[:tag][@digest]`.
///
/// Single-segment Docker Hub names get the `library/` prefix, matching what
/// the registry expects for official images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

/// A leading segment is a registry host if it looks like one: contains a dot
/// or a port, or is the literal `localhost`. This is the same heuristic the
/// docker CLI applies.
fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

impl FromStr for ImageReference {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(OciError::InvalidImage(s.to_string()));
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                if !digest.contains(':') {
                    return Err(OciError::InvalidImage(s.to_string()));
                }
                (rest, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // The tag delimiter is a ':' after the last '/'; an earlier ':'
        // belongs to the registry port.
        let last_slash = rest.rfind('/');
        let (name, tag) = match rest.rfind(':') {
            Some(colon) if colon > last_slash.unwrap_or(0) || last_slash.is_none() => {
                (&rest[..colon], rest[colon + 1..].to_string())
            }
            _ => (rest, DEFAULT_TAG.to_string()),
        };

        if name.is_empty() || tag.is_empty() {
            return Err(OciError::InvalidImage(s.to_string()));
        }

        let (registry, mut repository) = match name.split_once('/') {
            Some((first, remainder)) if is_registry_host(first) => {
                (first.to_string(), remainder.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() {
            return Err(OciError::InvalidImage(s.to_string()));
        }
        if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            repository = format!("library/{}", repository);
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
