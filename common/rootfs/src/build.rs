// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ociimage::{
    blob_path, is_layout, read_index, BlobCache, Compression, Descriptor, Digest, ImageConfig,
    ImageManifest, ImageReference, OciError, RegistryClient,
};
use tracing::{info, instrument};

use crate::extract::extract_layer;

/// The default layer cache root for registry pulls.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/xenomorph";

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Check sha256 layer/config digests against their descriptors.
    pub verify_digests: bool,
    /// Apply whiteout entries while extracting (leave them in the tree
    /// otherwise, which is only useful for inspecting layers).
    pub apply_whiteouts: bool,
    /// Cache root for blobs fetched from a registry.
    pub cache_dir: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            verify_digests: true,
            apply_whiteouts: true,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
        }
    }
}

#[derive(Debug)]
pub struct BuildResult {
    pub rootfs_path: PathBuf,
    pub layer_count: usize,
    /// Sum of blob sizes for OCI sources, the archive size for tarballs.
    pub total_size: u64,
    /// Present for OCI sources that carry a config blob.
    pub image_config: Option<ImageConfig>,
}

/// Returns true if the reference names a local tarball rather than an image.
pub fn is_tarball_ref(image: &str) -> bool {
    image.ends_with(".tar")
        || image.ends_with(".tar.gz")
        || image.ends_with(".tgz")
        || image.ends_with(".tar.zst")
}

/// Materializes `image` into `target_dir`.
///
/// The reference is treated as local when it names a tarball or a directory
/// holding an `oci-layout` marker; anything else goes to the registry
/// client.
#[instrument(skip(options, registry))]
pub fn build(
    image: &str,
    target_dir: &Path,
    options: &BuildOptions,
    registry: &dyn RegistryClient,
) -> Result<BuildResult> {
    std::fs::create_dir_all(target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;

    let local = Path::new(image);
    if is_tarball_ref(image) {
        build_from_tarball(local, target_dir, options)
    } else if local.is_dir() && is_layout(local) {
        build_from_layout(local, target_dir, options)
    } else {
        build_from_registry(image, target_dir, options, registry)
    }
}

fn build_from_tarball(
    archive: &Path,
    target_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildResult> {
    let metadata = std::fs::metadata(archive)
        .with_context(|| format!("Failed to stat {}", archive.display()))?;
    let compression = Compression::from_file_name(&archive.file_name().unwrap_or_default().to_string_lossy());

    info!(
        "Extracting {} ({}, {} bytes)",
        archive.display(),
        compression,
        metadata.len()
    );
    extract_layer(archive, compression, target_dir, options.apply_whiteouts)
        .map_err(|e| anyhow::Error::from(OciError::LayerExtraction(format!("{:#}", e))))?;

    Ok(BuildResult {
        rootfs_path: target_dir.to_path_buf(),
        layer_count: 1,
        total_size: metadata.len(),
        image_config: None,
    })
}

fn verify_if_enabled(options: &BuildOptions, blob: &Path, digest: &Digest) -> Result<()> {
    if options.verify_digests {
        ociimage::verify_blob(blob, digest)?;
    }
    Ok(())
}

fn apply_layers(
    layers: &[Descriptor],
    blob_for: impl Fn(&Digest) -> Result<PathBuf>,
    target_dir: &Path,
    options: &BuildOptions,
) -> Result<u64> {
    let mut total_size = 0u64;
    for (index, layer) in layers.iter().enumerate() {
        let digest: Digest = layer.digest.parse()?;
        let blob = blob_for(&digest)?;
        verify_if_enabled(options, &blob, &digest)?;
        let compression = Compression::from_media_type_checked(&layer.media_type)?;
        info!(
            "Applying layer {}/{}: {} ({})",
            index + 1,
            layers.len(),
            layer.digest,
            compression
        );
        extract_layer(&blob, compression, target_dir, options.apply_whiteouts)
            .map_err(|e| OciError::LayerExtraction(format!("{}: {:#}", layer.digest, e)))?;
        total_size += layer.size;
    }
    Ok(total_size)
}

fn build_from_layout(
    layout: &Path,
    target_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildResult> {
    let index = read_index(layout)?;
    let Some(manifest_desc) = index.manifests.first() else {
        bail!(OciError::InvalidImage(format!(
            "{}: image index lists no manifests",
            layout.display()
        )));
    };

    let manifest_digest: Digest = manifest_desc.digest.parse()?;
    let manifest_blob = blob_path(layout, &manifest_digest);
    verify_if_enabled(options, &manifest_blob, &manifest_digest)?;
    let manifest = ImageManifest::parse(
        &std::fs::read(&manifest_blob)
            .with_context(|| format!("Failed to read manifest {}", manifest_blob.display()))?,
    )?;

    let total_size = apply_layers(
        &manifest.layers,
        |digest| Ok(blob_path(layout, digest)),
        target_dir,
        options,
    )?;

    let config_digest: Digest = manifest.config.digest.parse()?;
    let config_blob = blob_path(layout, &config_digest);
    verify_if_enabled(options, &config_blob, &config_digest)?;
    let image_config = ImageConfig::parse(
        &std::fs::read(&config_blob)
            .with_context(|| format!("Failed to read config {}", config_blob.display()))?,
    )?;

    Ok(BuildResult {
        rootfs_path: target_dir.to_path_buf(),
        layer_count: manifest.layers.len(),
        total_size,
        image_config: Some(image_config),
    })
}

/// Registry transports are pluggable; a client without one reports
/// `NotImplemented`, which callers see as a download failure rather than an
/// internal error.
fn downgrade_not_implemented(error: OciError, what: &str) -> OciError {
    match error {
        OciError::NotImplemented(_) => OciError::Download(what.to_string()),
        other => other,
    }
}

fn build_from_registry(
    image: &str,
    target_dir: &Path,
    options: &BuildOptions,
    registry: &dyn RegistryClient,
) -> Result<BuildResult> {
    let reference: ImageReference = image.parse()?;
    let cache = BlobCache::new(&options.cache_dir);

    info!("Pulling {}", reference);
    let manifest_reference = reference
        .digest
        .clone()
        .unwrap_or_else(|| reference.tag.clone());
    let manifest_bytes = registry
        .get_manifest(&reference.repository, &manifest_reference)
        .map_err(|e| downgrade_not_implemented(e, &format!("manifest for {}", reference)))?;
    let manifest = ImageManifest::parse(&manifest_bytes)?;

    let fetch = |digest: &Digest| -> Result<PathBuf> {
        let blob = cache.blob_path(digest);
        if cache.contains(digest) {
            return Ok(blob);
        }
        std::fs::create_dir_all(blob.parent().context("Blob path must have a parent")?)?;
        registry
            .get_blob(&reference.repository, digest, &blob)
            .map_err(|e| downgrade_not_implemented(e, &format!("blob {}", digest)))?;
        Ok(blob)
    };

    let total_size = apply_layers(&manifest.layers, &fetch, target_dir, options)?;

    let config_digest: Digest = manifest.config.digest.parse()?;
    let config_blob = fetch(&config_digest)?;
    verify_if_enabled(options, &config_blob, &config_digest)?;
    let image_config = ImageConfig::parse(
        &std::fs::read(&config_blob)
            .with_context(|| format!("Failed to read config {}", config_blob.display()))?,
    )?;

    Ok(BuildResult {
        rootfs_path: target_dir.to_path_buf(),
        layer_count: manifest.layers.len(),
        total_size,
        image_config: Some(image_config),
    })
}
