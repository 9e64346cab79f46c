//! Skeleton/atlas/texture extraction on top of the raw container.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{VariError, VariResult};

use super::{decode, BundleFiles, ATLAS_SUFFIX, SKELETON_SUFFIX, TEXTURE_SUFFIX};

/// The three parts a renderer needs, plus every file in the bundle.
#[derive(Debug, Clone)]
pub struct NamedParts {
    /// Parsed `.json` skeleton.
    pub skeleton: serde_json::Value,
    /// Raw `.atlas` payload.
    pub atlas: Bytes,
    /// Raw `.png` payload.
    pub texture: Bytes,
    pub files: BundleFiles,
}

/// A decoded model bundle, stamped with where it came from.
#[derive(Debug, Clone)]
pub struct UnpackedModel {
    pub identifier: String,
    pub variant: String,
    pub skeleton: serde_json::Value,
    pub atlas: Bytes,
    pub texture: Bytes,
    pub files: BundleFiles,
    /// Size of the encoded bundle.
    pub byte_len: usize,
    pub created_at: DateTime<Utc>,
}

impl UnpackedModel {
    /// Atlas descriptors are plain text.
    pub fn atlas_text(&self) -> VariResult<&str> {
        std::str::from_utf8(&self.atlas)
            .map_err(|e| VariError::invalid_bundle(format!("atlas is not UTF-8: {}", e)))
    }
}

fn require<'a>(files: &'a BundleFiles, suffix: &str) -> VariResult<&'a Bytes> {
    files.find_suffix(suffix).map(|(_, d)| d).ok_or_else(|| {
        VariError::invalid_bundle(format!(
            "missing {} file; bundle contains [{}]",
            suffix,
            files.paths().collect::<Vec<_>>().join(", ")
        ))
    })
}

/// Select the first `.json`, `.atlas` and `.png` entries and parse the skeleton.
///
/// Only presence and JSON well-formedness are checked here.
pub fn extract_named_parts(files: BundleFiles) -> VariResult<NamedParts> {
    let skeleton_raw = require(&files, SKELETON_SUFFIX)?.clone();
    let atlas = require(&files, ATLAS_SUFFIX)?.clone();
    let texture = require(&files, TEXTURE_SUFFIX)?.clone();

    let skeleton = serde_json::from_slice(&skeleton_raw).map_err(|e| {
        VariError::invalid_bundle(format!("skeleton is not valid JSON: {}", e))
    })?;

    Ok(NamedParts {
        skeleton,
        atlas,
        texture,
        files,
    })
}

/// [`decode`] followed by [`extract_named_parts`].
pub fn decode_model(data: Bytes, identifier: &str, variant: &str) -> VariResult<UnpackedModel> {
    let byte_len = data.len();
    let parts = extract_named_parts(decode(data)?)?;

    Ok(UnpackedModel {
        identifier: identifier.to_string(),
        variant: variant.to_string(),
        skeleton: parts.skeleton,
        atlas: parts.atlas,
        texture: parts.texture,
        files: parts.files,
        byte_len,
        created_at: Utc::now(),
    })
}
