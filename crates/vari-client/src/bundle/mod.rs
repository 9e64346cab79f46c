//! VARI model bundle container.
//!
//! # Wire Format
//!
//! ```text
//! offset 0   4 bytes   magic "VARI"
//! offset 4   4 bytes   format version (u32 LE)
//! offset 8   4 bytes   entry count (u32 LE), 1..=100
//! repeated entry count times:
//!            4 bytes   path length (u32 LE), <= 1000
//!            n bytes   UTF-8 path
//!            4 bytes   data length (u32 LE)
//!            n bytes   payload
//! ```
//!
//! Decoding is a pure function of the input. Payloads are [`Bytes`] slices
//! of the input buffer, so a decoded bundle shares memory with the download.

use std::collections::HashMap;

use bytes::Bytes;

mod decode;
mod encode;
mod model;

pub use decode::{decode, read_header};
pub use encode::{encode, BundleWriter};
pub use model::{decode_model, extract_named_parts, NamedParts, UnpackedModel};

/// First four bytes of every bundle.
pub const BUNDLE_MAGIC: [u8; 4] = *b"VARI";

/// Format version written by [`BundleWriter`]. Readers accept any version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Upper bound on declared entries.
pub const MAX_ENTRIES: u32 = 100;

/// Upper bound on a single path length in bytes.
pub const MAX_PATH_LEN: u32 = 1000;

/// Size of the fixed header (magic + version + entry count).
pub const HEADER_LEN: usize = 12;

pub const SKELETON_SUFFIX: &str = ".json";
pub const ATLAS_SUFFIX: &str = ".atlas";
pub const TEXTURE_SUFFIX: &str = ".png";

/// Cheap pre-check: does `data` start with the bundle magic?
pub fn is_container(data: &[u8]) -> bool {
    data.get(..4) == Some(BUNDLE_MAGIC.as_slice())
}

/// Fixed header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    pub format_version: u32,
    pub entry_count: u32,
}

/// Decoded bundle contents: path to payload, in first-seen order.
///
/// A path that appears twice keeps its first position and the payload of
/// its last occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleFiles {
    entries: Vec<(String, Bytes)>,
    index: HashMap<String, usize>,
}

impl BundleFiles {
    /// Returns `true` if an earlier entry with the same path was replaced.
    pub(crate) fn insert(&mut self, path: String, data: Bytes) -> bool {
        if let Some(&i) = self.index.get(&path) {
            self.entries[i].1 = data;
            return true;
        }
        self.index.insert(path.clone(), self.entries.len());
        self.entries.push((path, data));
        false
    }

    pub fn get(&self, path: &str) -> Option<&Bytes> {
        self.index.get(path).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    /// First entry whose path ends with `suffix`.
    pub fn find_suffix(&self, suffix: &str) -> Option<(&str, &Bytes)> {
        self.iter().find(|(p, _)| p.ends_with(suffix))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of payload lengths.
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|(_, d)| d.len()).sum()
    }
}
