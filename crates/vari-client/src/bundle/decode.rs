//! Bounds-checked container parser.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{VariError, VariResult};

use super::{BundleFiles, BundleHeader, BUNDLE_MAGIC, HEADER_LEN, MAX_ENTRIES, MAX_PATH_LEN};

struct Cursor<'a> {
    data: &'a Bytes,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u32(&mut self) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(self.pos..self.pos + 4)?.try_into().ok()?;
        self.pos += 4;
        Some(u32::from_le_bytes(bytes))
    }

    fn take(&mut self, len: usize) -> Option<Bytes> {
        if len > self.remaining() {
            return None;
        }
        let out = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Some(out)
    }
}

fn magic_display(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn check_magic(data: &[u8]) -> VariResult<()> {
    let actual = data.get(..4).unwrap_or(data);
    if actual != BUNDLE_MAGIC {
        return Err(VariError::invalid_bundle(format!(
            "bad magic: expected {} (\"VARI\"), got {}",
            magic_display(&BUNDLE_MAGIC),
            if actual.is_empty() {
                "empty buffer".to_string()
            } else {
                magic_display(actual)
            }
        )));
    }
    Ok(())
}

/// Validate magic and read the fixed header without touching entries.
pub fn read_header(data: &[u8]) -> VariResult<BundleHeader> {
    check_magic(data)?;
    if data.len() < HEADER_LEN {
        return Err(VariError::invalid_bundle(format!(
            "truncated header: need {} bytes, got {}",
            HEADER_LEN,
            data.len()
        )));
    }

    let format_version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let entry_count = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);

    if entry_count == 0 {
        return Err(VariError::invalid_bundle("bundle declares zero entries"));
    }
    if entry_count > MAX_ENTRIES {
        return Err(VariError::invalid_bundle(format!(
            "bundle declares {} entries, limit is {}",
            entry_count, MAX_ENTRIES
        )));
    }

    Ok(BundleHeader {
        format_version,
        entry_count,
    })
}

/// Decode a bundle into its files.
///
/// Fails with [`VariError::InvalidBundle`] on bad magic, an entry count
/// outside `1..=100`, a path longer than 1000 bytes, a non-UTF-8 path, or
/// any length field that runs past the end of the buffer.
pub fn decode(data: Bytes) -> VariResult<BundleFiles> {
    let header = read_header(&data)?;
    let count = header.entry_count;

    let mut cursor = Cursor::new(&data);
    cursor.pos = HEADER_LEN;

    let mut files = BundleFiles::default();

    for i in 1..=count {
        let truncated = |field: &str, need: usize, have: usize| {
            VariError::invalid_bundle(format!(
                "entry {} of {}: truncated {} (need {} bytes, {} remain)",
                i, count, field, need, have
            ))
        };

        let remaining = cursor.remaining();
        let path_len = cursor
            .read_u32()
            .ok_or_else(|| truncated("path length", 4, remaining))?;

        if path_len > MAX_PATH_LEN {
            return Err(VariError::invalid_bundle(format!(
                "entry {} of {}: path length {} exceeds limit {}",
                i, count, path_len, MAX_PATH_LEN
            )));
        }

        let remaining = cursor.remaining();
        let path_bytes = cursor
            .take(path_len as usize)
            .ok_or_else(|| truncated("path", path_len as usize, remaining))?;

        let path = String::from_utf8(path_bytes.to_vec()).map_err(|e| {
            VariError::invalid_bundle(format!("entry {} of {}: path is not UTF-8: {}", i, count, e))
        })?;

        let remaining = cursor.remaining();
        let data_len = cursor
            .read_u32()
            .ok_or_else(|| truncated("data length", 4, remaining))? as usize;

        let remaining = cursor.remaining();
        let payload = cursor.take(data_len).ok_or_else(|| {
            VariError::invalid_bundle(format!(
                "entry {} of {} ({:?}): data truncated, declared {} bytes but {} remain (short by {})",
                i,
                count,
                path,
                data_len,
                remaining,
                data_len - remaining
            ))
        })?;

        if files.insert(path, payload) {
            warn!(entry = i, "duplicate bundle path, keeping the later payload");
        }
    }

    debug!(
        format_version = header.format_version,
        entries = files.len(),
        bytes = data.len(),
        "decoded bundle"
    );

    Ok(files)
}
