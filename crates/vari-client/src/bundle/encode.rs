//! Container writer. Refuses anything [`decode`](super::decode) would reject.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{VariError, VariResult};

use super::{BUNDLE_FORMAT_VERSION, BUNDLE_MAGIC, HEADER_LEN, MAX_ENTRIES, MAX_PATH_LEN};

/// Builds a bundle from `(path, payload)` entries, written in insertion order.
#[derive(Debug, Clone)]
pub struct BundleWriter {
    format_version: u32,
    entries: Vec<(String, Bytes)>,
}

impl Default for BundleWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleWriter {
    pub fn new() -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            entries: Vec::new(),
        }
    }

    pub fn with_format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    pub fn add(mut self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.entries.push((path.into(), data.into()));
        self
    }

    pub fn finish(self) -> VariResult<Bytes> {
        let count = self.entries.len();
        if count == 0 {
            return Err(VariError::invalid_bundle("cannot write a bundle with no entries"));
        }
        if count > MAX_ENTRIES as usize {
            return Err(VariError::invalid_bundle(format!(
                "cannot write {} entries, limit is {}",
                count, MAX_ENTRIES
            )));
        }

        let mut size = HEADER_LEN;
        for (path, data) in &self.entries {
            if path.len() > MAX_PATH_LEN as usize {
                return Err(VariError::invalid_bundle(format!(
                    "path length {} exceeds limit {}",
                    path.len(),
                    MAX_PATH_LEN
                )));
            }
            if u32::try_from(data.len()).is_err() {
                return Err(VariError::invalid_bundle(format!(
                    "payload for {:?} exceeds the u32 length field",
                    path
                )));
            }
            size += 8 + path.len() + data.len();
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(&BUNDLE_MAGIC);
        buf.put_u32_le(self.format_version);
        buf.put_u32_le(count as u32);
        for (path, data) in &self.entries {
            buf.put_u32_le(path.len() as u32);
            buf.put_slice(path.as_bytes());
            buf.put_u32_le(data.len() as u32);
            buf.put_slice(data);
        }

        Ok(buf.freeze())
    }
}

/// Encode entries with the current format version.
pub fn encode<I, P, D>(entries: I) -> VariResult<Bytes>
where
    I: IntoIterator<Item = (P, D)>,
    P: Into<String>,
    D: Into<Bytes>,
{
    entries
        .into_iter()
        .fold(BundleWriter::new(), |w, (p, d)| w.add(p, d))
        .finish()
}
