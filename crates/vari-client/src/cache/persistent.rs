//! Directory-backed backend.
//!
//! Each kind is a store directory; each entry a subdirectory named by the
//! SHA-256 of its key holding `payload.bin` and `metadata.json`, both written
//! atomically through per-write temp files. Metadata is written last and
//! records the payload digest; an entry whose metadata is missing or does not
//! match the payload on disk is treated as absent.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{VariError, VariResult};

use super::keys::{entry_dir_name, payload_digest};
use super::memory::{is_expired, ttl_millis};
use super::{BackendKind, CacheBackend, CacheStats, ExpiringKind, MODELS_STORE};

/// Size assumed per cached model in [`CacheStats::approximate_bytes`].
///
/// Reading every payload's size would mean a stat per entry; stats only
/// needs a rough figure.
pub const ESTIMATED_MODEL_BYTES: u64 = 2 * 1024 * 1024;

const PAYLOAD_FILE: &str = "payload.bin";
const METADATA_FILE: &str = "metadata.json";

/// Writers to entries in the same stripe are serialized.
const WRITE_STRIPES: usize = 16;

/// Metadata stored alongside each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    /// Unix milliseconds.
    cached_at: i64,
    /// `None` for durable entries.
    #[serde(default)]
    ttl_ms: Option<i64>,
    /// Digest of the payload this metadata was written with.
    digest: String,
}

pub(crate) fn default_cache_dir() -> VariResult<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| VariError::Cache {
            operation: "open",
            message: "could not determine cache directory".to_string(),
        })?;

    Ok(base.join("vari").join("cache"))
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A sibling of `path` no other write in this process or any other will use.
fn unique_temp_path(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

async fn write_atomic(path: &Path, content: &[u8]) -> VariResult<()> {
    let temp_path = unique_temp_path(path);

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(VariError::cache(
            "write",
            format!("failed to write temp file: {}", e),
        ));
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(VariError::cache(
            "write",
            format!("failed to rename temp file: {}", e),
        ));
    }

    Ok(())
}

async fn remove_store(dir: PathBuf) -> VariResult<()> {
    match fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VariError::cache(
            "clear",
            format!("failed to clear {}: {}", dir.display(), e),
        )),
    }
}

async fn count_entries(dir: &Path) -> VariResult<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(VariError::cache(
                "count",
                format!("failed to read {}: {}", dir.display(), e),
            ))
        }
    };

    let mut count = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| VariError::cache("count", format!("failed to read entry: {}", e)))?
    {
        let has_meta = fs::try_exists(entry.path().join(METADATA_FILE))
            .await
            .map_err(|e| VariError::cache("count", format!("failed to stat entry: {}", e)))?;
        if has_meta {
            count += 1;
        }
    }
    Ok(count)
}

/// Cache persisted under a directory.
///
/// Reads and writes share a lock that `clear` takes exclusively, so a
/// reader never observes a half-cleared cache. Writes to one entry are also
/// serialized, so its payload and metadata always come from the same write.
#[derive(Debug)]
pub struct PersistentBackend {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    gate: RwLock<()>,
    write_stripes: Vec<Mutex<()>>,
}

impl PersistentBackend {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> VariResult<Self> {
        let root = dir.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            VariError::cache(
                "open",
                format!("failed to create {}: {}", root.display(), e),
            )
        })?;

        // Probe writability once, up front.
        let probe = root.join(".probe");
        write_atomic(&probe, b"ok")
            .await
            .map_err(|e| VariError::cache("open", e))?;
        let _ = fs::remove_file(&probe).await;

        debug!(root = %root.display(), "opened persistent cache");
        Ok(Self {
            root,
            clock,
            gate: RwLock::new(()),
            write_stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(store)
    }

    pub(crate) fn entry_dir(&self, store: &str, key: &str) -> PathBuf {
        self.store_dir(store).join(entry_dir_name(key))
    }

    async fn read_entry(&self, store: &str, key: &str) -> VariResult<Option<(EntryMeta, Bytes)>> {
        let dir = self.entry_dir(store, key);
        let meta_path = dir.join(METADATA_FILE);
        let payload_path = dir.join(PAYLOAD_FILE);

        let meta_content = match fs::read(&meta_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key, store, "cache miss");
                return Ok(None);
            }
            Err(e) => {
                return Err(VariError::cache(
                    "read",
                    format!("failed to read cache metadata: {}", e),
                ))
            }
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_content).map_err(|e| {
            VariError::cache("read", format!("failed to parse cache metadata: {}", e))
        })?;

        if meta.key != key {
            debug!(key, stored = %meta.key, store, "cache key collision, treating as miss");
            return Ok(None);
        }

        let payload = match fs::read(&payload_path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(VariError::cache(
                    "read",
                    format!("failed to read cached payload: {}", e),
                ))
            }
        };

        // A concurrent writer may have replaced the payload after this
        // metadata was written; the pair is only served when they agree.
        if payload_digest(&payload) != meta.digest {
            debug!(key, store, "payload does not match metadata, treating as miss");
            return Ok(None);
        }

        Ok(Some((meta, Bytes::from(payload))))
    }

    async fn write_entry(
        &self,
        store: &str,
        key: &str,
        payload: &[u8],
        ttl_ms: Option<i64>,
    ) -> VariResult<()> {
        let name = entry_dir_name(key);
        let stripe = name
            .chars()
            .next()
            .and_then(|c| c.to_digit(16))
            .unwrap_or(0) as usize
            % self.write_stripes.len();
        let _write_guard = self.write_stripes[stripe].lock().await;

        let dir = self.store_dir(store).join(name);
        fs::create_dir_all(&dir).await.map_err(|e| {
            VariError::cache("write", format!("failed to create cache directory: {}", e))
        })?;

        let meta = EntryMeta {
            key: key.to_string(),
            cached_at: self.clock.now_millis(),
            ttl_ms,
            digest: payload_digest(payload),
        };
        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| {
            VariError::cache("write", format!("failed to serialize metadata: {}", e))
        })?;

        write_atomic(&dir.join(PAYLOAD_FILE), payload).await?;
        write_atomic(&dir.join(METADATA_FILE), &meta_json).await?;

        debug!(key, store, bytes = payload.len(), "cached entry");
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for PersistentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Persistent
    }

    async fn get_expiring(&self, kind: ExpiringKind, key: &str) -> VariResult<Option<Bytes>> {
        let _guard = self.gate.read().await;
        let Some((meta, payload)) = self.read_entry(kind.store_name(), key).await? else {
            return Ok(None);
        };

        let ttl_ms = meta.ttl_ms.unwrap_or(0);
        if is_expired(self.clock.now_millis(), meta.cached_at, ttl_ms) {
            debug!(
                key,
                store = kind.store_name(),
                cached_at = meta.cached_at,
                "cache entry expired"
            );
            return Ok(None);
        }

        debug!(key, store = kind.store_name(), "cache hit");
        Ok(Some(payload))
    }

    async fn set_expiring(
        &self,
        kind: ExpiringKind,
        key: &str,
        payload: Bytes,
        ttl: Duration,
    ) -> VariResult<()> {
        let _guard = self.gate.read().await;
        self.write_entry(kind.store_name(), key, &payload, Some(ttl_millis(ttl)))
            .await
    }

    async fn get_durable(&self, key: &str) -> VariResult<Option<Bytes>> {
        let _guard = self.gate.read().await;
        let entry = self.read_entry(MODELS_STORE, key).await?;
        if let Some((meta, _)) = &entry {
            debug!(key, cached_at = meta.cached_at, "model cache hit");
        }
        Ok(entry.map(|(_, payload)| payload))
    }

    async fn set_durable(&self, key: &str, payload: Bytes) -> VariResult<()> {
        let _guard = self.gate.read().await;
        self.write_entry(MODELS_STORE, key, &payload, None).await
    }

    async fn clear(&self) -> VariResult<()> {
        let _guard = self.gate.write().await;

        let stores = [
            ExpiringKind::Listing.store_name(),
            ExpiringKind::Record.store_name(),
            MODELS_STORE,
        ];
        // Every removal runs to completion before the first failure is reported.
        let results =
            futures::future::join_all(stores.iter().map(|s| remove_store(self.store_dir(s))))
                .await;
        results.into_iter().collect::<VariResult<Vec<()>>>()?;

        debug!(root = %self.root.display(), "cleared persistent cache");
        Ok(())
    }

    async fn stats(&self) -> VariResult<CacheStats> {
        let _guard = self.gate.read().await;

        let listings_dir = self.store_dir(ExpiringKind::Listing.store_name());
        let records_dir = self.store_dir(ExpiringKind::Record.store_name());
        let models_dir = self.store_dir(MODELS_STORE);

        let (listings, records, models) = futures::try_join!(
            count_entries(&listings_dir),
            count_entries(&records_dir),
            count_entries(&models_dir),
        )?;

        Ok(CacheStats {
            listings,
            records,
            models,
            approximate_bytes: models as u64 * ESTIMATED_MODEL_BYTES,
            backend: BackendKind::Persistent,
        })
    }
}
