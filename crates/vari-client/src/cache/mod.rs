//! Two-tier cache for listings, character records and model bundles.
//!
//! Listings and records expire after a TTL, checked lazily on read. Model
//! bundles are durable: valid until [`CacheStore::clear`].
//!
//! The backend is picked once when the store is built: a persistent
//! directory when one is usable, otherwise process memory.
//!
//! # Persistent Layout
//!
//! ```text
//! {cache_dir}/{listings|records|models}/{sha256(key)}/
//!   payload.bin      # Cached bytes
//!   metadata.json    # Key, cached_at, ttl, payload digest
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::error::{VariError, VariResult};
use crate::types::ClientConfig;

mod keys;
mod memory;
mod persistent;

pub use keys::{listing_key, model_key, record_key};
pub use memory::MemoryBackend;
pub use persistent::{PersistentBackend, ESTIMATED_MODEL_BYTES};

/// Cache kinds whose entries carry a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiringKind {
    /// Character list/search results.
    Listing,
    /// A single character record.
    Record,
}

impl ExpiringKind {
    pub(crate) fn store_name(self) -> &'static str {
        match self {
            Self::Listing => "listings",
            Self::Record => "records",
        }
    }
}

pub(crate) const MODELS_STORE: &str = "models";

/// Which backend produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Persistent,
    Memory,
}

/// Entry counts and size.
///
/// The memory backend sums exact payload sizes. The persistent backend
/// reports `models * ESTIMATED_MODEL_BYTES`, an approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub listings: usize,
    pub records: usize,
    pub models: usize,
    pub approximate_bytes: u64,
    pub backend: BackendKind,
}

impl CacheStats {
    pub fn is_empty(&self) -> bool {
        self.listings == 0 && self.records == 0 && self.models == 0
    }
}

/// Storage contract shared by both backends.
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// `None` if never written or older than its TTL.
    async fn get_expiring(&self, kind: ExpiringKind, key: &str) -> VariResult<Option<Bytes>>;

    /// Replace any existing entry, stamped now.
    async fn set_expiring(
        &self,
        kind: ExpiringKind,
        key: &str,
        payload: Bytes,
        ttl: Duration,
    ) -> VariResult<()>;

    async fn get_durable(&self, key: &str) -> VariResult<Option<Bytes>>;

    async fn set_durable(&self, key: &str, payload: Bytes) -> VariResult<()>;

    /// Empty every kind. Concurrent readers see all or nothing.
    async fn clear(&self) -> VariResult<()>;

    async fn stats(&self) -> VariResult<CacheStats>;
}

/// Cache facade over the backend chosen at construction.
#[derive(Debug, Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// In-memory store on the system clock.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new(Arc::new(SystemClock))))
    }

    /// Persistent store rooted at `dir`, on the system clock.
    pub async fn persistent(dir: impl Into<PathBuf>) -> VariResult<Self> {
        let backend = PersistentBackend::open(dir, Arc::new(SystemClock)).await?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Pick a backend for `config`, falling back to memory when the
    /// persistent directory cannot be used.
    pub async fn open(config: &ClientConfig) -> Self {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(config: &ClientConfig, clock: Arc<dyn Clock>) -> Self {
        if config.disable_persistent_cache {
            return Self::new(Arc::new(MemoryBackend::new(clock)));
        }

        let dir = match config.cache_dir.clone() {
            Some(dir) => Ok(dir),
            None => persistent::default_cache_dir(),
        };

        let opened = match dir {
            Ok(dir) => PersistentBackend::open(dir, Arc::clone(&clock)).await,
            Err(e) => Err(e),
        };

        match opened {
            Ok(backend) => Self::new(Arc::new(backend)),
            Err(e) => {
                warn!(error = %e, "persistent cache unavailable, using memory cache");
                Self::new(Arc::new(MemoryBackend::new(clock)))
            }
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub async fn get_expiring(&self, kind: ExpiringKind, key: &str) -> VariResult<Option<Bytes>> {
        self.backend.get_expiring(kind, key).await
    }

    pub async fn set_expiring(
        &self,
        kind: ExpiringKind,
        key: &str,
        payload: Bytes,
        ttl: Duration,
    ) -> VariResult<()> {
        self.backend.set_expiring(kind, key, payload, ttl).await
    }

    pub async fn get_durable(&self, key: &str) -> VariResult<Option<Bytes>> {
        self.backend.get_durable(key).await
    }

    pub async fn set_durable(&self, key: &str, payload: Bytes) -> VariResult<()> {
        self.backend.set_durable(key, payload).await
    }

    pub async fn clear(&self) -> VariResult<()> {
        self.backend.clear().await
    }

    pub async fn stats(&self) -> VariResult<CacheStats> {
        self.backend.stats().await
    }

    /// Typed read of a JSON payload. Undecodable payloads count as a miss.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        kind: ExpiringKind,
        key: &str,
    ) -> VariResult<Option<T>> {
        let Some(payload) = self.get_expiring(kind, key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        kind: ExpiringKind,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> VariResult<()> {
        let payload = serde_json::to_vec(value).map_err(|e| VariError::cache("serialize", e))?;
        self.set_expiring(kind, key, Bytes::from(payload), ttl).await
    }
}
