//! In-memory backend. Always available; also the fallback and test backend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::clock::Clock;
use crate::error::VariResult;

use super::{BackendKind, CacheBackend, CacheStats, ExpiringKind};

#[derive(Debug, Clone)]
struct ExpiringEntry {
    payload: Bytes,
    cached_at: i64,
    ttl_ms: i64,
}

#[derive(Debug, Clone)]
struct DurableEntry {
    payload: Bytes,
    cached_at: i64,
}

#[derive(Debug, Default)]
struct Stores {
    listings: HashMap<String, ExpiringEntry>,
    records: HashMap<String, ExpiringEntry>,
    models: HashMap<String, DurableEntry>,
}

impl Stores {
    fn expiring(&self, kind: ExpiringKind) -> &HashMap<String, ExpiringEntry> {
        match kind {
            ExpiringKind::Listing => &self.listings,
            ExpiringKind::Record => &self.records,
        }
    }

    fn expiring_mut(&mut self, kind: ExpiringKind) -> &mut HashMap<String, ExpiringEntry> {
        match kind {
            ExpiringKind::Listing => &mut self.listings,
            ExpiringKind::Record => &mut self.records,
        }
    }
}

/// Cache held in process memory. One lock covers all kinds, so `clear` is
/// atomic to readers.
#[derive(Debug)]
pub struct MemoryBackend {
    clock: Arc<dyn Clock>,
    stores: RwLock<Stores>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            stores: RwLock::new(Stores::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Stores> {
        self.stores.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Stores> {
        self.stores.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn is_expired(now: i64, cached_at: i64, ttl_ms: i64) -> bool {
    now.saturating_sub(cached_at) > ttl_ms
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get_expiring(&self, kind: ExpiringKind, key: &str) -> VariResult<Option<Bytes>> {
        let now = self.clock.now_millis();
        let stores = self.read();
        let Some(entry) = stores.expiring(kind).get(key) else {
            return Ok(None);
        };
        if is_expired(now, entry.cached_at, entry.ttl_ms) {
            debug!(key, store = kind.store_name(), "cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry.payload.clone()))
    }

    async fn set_expiring(
        &self,
        kind: ExpiringKind,
        key: &str,
        payload: Bytes,
        ttl: Duration,
    ) -> VariResult<()> {
        let entry = ExpiringEntry {
            payload,
            cached_at: self.clock.now_millis(),
            ttl_ms: ttl_millis(ttl),
        };
        self.write()
            .expiring_mut(kind)
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn get_durable(&self, key: &str) -> VariResult<Option<Bytes>> {
        let stores = self.read();
        let Some(entry) = stores.models.get(key) else {
            return Ok(None);
        };
        debug!(key, cached_at = entry.cached_at, "model cache hit");
        Ok(Some(entry.payload.clone()))
    }

    async fn set_durable(&self, key: &str, payload: Bytes) -> VariResult<()> {
        let entry = DurableEntry {
            payload,
            cached_at: self.clock.now_millis(),
        };
        self.write().models.insert(key.to_string(), entry);
        Ok(())
    }

    async fn clear(&self) -> VariResult<()> {
        *self.write() = Stores::default();
        debug!("cleared memory cache");
        Ok(())
    }

    async fn stats(&self) -> VariResult<CacheStats> {
        let stores = self.read();
        let expiring_bytes = stores
            .listings
            .values()
            .chain(stores.records.values())
            .map(|e| e.payload.len() as u64)
            .sum::<u64>();
        let model_bytes = stores
            .models
            .values()
            .map(|e| e.payload.len() as u64)
            .sum::<u64>();

        Ok(CacheStats {
            listings: stores.listings.len(),
            records: stores.records.len(),
            models: stores.models.len(),
            approximate_bytes: expiring_bytes + model_bytes,
            backend: BackendKind::Memory,
        })
    }
}
