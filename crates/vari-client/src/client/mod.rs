//! Client composing the cache, rate limiter, transport and bundle codec.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.
//!
//! Every lookup consults the cache first. On a miss the request waits for a
//! rate limiter slot, fetches, validates, and writes back. Cache failures on
//! these paths are logged and treated as a miss; `clear_cache` and
//! `cache_stats` surface them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::bundle::{decode_model, is_container, UnpackedModel};
use crate::cache::{listing_key, model_key, record_key, CacheStats, CacheStore, ExpiringKind};
use crate::error::{VariError, VariResult};
use crate::rate_limit::{RateLimitStatus, RateLimiter};
use crate::types::{CharacterQuery, CharacterRecord, ClientConfig};

mod http;

pub use http::{HttpTransport, Transport, TransportResponse};

/// Listing bodies come either bare or wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Wrapped { characters: Vec<CharacterRecord> },
    Bare(Vec<CharacterRecord>),
}

impl ListingBody {
    fn into_records(self) -> Vec<CharacterRecord> {
        match self {
            Self::Wrapped { characters } => characters,
            Self::Bare(records) => records,
        }
    }
}

/// Client for character records and model bundles.
#[derive(Debug, Clone)]
pub struct VariClient {
    base_url: Url,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    cache: CacheStore,
    listing_ttl: Duration,
    record_ttl: Duration,
}

impl VariClient {
    /// Create a client with the HTTP transport and a probed cache backend.
    pub async fn new(config: ClientConfig) -> VariResult<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let cache = CacheStore::open(&config).await;
        Self::with_parts(&config, transport, cache)
    }

    /// Create a client from environment variables.
    pub async fn from_env() -> VariResult<Self> {
        Self::new(ClientConfig::from_env()).await
    }

    /// Assemble a client from explicit collaborators.
    pub fn with_parts(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        cache: CacheStore,
    ) -> VariResult<Self> {
        let base_url = Url::parse(config.url.trim_end_matches('/')).map_err(|e| {
            VariError::Config {
                message: format!("invalid base URL {:?}: {}", config.url, e),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(VariError::Config {
                message: format!("base URL {:?} cannot have paths", config.url),
            });
        }

        Ok(Self {
            base_url,
            transport,
            limiter: RateLimiter::new(config.rate_limiter_config())?,
            cache,
            listing_ttl: Duration::from_secs(config.listing_ttl_secs),
            record_ttl: Duration::from_secs(config.record_ttl_secs),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn fetch(&self, url: &Url, resource: &str) -> VariResult<Bytes> {
        self.limiter.acquire().await?;
        let response = self.transport.fetch(url.as_str()).await?;
        http::into_body(response, resource)
    }

    fn parse_json<'a, T: Deserialize<'a>>(body: &'a [u8], what: &str) -> VariResult<T> {
        serde_json::from_slice(body).map_err(|e| VariError::InvalidResponse {
            message: format!("failed to parse {}: {}", what, e),
        })
    }

    /// List characters matching `query`.
    pub async fn list_characters(
        &self,
        query: &CharacterQuery,
    ) -> VariResult<Vec<CharacterRecord>> {
        let key = listing_key(query);

        match self.cache.get_json(ExpiringKind::Listing, &key).await {
            Ok(Some(records)) => {
                debug!(key = %key, "listing cache hit");
                return Ok(records);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache read failed, fetching"),
        }

        let mut url = self.endpoint(&["characters"]);
        let params = query.params();
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        debug!(url = %url, "listing characters");

        let body = self.fetch(&url, "characters").await?;
        let records = Self::parse_json::<ListingBody>(&body, "character listing")?.into_records();

        if let Err(e) = self
            .cache
            .set_json(ExpiringKind::Listing, &key, &records, self.listing_ttl)
            .await
        {
            warn!(key = %key, error = %e, "failed to cache listing");
        }

        Ok(records)
    }

    /// Fetch a single character record.
    pub async fn get_character(&self, id: &str) -> VariResult<CharacterRecord> {
        let key = record_key(id);

        match self.cache.get_json(ExpiringKind::Record, &key).await {
            Ok(Some(record)) => {
                debug!(id, "record cache hit");
                return Ok(record);
            }
            Ok(None) => {}
            Err(e) => warn!(id, error = %e, "cache read failed, fetching"),
        }

        let url = self.endpoint(&["characters", id]);
        debug!(url = %url, "fetching character");

        let body = self.fetch(&url, &format!("character {}", id)).await?;
        let record: CharacterRecord = Self::parse_json(&body, "character record")?;

        if let Err(e) = self
            .cache
            .set_json(ExpiringKind::Record, &key, &record, self.record_ttl)
            .await
        {
            warn!(id, error = %e, "failed to cache record");
        }

        Ok(record)
    }

    /// Fetch and unpack a model bundle.
    ///
    /// Bundles are cached without expiry. Only bundles that decode cleanly
    /// are written to the cache.
    pub async fn get_model(&self, identifier: &str, variant: &str) -> VariResult<UnpackedModel> {
        let key = model_key(identifier, variant);

        match self.cache.get_durable(&key).await {
            Ok(Some(data)) => match decode_model(data, identifier, variant) {
                Ok(model) => {
                    debug!(key = %key, "model cache hit");
                    return Ok(model);
                }
                Err(e) => warn!(key = %key, error = %e, "cached bundle is invalid, refetching"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache read failed, fetching"),
        }

        let url = self.endpoint(&["models", identifier, variant]);
        debug!(url = %url, "fetching model bundle");

        let data = self
            .fetch(&url, &format!("model {}", key))
            .await?;

        if !is_container(&data) {
            return Err(VariError::invalid_bundle(format!(
                "response for {} is not a VARI bundle ({} bytes)",
                key,
                data.len()
            )));
        }

        let model = decode_model(data.clone(), identifier, variant)?;
        debug!(
            key = %key,
            files = model.files.len(),
            bytes = model.byte_len,
            "decoded model bundle"
        );

        if let Err(e) = self.cache.set_durable(&key, data).await {
            warn!(key = %key, error = %e, "failed to cache model bundle");
        }

        Ok(model)
    }

    /// Empty every cache kind.
    pub async fn clear_cache(&self) -> VariResult<()> {
        self.cache.clear().await
    }

    pub async fn cache_stats(&self) -> VariResult<CacheStats> {
        self.cache.stats().await
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    /// Refill the limiter and fail every queued request.
    pub fn reset_rate_limiter(&self) {
        self.limiter.reset();
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}
