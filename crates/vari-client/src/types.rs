//! Configuration and API types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimiterConfig;

/// A character record as served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Stable identifier, also used to address model bundles.
    pub id: String,

    /// Display name.
    pub name: String,

    #[serde(default)]
    pub rarity: Option<String>,

    /// Model variants available for this character (e.g. "default", "skin01").
    #[serde(default)]
    pub variants: Vec<String>,

    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Filters for listing characters. Absent fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterQuery {
    #[serde(default)]
    pub search: Option<String>,

    #[serde(default)]
    pub rarity: Option<String>,

    #[serde(default)]
    pub page: Option<u32>,

    #[serde(default)]
    pub limit: Option<u32>,
}

impl CharacterQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_rarity(mut self, rarity: impl Into<String>) -> Self {
        self.rarity = Some(rarity.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Present parameters as `(name, value)` in their fixed order.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(search) = &self.search {
            params.push(("search", search.clone()));
        }
        if let Some(rarity) = &self.rarity {
            params.push(("rarity", rarity.clone()));
        }
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL for the API.
    #[serde(default = "default_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(default = "default_max_burst")]
    pub max_burst: u32,

    /// Wait for a token instead of failing immediately.
    #[serde(default = "default_true")]
    pub queue_requests: bool,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Persistent cache location. `None` uses the platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Skip the persistent cache and keep everything in memory.
    #[serde(default)]
    pub disable_persistent_cache: bool,

    /// TTL for character listings.
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl_secs: u64,

    /// TTL for single character records.
    #[serde(default = "default_record_ttl")]
    pub record_ttl_secs: u64,

    /// Largest bundle body accepted from the network.
    #[serde(default = "default_max_bundle_bytes")]
    pub max_bundle_bytes: u64,
}

fn default_url() -> String {
    "https://api.vari.dev/v1".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_max_burst() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_queue_size() -> usize {
    100
}

fn default_listing_ttl() -> u64 {
    5 * 60
}

fn default_record_ttl() -> u64 {
    60 * 60
}

fn default_max_bundle_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout(),
            requests_per_second: default_requests_per_second(),
            max_burst: default_max_burst(),
            queue_requests: true,
            max_queue_size: default_max_queue_size(),
            cache_dir: None,
            disable_persistent_cache: false,
            listing_ttl_secs: default_listing_ttl(),
            record_ttl_secs: default_record_ttl(),
            max_bundle_bytes: default_max_bundle_bytes(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl ClientConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `VARI_API_URL` | API base URL |
    /// | `VARI_TIMEOUT` | Request timeout in seconds |
    /// | `VARI_REQUESTS_PER_SECOND` | Sustained request rate |
    /// | `VARI_MAX_BURST` | Token bucket capacity |
    /// | `VARI_QUEUE_REQUESTS` | Wait for a token instead of failing |
    /// | `VARI_MAX_QUEUE_SIZE` | Maximum waiting requests |
    /// | `VARI_CACHE_DIR` | Persistent cache directory |
    /// | `VARI_MEMORY_CACHE` | Use the in-memory cache only |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("VARI_API_URL").unwrap_or_else(|_| default_url()),
            timeout_secs: env_parse("VARI_TIMEOUT").unwrap_or(defaults.timeout_secs),
            requests_per_second: env_parse("VARI_REQUESTS_PER_SECOND")
                .unwrap_or(defaults.requests_per_second),
            max_burst: env_parse("VARI_MAX_BURST").unwrap_or(defaults.max_burst),
            queue_requests: env_flag("VARI_QUEUE_REQUESTS").unwrap_or(defaults.queue_requests),
            max_queue_size: env_parse("VARI_MAX_QUEUE_SIZE").unwrap_or(defaults.max_queue_size),
            cache_dir: std::env::var_os("VARI_CACHE_DIR").map(PathBuf::from),
            disable_persistent_cache: env_flag("VARI_MEMORY_CACHE")
                .unwrap_or(defaults.disable_persistent_cache),
            ..defaults
        }
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64, max_burst: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self.max_burst = max_burst;
        self
    }

    pub fn with_queue(mut self, enabled: bool, max_queue_size: usize) -> Self {
        self.queue_requests = enabled;
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Keep the cache in memory only.
    pub fn with_memory_cache(mut self) -> Self {
        self.disable_persistent_cache = true;
        self
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            requests_per_second: self.requests_per_second,
            max_burst: self.max_burst,
            queue_requests: self.queue_requests,
            max_queue_size: self.max_queue_size,
        }
    }
}
