//! Client for the Vari character API.
//!
//! This crate provides:
//!
//! - Token-bucket rate limiting with a bounded FIFO wait queue
//! - A codec for the `VARI` model bundle container
//! - Local caching with expiring (listings, records) and durable (models) kinds
//! - A client composing the above over HTTP
//!
//! # Quick Start
//!
//! ```no_run
//! use vari_client::{CharacterQuery, VariClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Create client from environment
//! let client = VariClient::from_env().await?;
//!
//! let mages = client
//!     .list_characters(&CharacterQuery::new().with_search("mage"))
//!     .await?;
//!
//! if let Some(first) = mages.first() {
//!     let model = client.get_model(&first.id, "default").await?;
//!     println!("{} files, atlas:\n{}", model.files.len(), model.atlas_text()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `VARI_API_URL` | API base URL (default: `https://api.vari.dev/v1`) |
//! | `VARI_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `VARI_REQUESTS_PER_SECOND` | Token refill rate (default: 5) |
//! | `VARI_MAX_BURST` | Bucket capacity (default: 10) |
//! | `VARI_QUEUE_REQUESTS` | Wait for a token instead of failing (default: true) |
//! | `VARI_MAX_QUEUE_SIZE` | Maximum waiting requests (default: 100) |
//! | `VARI_CACHE_DIR` | Persistent cache directory |
//! | `VARI_MEMORY_CACHE` | Keep the cache in memory only |

pub mod bundle;
pub mod cache;
pub mod client;
pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod types;

// Re-export main types
pub use bundle::{
    decode, decode_model, encode, extract_named_parts, is_container, read_header, BundleFiles,
    BundleHeader, BundleWriter, NamedParts, UnpackedModel,
};
pub use cache::{
    BackendKind, CacheBackend, CacheStats, CacheStore, ExpiringKind, MemoryBackend,
    PersistentBackend,
};
pub use client::{HttpTransport, Transport, TransportResponse, VariClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{VariError, VariResult};
pub use rate_limit::{RateLimitStatus, RateLimiter, RateLimiterConfig};
pub use types::{CharacterQuery, CharacterRecord, ClientConfig};
