//! HTTP layer: the transport seam and status mapping.
//!
//! This is the ONLY place for status code handling. client/mod.rs never
//! interprets status codes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::error::{VariError, VariResult};
use crate::types::ClientConfig;

const USER_AGENT_VALUE: &str = concat!("vari-client/", env!("CARGO_PKG_VERSION"));

/// A completed fetch, before status interpretation.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Content-Length header, when the server sent one.
    pub content_length: Option<u64>,
    /// Retry-After header in seconds, when present.
    pub retry_after: Option<Duration>,
    pub body: Bytes,
}

/// Byte-level fetch capability.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, url: &str) -> VariResult<TransportResponse>;
}

/// [`Transport`] over reqwest. Bodies are read chunk by chunk and capped.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_body_bytes: u64,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> VariResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| VariError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            max_body_bytes: config.max_bundle_bytes,
        })
    }

    fn too_large(&self, size: u64) -> VariError {
        VariError::InvalidResponse {
            message: format!(
                "response body of {} bytes exceeds limit of {}",
                size, self.max_body_bytes
            ),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> VariResult<TransportResponse> {
        debug!(url, "GET");
        let mut response = self.client.get(url).send().await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if let Some(len) = content_length {
            if len > self.max_body_bytes {
                return Err(self.too_large(len));
            }
        }

        let mut body = BytesMut::with_capacity(content_length.unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await.map_err(|e| VariError::Network {
            message: format!("failed to read response body: {}", e),
        })? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_body_bytes {
                return Err(self.too_large(body.len() as u64));
            }
        }

        if let Some(expected) = content_length {
            if body.len() as u64 != expected {
                warn!(
                    url,
                    expected,
                    received = body.len(),
                    "body length differs from content-length"
                );
            }
        }

        Ok(TransportResponse {
            status,
            content_length,
            retry_after,
            body: body.freeze(),
        })
    }
}

/// Map a response to its body or the matching error.
pub(crate) fn into_body(response: TransportResponse, resource: &str) -> VariResult<Bytes> {
    match response.status {
        200..=299 => Ok(response.body),

        404 => Err(VariError::NotFound {
            resource: resource.to_string(),
        }),

        429 => {
            debug!(resource, retry_after = ?response.retry_after, "server rate limited");
            Err(VariError::RateLimited {
                reason: "server returned 429".to_string(),
                retry_after: response.retry_after,
            })
        }

        status => {
            let text: String = String::from_utf8_lossy(&response.body)
                .chars()
                .take(200)
                .collect();
            Err(VariError::Network {
                message: format!("HTTP {}: {}", status, text),
            })
        }
    }
}
