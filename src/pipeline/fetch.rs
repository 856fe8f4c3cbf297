use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::retry::RetryPolicy;

/// Typed failure for a network fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("http status {status}")]
    Status { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Transient failures are retried with backoff; everything else is
    /// classified fatal for the document immediately. 429 is the one 4xx
    /// worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Status { status } => *status >= 500 || *status == 429,
            FetchError::InvalidUrl(_) | FetchError::Dns(_) => false,
        }
    }
}

/// Raw bytes plus the transport metadata the classifier needs.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub bytes: Vec<u8>,
    pub status: u16,
    /// Content-Type header with parameters stripped.
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPayload, FetchError>;
}

/// `reqwest`-backed fetcher with bounded retry/backoff.
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(timeout: std::time::Duration, retry: RetryPolicy) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| crate::error::IngestError::ConfigError(e.to_string()))?;
        Ok(HttpFetcher { client, retry })
    }

    async fn attempt(&self, url: &str) -> std::result::Result<FetchedPayload, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        // Upstream metadata is known to carry badly percent-encoded URLs;
        // on a 404 retry with '%' stripped, then with '%' re-encoded.
        if response.status().as_u16() == 404 && url.contains('%') {
            for mutated in [url.replace('%', ""), url.replace('%', "%25")] {
                debug!(original = url, mutated = %mutated, "retrying 404 with mutated url");
                response = self
                    .client
                    .get(&mutated)
                    .send()
                    .await
                    .map_err(map_reqwest_error)?;
                if response.status().as_u16() != 404 {
                    break;
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        let status_code = status.as_u16();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(FetchedPayload {
            bytes: bytes.to_vec(),
            status: status_code,
            content_type,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPayload, FetchError> {
        reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let payload = self
            .retry
            .run("fetch", FetchError::is_transient, || self.attempt(url))
            .await?;
        info!(
            url,
            status = payload.status,
            bytes = payload.bytes.len(),
            content_type = payload.content_type.as_deref().unwrap_or(""),
            "fetched source document"
        );
        Ok(payload)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout;
    }
    let chain = error_chain(&err);
    if chain.contains("dns") {
        return FetchError::Dns(chain);
    }
    FetchError::Network(chain)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ").to_lowercase()
}
