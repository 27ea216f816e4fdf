//! Raw tile retrieval.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use reqwest::header::{HeaderName, CACHE_CONTROL, EXPIRES};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::FetchError;
use crate::tile::ExpiryData;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw bytes plus the cache headers that came with them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    /// Empty when the source has no tile at this address.
    pub data: Bytes,
    pub expiry: ExpiryData,
}

impl FetchResponse {
    pub fn new(data: Bytes, expiry: ExpiryData) -> Self {
        Self { data, expiry }
    }

    /// A "no tile here" response.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Retrieves raw tile bytes by URL.
///
/// Implementations must return [`FetchError::Cancelled`] promptly once
/// `cancel` fires. The trait is dyn-compatible so workers can hold an
/// `Arc<dyn TileFetcher>`.
pub trait TileFetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>>;
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("tileflow/{}", crate::VERSION),
        }
    }
}

impl HttpFetcherConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// [`TileFetcher`] backed by an async reqwest client.
///
/// 404 and 204 responses are "no data" rather than failures: the source
/// simply has no tile at that address.
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new(config: &HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let expiry = ExpiryData::new(header(CACHE_CONTROL), header(EXPIRES));

        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            trace!(url, status = status.as_u16(), "No tile at address");
            return Ok(FetchResponse::new(Bytes::new(), expiry));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: format!("failed to read body: {}", e),
        })?;
        debug!(url, bytes = data.len(), "Fetched tile");
        Ok(FetchResponse::new(data, expiry))
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = self.get(url) => result,
            }
        })
    }
}

type Generator = Box<dyn Fn(&str) -> Option<Bytes> + Send + Sync>;

/// In-memory [`TileFetcher`] for tests and the synthetic demo source.
///
/// Responses are looked up by exact URL, then produced by the optional
/// generator; anything else is an empty ("no tile") response. Failures can
/// be injected per URL.
pub struct MemoryFetcher {
    responses: DashMap<String, FetchResponse>,
    failures: DashMap<String, FetchError>,
    generator: Option<Generator>,
    default_expiry: ExpiryData,
    latency: Duration,
    fetches: AtomicU64,
    per_url: DashMap<String, u64>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self {
            responses: DashMap::new(),
            failures: DashMap::new(),
            generator: None,
            default_expiry: ExpiryData::default(),
            latency: Duration::ZERO,
            fetches: AtomicU64::new(0),
            per_url: DashMap::new(),
        }
    }

    /// A fetcher that answers every URL with the URL's own bytes.
    pub fn synthetic() -> Self {
        Self::new().with_generator(|url| Some(Bytes::copy_from_slice(url.as_bytes())))
    }

    pub fn with_generator(
        mut self,
        generator: impl Fn(&str) -> Option<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    /// Simulated network latency applied to every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Cache headers attached to generated responses.
    pub fn with_expiry(mut self, expiry: ExpiryData) -> Self {
        self.default_expiry = expiry;
        self
    }

    pub fn insert(&self, url: impl Into<String>, response: FetchResponse) {
        self.responses.insert(url.into(), response);
    }

    /// Make every fetch of `url` fail with `error` until cleared.
    pub fn fail(&self, url: impl Into<String>, error: FetchError) {
        self.failures.insert(url.into(), error);
    }

    pub fn clear_failure(&self, url: &str) {
        self.failures.remove(url);
    }

    /// Total fetches started.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn fetch_count_for(&self, url: &str) -> u64 {
        self.per_url.get(url).map(|count| *count).unwrap_or(0)
    }

    fn respond(&self, url: &str) -> Result<FetchResponse, FetchError> {
        if let Some(error) = self.failures.get(url) {
            return Err(error.clone());
        }
        if let Some(response) = self.responses.get(url) {
            return Ok(response.clone());
        }
        let data = self
            .generator
            .as_ref()
            .and_then(|generate| generate(url))
            .unwrap_or_default();
        Ok(FetchResponse::new(data, self.default_expiry.clone()))
    }
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFetcher")
            .field("responses", &self.responses.len())
            .field("failures", &self.failures.len())
            .field("latency", &self.latency)
            .field("fetches", &self.fetch_count())
            .finish()
    }
}

impl TileFetcher for MemoryFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            *self.per_url.entry(url.to_string()).or_insert(0) += 1;
            if !self.latency.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(self.latency) => {}
                }
            } else if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.respond(url)
        })
    }
}
