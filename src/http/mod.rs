//! HTTP client for the ISQ portal.
//!
//! Every request goes through the [`RateLimiter`] of its host. Responses can
//! optionally be cached for the lifetime of the client; a crawl run is bounded,
//! so the cache is never evicted.

pub mod errors;
pub mod rate_limit;

pub use errors::FetchError;
pub use rate_limit::{LimiterFactory, RateLimiter, RateLimitingConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::config::duration_serde;

/// Body of a POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostBody {
    /// Sent verbatim as `application/x-www-form-urlencoded`.
    Raw(String),
    /// Form fields, sent in order.
    Form(Vec<(String, String)>),
}

impl PostBody {
    /// Build a form body from borrowed pairs.
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The urlencoded wire form; also the cache key for the payload.
    pub fn serialize(&self) -> String {
        match self {
            Self::Raw(raw) => raw.clone(),
            Self::Form(fields) => fields
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}

/// Text-returning GET/POST, the only thing the scraper needs from the network.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, FetchError>;

    async fn post(&self, url: &str, body: &PostBody) -> Result<String, FetchError>;
}

/// Client tuning read from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
    #[serde(default = "default_cache_responses")]
    pub cache_responses: bool,
}

fn default_user_agent() -> String {
    format!("isq-scraper/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_responses() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            cache_responses: default_cache_responses(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Get(String),
    Post(String, String),
}

/// Rate-limited, optionally caching portal client.
pub struct FetchClient {
    http: reqwest::Client,
    /// host -> limiter, created on first contact
    limiters: DashMap<String, RateLimiter>,
    limiter_factory: LimiterFactory,
    cache: Option<DashMap<CacheKey, Arc<str>>>,
}

impl FetchClient {
    pub fn new(config: &HttpConfig, limiter_factory: LimiterFactory) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .cookie_store(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            http,
            limiters: DashMap::new(),
            limiter_factory,
            cache: config.cache_responses.then(DashMap::new),
        })
    }

    /// Number of cached responses.
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, DashMap::len)
    }

    fn limiter_for(&self, url: &str) -> Result<RateLimiter, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        let host = parsed.host_str().unwrap_or_default().to_owned();

        // Clone out so the shard lock is not held across the request.
        let limiter = self
            .limiters
            .entry(host.clone())
            .or_insert_with(|| {
                debug!(host = host.as_str(), "Creating rate limiter");
                (self.limiter_factory)(&host)
            })
            .value()
            .clone();
        Ok(limiter)
    }

    fn cached_response(&self, key: &CacheKey) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let hit = cache.get(key).map(|body| body.to_string());
        trace!(key = ?key, hit = hit.is_some(), "Response cache lookup");
        hit
    }

    fn store_response(&self, key: CacheKey, body: &str) {
        if let Some(cache) = &self.cache {
            cache.insert(key, Arc::from(body));
        }
    }

    async fn execute(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, FetchError> {
        let limiter = self.limiter_for(url)?;
        limiter
            .run(async {
                let response = request.send().await.map_err(|source| FetchError::Connect {
                    url: url.to_owned(),
                    source,
                })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_owned(),
                        status: status.as_u16(),
                    });
                }

                let body = response.text().await.map_err(|source| FetchError::Body {
                    url: url.to_owned(),
                    source,
                })?;
                if body.trim().is_empty() {
                    return Err(FetchError::EmptyBody {
                        url: url.to_owned(),
                    });
                }
                Ok(body)
            })
            .await
    }
}

#[async_trait]
impl Fetch for FetchClient {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let key = CacheKey::Get(url.to_owned());
        if let Some(body) = self.cached_response(&key) {
            return Ok(body);
        }

        debug!(url, "GET");
        let body = self.execute(url, self.http.get(url)).await?;
        self.store_response(key, &body);
        Ok(body)
    }

    async fn post(&self, url: &str, body: &PostBody) -> Result<String, FetchError> {
        let payload = body.serialize();
        let key = CacheKey::Post(url.to_owned(), payload.clone());
        if let Some(cached) = self.cached_response(&key) {
            return Ok(cached);
        }

        debug!(url, payload = payload.as_str(), "POST");
        let request = self
            .http
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(payload);
        let response = self.execute(url, request).await?;
        self.store_response(key, &response);
        Ok(response)
    }
}
