use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use url::Url;

use crate::util::validate_url;

/// Default response body limit (10MB)
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

/// Errors that can occur while retrieving feed bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP response with a non-2xx status code
    #[error("HTTP error: status {0}")]
    NonSuccessStatus(u16),
    /// The fetch did not finish within the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// The feed URL was rejected before any request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
}

/// Where raw feed bytes come from.
///
/// The sync engine only depends on this trait, so tests and alternative
/// transports can stand in for the HTTP gateway.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns the raw body of the feed at `feed_url`.
    async fn fetch(&self, feed_url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches feeds over HTTP, optionally through a fetch gateway.
///
/// With a gateway configured, requests go to `GET {gateway}?url=<feed url>`
/// and the gateway relays the upstream status and body. Without one, the
/// feed URL is requested directly after SSRF validation.
#[derive(Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    gateway: Option<Url>,
    max_bytes: usize,
    allow_private_hosts: bool,
}

impl HttpFeedSource {
    /// Direct fetching, no gateway.
    pub fn direct(client: reqwest::Client) -> Self {
        Self {
            client,
            gateway: None,
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            allow_private_hosts: false,
        }
    }

    /// Fetching through the gateway at `gateway_url` (e.g. `http://localhost:8000/proxy`).
    pub fn via_gateway(client: reqwest::Client, gateway_url: &str) -> Result<Self, FetchError> {
        let gateway =
            Url::parse(gateway_url).map_err(|e| FetchError::InvalidUrl(format!("gateway: {e}")))?;
        Ok(Self {
            client,
            gateway: Some(gateway),
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            allow_private_hosts: false,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Permits direct fetches of localhost and private-range hosts.
    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    fn request_url(&self, feed_url: &str) -> Result<Url, FetchError> {
        match &self.gateway {
            Some(gateway) => {
                let mut url = gateway.clone();
                url.query_pairs_mut().append_pair("url", feed_url);
                Ok(url)
            }
            None => validate_url(feed_url, self.allow_private_hosts)
                .map_err(|e| FetchError::InvalidUrl(e.to_string())),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed_url: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.request_url(feed_url)?;
        tracing::debug!(feed = %feed_url, request = %url, "Fetching feed");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::NonSuccessStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
