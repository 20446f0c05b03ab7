//! Network fetcher
//!
//! The [`Fetcher`] trait is the seam between the cache and the network. The
//! default implementation, [`HttpFetcher`], issues a plain GET with `reqwest`
//! and returns the full response body as text.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while fetching a URL
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, protocol or body transfer failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A request header name or value could not be encoded
    #[error("Invalid request header '{0}'")]
    InvalidHeader(String),
}

/// Performs a GET and returns the response body
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HashMap<String, String>)
        -> Result<String, FetchError>;
}

/// `reqwest`-backed fetcher for `http` and `https` URLs
///
/// The status code is not inspected: any response that completes is returned
/// as a body, error pages included.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HttpFetcher with default settings
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create a new HttpFetcher with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, FetchError> {
        let headers = to_header_map(headers)?;
        let response = self.client.get(url).headers(headers).send().await?;
        debug!(url, status = response.status().as_u16(), "Fetched URL");
        Ok(response.text().await?)
    }
}

fn to_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.clone()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
