//! cachedget
//!
//! HTTP(S) GET retrieval backed by a persistent response cache. Requests are
//! fingerprinted from their URL and headers; a stored body is returned without
//! touching the network, and a background sweeper wipes the cache on a fixed
//! interval.
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = cachedget::CachedClient::with_defaults().ok_or("no cache directory")?;
//! client.start_cache_clear();
//! let body = client.request("https://example.com/", &HashMap::new()).await?;
//! println!("{body}");
//! client.stop_cache_clear();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetch;

#[cfg(test)]
mod test_utils;

pub use client::CachedClient;
pub use config::{OptionsUpdate, RequestOptions};
pub use error::RequestError;
pub use fetch::{FetchError, Fetcher, HttpFetcher};
