//! Errors surfaced by [`CachedClient::request`](crate::client::CachedClient::request)

use std::sync::Arc;

use thiserror::Error;

use crate::cache::{CacheKey, StoreError};
use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum RequestError {
    /// The network fetch failed; nothing was cached
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The fetch succeeded but the body could not be persisted
    ///
    /// The fetched body is carried along so callers can still use it.
    #[error("fetched {key} but failed to cache the response: {source}")]
    StoreWrite {
        key: CacheKey,
        body: String,
        #[source]
        source: StoreError,
    },

    /// Failure of a fetch shared with another concurrent request
    #[error(transparent)]
    Shared(Arc<RequestError>),
}

impl RequestError {
    /// Body obtained before the failure, if any
    pub fn fetched_body(&self) -> Option<&str> {
        match self {
            RequestError::StoreWrite { body, .. } => Some(body),
            RequestError::Shared(inner) => inner.fetched_body(),
            _ => None,
        }
    }

    pub fn is_fetch(&self) -> bool {
        match self {
            RequestError::Fetch(_) => true,
            RequestError::Shared(inner) => inner.is_fetch(),
            _ => false,
        }
    }

    pub fn is_store_write(&self) -> bool {
        match self {
            RequestError::StoreWrite { .. } => true,
            RequestError::Shared(inner) => inner.is_store_write(),
            _ => false,
        }
    }
}
