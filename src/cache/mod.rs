//! Cache module for storing fetched response bodies on disk
//!
//! Requests are fingerprinted into a [`CacheKey`], bodies are persisted by the
//! [`CacheStore`] under a namespace directory, and the [`Sweeper`] wipes a
//! namespace on a fixed interval. Entries carry no timestamps; expiry is
//! whole-namespace only.

mod key;
mod store;
mod sweeper;

pub use key::{fingerprint, CacheKey, FingerprintPolicy};
pub use store::{CacheStore, StoreError};
pub use sweeper::Sweeper;
