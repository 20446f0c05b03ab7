//! Runtime options for [`CachedClient`](crate::client::CachedClient)

use std::time::Duration;

use serde::Deserialize;

use crate::cache::FingerprintPolicy;

/// Default sweep interval: one hour
pub const DEFAULT_TIME_INTERVAL: Duration = Duration::from_millis(60 * 60 * 1000);

/// Namespace holding cached URL responses
pub const URLS_NAMESPACE: &str = "urls";

/// Effective configuration of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Serve from and write to the cache
    pub use_cache: bool,
    /// How often the sweeper wipes the cache
    pub time_interval: Duration,
    /// How requests are fingerprinted
    pub fingerprint: FingerprintPolicy,
    /// Share one fetch between concurrent misses for the same key
    pub single_flight: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            time_interval: DEFAULT_TIME_INTERVAL,
            fingerprint: FingerprintPolicy::default(),
            single_flight: false,
        }
    }
}

impl RequestOptions {
    /// Returns these options with every field set in `update` replaced
    pub fn merge(self, update: &OptionsUpdate) -> Self {
        Self {
            use_cache: update.use_cache.unwrap_or(self.use_cache),
            time_interval: update
                .time_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(self.time_interval),
            fingerprint: update.fingerprint.unwrap_or(self.fingerprint),
            single_flight: update.single_flight.unwrap_or(self.single_flight),
        }
    }
}

/// Partial options; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsUpdate {
    pub use_cache: Option<bool>,
    pub time_interval_ms: Option<u64>,
    pub fingerprint: Option<FingerprintPolicy>,
    pub single_flight: Option<bool>,
}

impl OptionsUpdate {
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    pub fn time_interval(mut self, interval: Duration) -> Self {
        self.time_interval_ms = Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn fingerprint(mut self, policy: FingerprintPolicy) -> Self {
        self.fingerprint = Some(policy);
        self
    }

    pub fn single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = Some(single_flight);
        self
    }
}
