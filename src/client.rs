//! Cached GET client
//!
//! [`CachedClient`] decides per request whether to answer from the
//! [`CacheStore`] or go to the network, writes fresh bodies back to the store,
//! and owns the [`Sweeper`] that periodically expires them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::cache::{fingerprint, CacheKey, CacheStore, StoreError, Sweeper};
use crate::config::{OptionsUpdate, RequestOptions, URLS_NAMESPACE};
use crate::error::RequestError;
use crate::fetch::{Fetcher, HttpFetcher};

type FetchFuture = BoxFuture<'static, Result<String, Arc<RequestError>>>;

/// Pending fetch registered for a key
///
/// Only callers awaiting the fetch hold it strongly; once they are all gone
/// the fetch is dropped and its [`FlightGuard`] removes this entry.
struct InFlight {
    id: u64,
    flight: WeakShared<FetchFuture>,
}

type InFlightMap = Mutex<HashMap<CacheKey, InFlight>>;

/// Unregisters a pending fetch when it completes or is dropped
struct FlightGuard {
    map: Weak<InFlightMap>,
    key: CacheKey,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let Some(map) = self.map.upgrade() else {
            return;
        };
        let mut map = map.lock();
        // A newer fetch may already own the key
        if map.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            map.remove(&self.key);
        }
    }
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    store: CacheStore,
    options: RwLock<RequestOptions>,
    sweeper: Sweeper,
    /// Pending fetches by key, used only when single-flight is enabled
    in_flight: Arc<InFlightMap>,
    next_flight_id: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.sweeper.stop();
    }
}

/// HTTP GET client backed by a persistent response cache
///
/// Cloning is cheap and shares the store, options and sweeper. Cache hits are
/// served without any freshness check; staleness is bounded only by the
/// sweeper wiping the whole cache every `time_interval`. Dropping the last
/// clone stops the sweeper.
#[derive(Clone)]
pub struct CachedClient {
    inner: Arc<Inner>,
}

impl CachedClient {
    /// Creates a client; the sweeper is not started
    pub fn new(fetcher: Arc<dyn Fetcher>, store: CacheStore, options: RequestOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                options: RwLock::new(options),
                sweeper: Sweeper::new(),
                in_flight: Arc::new(Mutex::new(HashMap::new())),
                next_flight_id: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a client using [`HttpFetcher`] and the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined.
    pub fn with_defaults() -> Option<Self> {
        let store = CacheStore::default_location()?;
        Some(Self::new(
            Arc::new(HttpFetcher::new()),
            store,
            RequestOptions::default(),
        ))
    }

    /// Fetches `url`, serving a cached body when one exists
    ///
    /// With caching disabled this is a plain fetch. Otherwise a miss fetches
    /// and stores the body.
    ///
    /// # Arguments
    /// * `url` - The URL to GET
    /// * `headers` - Request headers, also part of the cache key
    ///
    /// # Returns
    /// * `Ok(String)` - The cached or freshly fetched body
    /// * `Err(RequestError::Fetch)` - The network fetch failed; nothing was cached
    /// * `Err(RequestError::StoreWrite)` - The fetch worked but caching it
    ///   failed; the error still carries the body
    pub async fn request(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, RequestError> {
        let options = self.options();
        if !options.use_cache {
            return Ok(self.inner.fetcher.fetch(url, headers).await?);
        }

        let key = fingerprint(url, headers, options.fingerprint);
        if let Some(body) = self.inner.lookup(&key).await {
            return Ok(body);
        }

        if options.single_flight {
            self.fetch_shared(key, url, headers).await
        } else {
            fetch_and_store(self.inner.fetcher.as_ref(), &self.inner.store, &key, url, headers)
                .await
        }
    }

    /// Joins the pending fetch for `key`, or starts one others can join
    async fn fetch_shared(
        &self,
        key: CacheKey,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, RequestError> {
        let flight = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(&key).and_then(|entry| entry.flight.upgrade()) {
                Some(flight) => {
                    debug!(key = %key, "Joining in-flight fetch");
                    flight
                }
                None => {
                    let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    let guard = FlightGuard {
                        map: Arc::downgrade(&self.inner.in_flight),
                        key: key.clone(),
                        id,
                    };
                    let fetcher = Arc::clone(&self.inner.fetcher);
                    let store = self.inner.store.clone();
                    let url = url.to_string();
                    let headers = headers.clone();
                    let flight: Shared<FetchFuture> = async move {
                        let guard = guard;
                        fetch_and_store(fetcher.as_ref(), &store, &guard.key, &url, &headers)
                            .await
                            .map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    if let Some(weak) = flight.downgrade() {
                        in_flight.insert(key, InFlight { id, flight: weak });
                    }
                    flight
                }
            }
        };

        flight
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(RequestError::Shared))
    }

    /// Merges `update` into the current options and returns the result
    ///
    /// Applies to requests started afterwards. A running sweeper is
    /// restarted when the interval changes.
    ///
    /// # Arguments
    /// * `update` - Fields to change; unset fields keep their value
    ///
    /// # Returns
    /// The new effective options
    pub fn set_options(&self, update: OptionsUpdate) -> RequestOptions {
        let (previous, updated) = {
            let mut options = self.inner.options.write();
            let previous = *options;
            *options = previous.merge(&update);
            (previous, *options)
        };
        debug!(?updated, "Updated request options");

        if updated.time_interval != previous.time_interval && self.inner.sweeper.is_running() {
            self.inner.sweeper.start(
                self.inner.store.clone(),
                URLS_NAMESPACE,
                updated.time_interval,
            );
        }
        updated
    }

    /// Current effective options
    pub fn options(&self) -> RequestOptions {
        *self.inner.options.read()
    }

    /// Deletes every cached response; returns how many were removed
    pub async fn clear_cache(&self) -> Result<usize, StoreError> {
        self.inner.store.delete_all(URLS_NAMESPACE).await
    }

    /// Starts the periodic sweeper if caching is enabled
    ///
    /// Returns whether the sweeper is now running. Must be called from within
    /// a tokio runtime.
    pub fn start_cache_clear(&self) -> bool {
        let options = self.options();
        if !options.use_cache {
            debug!("Caching disabled, not starting sweeper");
            return false;
        }
        self.inner
            .sweeper
            .start(self.inner.store.clone(), URLS_NAMESPACE, options.time_interval)
    }

    /// Stops the periodic sweeper; safe to call when it is not running
    pub fn stop_cache_clear(&self) {
        self.inner.sweeper.stop();
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.inner.sweeper
    }
}

impl Inner {
    /// Reads a cached body. Any read failure counts as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<String> {
        match self.store.read(URLS_NAMESPACE, key).await {
            Ok(body) => {
                debug!(key = %key, "Cache hit");
                Some(body)
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable cache entry, fetching instead");
                None
            }
        }
    }
}

async fn fetch_and_store(
    fetcher: &dyn Fetcher,
    store: &CacheStore,
    key: &CacheKey,
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<String, RequestError> {
    let body = fetcher.fetch(url, headers).await?;
    if let Err(source) = store.create(URLS_NAMESPACE, key, &body).await {
        warn!(key = %key, error = %source, "Failed to cache fetched response");
        return Err(RequestError::StoreWrite {
            key: key.clone(),
            body,
            source,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FingerprintPolicy;
    use crate::fetch::FetchError;
    use crate::test_utils::init_test_tracing;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fetcher double that counts calls and returns a canned result
    struct ScriptedFetcher {
        calls: AtomicUsize,
        body: Option<String>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn ok(body: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                body: Some(body.to_string()),
                delay: Duration::ZERO,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                body: None,
                delay: Duration::ZERO,
            })
        }

        fn slow(body: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                body: Some(body.to_string()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.body
                .clone()
                .ok_or_else(|| FetchError::InvalidHeader("scripted failure".to_string()))
        }
    }

    const URL: &str = "https://api.example.com/v1/items?page=1";

    fn create_test_client(
        fetcher: Arc<ScriptedFetcher>,
        options: RequestOptions,
    ) -> (CachedClient, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let client = CachedClient::new(fetcher, CacheStore::new(temp_dir.path()), options);
        (client, temp_dir)
    }

    fn no_headers() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_fetch() {
        let fetcher = ScriptedFetcher::ok("from network");
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());
        let key = fingerprint(URL, &no_headers(), FingerprintPolicy::Origin);
        client
            .store()
            .create(URLS_NAMESPACE, &key, "from cache")
            .await
            .unwrap();

        let body = client.request(URL, &no_headers()).await.unwrap();

        assert_eq!(body, "from cache");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_once_and_populates_store() {
        let fetcher = ScriptedFetcher::ok("payload");
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());

        assert_eq!(client.request(URL, &no_headers()).await.unwrap(), "payload");
        assert_eq!(client.request(URL, &no_headers()).await.unwrap(), "payload");

        assert_eq!(fetcher.calls(), 1);
        let key = fingerprint(URL, &no_headers(), FingerprintPolicy::Origin);
        assert_eq!(
            client.store().read(URLS_NAMESPACE, &key).await.unwrap(),
            "payload"
        );
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fetches_and_stores_nothing() {
        let fetcher = ScriptedFetcher::ok("payload");
        let options = RequestOptions {
            use_cache: false,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher.clone(), options);

        client.request(URL, &no_headers()).await.unwrap();
        client.request(URL, &no_headers()).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert!(client.store().list_all(URLS_NAMESPACE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates_and_caches_nothing() {
        let fetcher = ScriptedFetcher::failing();
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());

        let err = client.request(URL, &no_headers()).await.unwrap_err();

        assert!(err.is_fetch(), "Expected fetch error, got {err:?}");
        assert!(err.fetched_body().is_none());
        assert!(client.store().list_all(URLS_NAMESPACE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_write_failure_is_reported_with_body() {
        let fetcher = ScriptedFetcher::ok("fetched fine");
        let (client, temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());
        // Namespace path occupied by a file: reads miss, writes fail
        std::fs::write(temp_dir.path().join(URLS_NAMESPACE), "blocker").unwrap();

        let err = client.request(URL, &no_headers()).await.unwrap_err();

        assert_eq!(fetcher.calls(), 1);
        assert!(err.is_store_write(), "Expected store write error, got {err:?}");
        assert!(!err.is_fetch());
        assert_eq!(err.fetched_body(), Some("fetched fine"));
    }

    #[tokio::test]
    async fn test_headers_select_distinct_entries() {
        let fetcher = ScriptedFetcher::ok("payload");
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());
        let mut en = HashMap::new();
        en.insert("accept-language".to_string(), "en".to_string());
        let mut fr = HashMap::new();
        fr.insert("accept-language".to_string(), "fr".to_string());

        client.request(URL, &en).await.unwrap();
        client.request(URL, &fr).await.unwrap();
        client.request(URL, &en).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(client.store().list_all(URLS_NAMESPACE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_path_only_policy_shares_entries_across_hosts() {
        let fetcher = ScriptedFetcher::ok("payload");
        let options = RequestOptions {
            fingerprint: FingerprintPolicy::PathOnly,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher.clone(), options);

        client.request("https://a.example/data", &no_headers()).await.unwrap();
        client.request("http://b.example/data?x=1", &no_headers()).await.unwrap();

        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_removes_all_entries() {
        let fetcher = ScriptedFetcher::ok("payload");
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());
        for i in 0..4 {
            client
                .request(&format!("https://api.example.com/item/{i}"), &no_headers())
                .await
                .unwrap();
        }

        let deleted = client.clear_cache().await.unwrap();

        assert_eq!(deleted, 4);
        assert!(client.store().list_all(URLS_NAMESPACE).await.unwrap().is_empty());

        client.request("https://api.example.com/item/0", &no_headers()).await.unwrap();
        assert_eq!(fetcher.calls(), 5, "Cleared entries must be fetched again");
    }

    #[tokio::test]
    async fn test_set_options_returns_effective_config_and_applies_next_call() {
        let fetcher = ScriptedFetcher::ok("payload");
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());
        client.request(URL, &no_headers()).await.unwrap();

        let updated = client.set_options(OptionsUpdate::default().use_cache(false));

        assert!(!updated.use_cache);
        assert_eq!(updated.time_interval, RequestOptions::default().time_interval);
        assert_eq!(client.options(), updated);
        client.request(URL, &no_headers()).await.unwrap();
        assert_eq!(fetcher.calls(), 2, "Disabled cache must bypass the stored entry");
    }

    #[tokio::test]
    async fn test_start_cache_clear_requires_cache_enabled() {
        let fetcher = ScriptedFetcher::ok("payload");
        let options = RequestOptions {
            use_cache: false,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher, options);

        assert!(!client.start_cache_clear());
        assert!(!client.sweeper().is_running());
    }

    #[tokio::test]
    async fn test_periodic_sweep_and_idempotent_stop() {
        let fetcher = ScriptedFetcher::ok("payload");
        let options = RequestOptions {
            time_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher, options);

        client.request(URL, &no_headers()).await.unwrap();
        assert!(client.start_cache_clear());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(client.store().list_all(URLS_NAMESPACE).await.unwrap().is_empty());

        client.stop_cache_clear();
        client.stop_cache_clear();
        client.request(URL, &no_headers()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(client.store().list_all(URLS_NAMESPACE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_interval_change_restarts_running_sweeper() {
        let fetcher = ScriptedFetcher::ok("payload");
        let (client, _temp_dir) = create_test_client(fetcher, RequestOptions::default());
        client.start_cache_clear();

        client.set_options(OptionsUpdate::default().time_interval(Duration::from_secs(60)));

        assert_eq!(client.sweeper().interval(), Some(Duration::from_secs(60)));
        client.stop_cache_clear();
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_twice_without_single_flight() {
        let fetcher = ScriptedFetcher::slow("payload", Duration::from_millis(100));
        let (client, _temp_dir) = create_test_client(fetcher.clone(), RequestOptions::default());
        let headers = no_headers();

        let (a, b) = tokio::join!(client.request(URL, &headers), client.request(URL, &headers));

        assert_eq!(a.unwrap(), "payload");
        assert_eq!(b.unwrap(), "payload");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_fetch() {
        let fetcher = ScriptedFetcher::slow("payload", Duration::from_millis(100));
        let options = RequestOptions {
            single_flight: true,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher.clone(), options);
        let headers = no_headers();

        let (a, b, c) = tokio::join!(
            client.request(URL, &headers),
            client.request(URL, &headers),
            client.request(URL, &headers)
        );

        assert_eq!(a.unwrap(), "payload");
        assert_eq!(b.unwrap(), "payload");
        assert_eq!(c.unwrap(), "payload");
        assert_eq!(fetcher.calls(), 1);
        assert!(client.inner.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_single_flight_releases_client() {
        init_test_tracing();
        let fetcher = ScriptedFetcher::slow("payload", Duration::from_millis(500));
        let options = RequestOptions {
            single_flight: true,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher.clone(), options);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), client.request(URL, &no_headers()))
                .await;
        assert!(timed_out.is_err(), "Slow fetch should still be pending");
        assert!(
            client.inner.in_flight.lock().is_empty(),
            "Abandoned fetch must unregister itself"
        );

        assert!(client.start_cache_clear());
        let sweeper = client.sweeper().clone();
        let weak_inner = Arc::downgrade(&client.inner);
        drop(client);

        assert!(weak_inner.upgrade().is_none(), "Client state must be freed");
        assert!(!sweeper.is_running(), "Dropping the client stops the sweeper");
    }

    #[tokio::test]
    async fn test_request_after_cancelled_single_flight_fetches_again() {
        let fetcher = ScriptedFetcher::slow("payload", Duration::from_millis(100));
        let options = RequestOptions {
            single_flight: true,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher.clone(), options);

        let _ = tokio::time::timeout(Duration::from_millis(50), client.request(URL, &no_headers()))
            .await;
        let body = client.request(URL, &no_headers()).await.unwrap();

        assert_eq!(body, "payload");
        assert_eq!(fetcher.calls(), 2);
        assert!(client.inner.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_shares_failures() {
        let fetcher = ScriptedFetcher::failing();
        let options = RequestOptions {
            single_flight: true,
            ..Default::default()
        };
        let (client, _temp_dir) = create_test_client(fetcher.clone(), options);
        let headers = no_headers();

        let (a, b) = tokio::join!(client.request(URL, &headers), client.request(URL, &headers));

        assert!(a.unwrap_err().is_fetch());
        assert!(b.unwrap_err().is_fetch());
        assert!(client.inner.in_flight.lock().is_empty());
    }
}
