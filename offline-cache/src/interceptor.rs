//! Fetch Interceptor
//!
//! Decides, per request, whether to serve from the cache, the network, or
//! a fallback route.
//!
//! ## Navigation
//!
//! Network first with a bounded timeout. Successful responses are served
//! and cached opportunistically; on failure the navigation fallback route
//! is served, or `ServeError::NoFallbackAvailable`.
//!
//! ## Sub-resources
//!
//! Cache first. A hit never touches the network. A miss goes to the network
//! and 2xx `GET` responses are written back; concurrent misses for the same
//! key share one fetch and one write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::entry::CacheEntry;
use crate::error::{NetworkError, ServeError};
use crate::fallback::{FallbackTable, RequestClass};
use crate::http::{Request, RequestMethod, Response};
use crate::key::{CacheKey, KeyOptions};
use crate::network::{fetch_with_timeout, Fetcher, DEFAULT_TIMEOUT};
use crate::store::CacheStore;

// ── Types ───────────────────────────────────────────────────────────

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Cache,
    Network,
    /// A fallback route entry standing in for the requested resource.
    Fallback,
}

/// Why a network response was not written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Method(RequestMethod),
    Status(u16),
    ContentType(String),
    Authenticated,
    NoStore,
    /// The request could not be turned into a cache key.
    Unkeyable,
}

/// What happened to the cache as a side effect of serving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    NotAttempted,
    Stored,
    Skipped(SkipReason),
    /// The store rejected the write; the response was still served.
    Failed(String),
}

/// A response together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub response: Response,
    pub source: FetchSource,
    pub cache_write: CacheWrite,
}

impl InterceptedResponse {
    fn new(response: Response, source: FetchSource, cache_write: CacheWrite) -> Self {
        Self {
            response,
            source,
            cache_write,
        }
    }

    fn from_entry(entry: &CacheEntry, source: FetchSource) -> Self {
        Self::new(entry.to_response(), source, CacheWrite::NotAttempted)
    }
}

/// Responses the interceptor serves but never caches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheExclusions {
    /// Content-type prefixes, e.g. `"application/json"`.
    pub content_types: Vec<String>,
    /// Skip requests carrying `Authorization` or `Cookie`.
    pub authenticated: bool,
    /// Honour `Cache-Control: no-store` and `private`.
    pub respect_no_store: bool,
}

impl CacheExclusions {
    /// Why `response` to `request` must not be cached, if it must not.
    pub fn skip_reason(&self, request: &Request, response: &Response) -> Option<SkipReason> {
        if self.authenticated && request.has_credentials() {
            return Some(SkipReason::Authenticated);
        }

        if self.respect_no_store {
            if let Some(cache_control) = response.header("cache-control") {
                let no_store = cache_control
                    .split(',')
                    .map(|d| d.trim().to_ascii_lowercase())
                    .any(|d| d == "no-store" || d == "private");
                if no_store {
                    return Some(SkipReason::NoStore);
                }
            }
        }

        let content_type = response.content_type().to_ascii_lowercase();
        self.content_types
            .iter()
            .find(|prefix| content_type.starts_with(&prefix.to_ascii_lowercase()))
            .map(|prefix| SkipReason::ContentType(prefix.clone()))
    }
}

/// Tunables for request handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptPolicy {
    /// Bound on each network attempt.
    pub timeout: Duration,
    /// Treat non-2xx navigation responses as failures.
    pub navigation_requires_success: bool,
    /// Try the request's own cache entry before the navigation fallback.
    pub navigation_cache_lookup: bool,
    /// Refresh cache hits older than this from the network.
    pub max_age: Option<Duration>,
    /// Share one fetch between concurrent misses for the same key.
    pub deduplicate: bool,
    pub exclusions: CacheExclusions,
}

impl Default for InterceptPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            navigation_requires_success: true,
            navigation_cache_lookup: false,
            max_age: None,
            deduplicate: true,
            exclusions: CacheExclusions::default(),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptorStats {
    pub cache_hits: u64,
    pub network_fetches: u64,
    pub deduplicated: u64,
    pub fallbacks_served: u64,
    pub cache_writes: u64,
    pub cache_write_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    network_fetches: AtomicU64,
    deduplicated: AtomicU64,
    fallbacks_served: AtomicU64,
    cache_writes: AtomicU64,
    cache_write_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> InterceptorStats {
        InterceptorStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            fallbacks_served: self.fallbacks_served.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
        }
    }
}

// ── In-flight table ─────────────────────────────────────────────────

type FlightOutcome = Result<(Response, CacheWrite), NetworkError>;
type Flight = Shared<BoxFuture<'static, FlightOutcome>>;
type FlightTable = spin::Mutex<HashMap<CacheKey, (u64, WeakShared<BoxFuture<'static, FlightOutcome>>)>>;

/// Removes its table slot when the flight finishes or is abandoned.
struct FlightSlot {
    table: Arc<FlightTable>,
    key: CacheKey,
    id: u64,
}

impl Drop for FlightSlot {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if table.get(&self.key).map(|(id, _)| *id) == Some(self.id) {
            table.remove(&self.key);
        }
    }
}

// ── Interceptor ─────────────────────────────────────────────────────

struct Inner {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    policy: InterceptPolicy,
    counters: Counters,
}

impl Inner {
    /// Look up `key`, then its form without `Vary` values. Manifest and
    /// fallback entries are stored without request headers.
    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.store.get(key).or_else(|| {
            key.without_vary()
                .and_then(|bare| self.store.get(&bare))
        })
    }

    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        Counters::bump(&self.counters.network_fetches);
        fetch_with_timeout(self.fetcher.as_ref(), request, self.policy.timeout).await
    }

    /// Write a network response back to the store if it qualifies.
    fn write_back(&self, key: &CacheKey, request: &Request, response: &Response) -> CacheWrite {
        if !request.method.is_cacheable() {
            return CacheWrite::Skipped(SkipReason::Method(request.method));
        }
        if !response.ok() {
            return CacheWrite::Skipped(SkipReason::Status(response.status));
        }
        if let Some(reason) = self.policy.exclusions.skip_reason(request, response) {
            log::debug!("not caching {}: {:?}", key, reason);
            return CacheWrite::Skipped(reason);
        }

        let entry = CacheEntry::from_response(key.clone(), response);
        match self.store.put(key.clone(), entry) {
            Ok(_) => {
                Counters::bump(&self.counters.cache_writes);
                CacheWrite::Stored
            }
            Err(e) => {
                Counters::bump(&self.counters.cache_write_failures);
                log::warn!("cache write for {} failed: {}", key, e);
                CacheWrite::Failed(e.to_string())
            }
        }
    }

    async fn fetch_and_store(&self, key: &CacheKey, request: &Request) -> FlightOutcome {
        let response = self.fetch(request).await?;
        let write = self.write_back(key, request, &response);
        Ok((response, write))
    }
}

/// Per-request router over a store, a network collaborator and fallback
/// routes.
pub struct FetchInterceptor {
    inner: Arc<Inner>,
    origin: Url,
    key_options: KeyOptions,
    fallbacks: FallbackTable,
    inflight: Arc<FlightTable>,
    next_flight: AtomicU64,
}

impl FetchInterceptor {
    /// Create an interceptor with the default policy and no fallback routes.
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>, origin: Url) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                policy: InterceptPolicy::default(),
                counters: Counters::default(),
            }),
            origin,
            key_options: KeyOptions::default(),
            fallbacks: FallbackTable::new(),
            inflight: Arc::new(spin::Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(1),
        }
    }

    /// Replace the policy. Counters start from zero.
    pub fn with_policy(self, policy: InterceptPolicy) -> Self {
        let inner = Inner {
            store: self.inner.store.clone(),
            fetcher: self.inner.fetcher.clone(),
            policy,
            counters: Counters::default(),
        };
        Self {
            inner: Arc::new(inner),
            ..self
        }
    }

    /// Set fallback routes
    pub fn with_fallbacks(mut self, fallbacks: FallbackTable) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Set how requests map onto cache keys
    pub fn with_key_options(mut self, options: KeyOptions) -> Self {
        self.key_options = options;
        self
    }

    /// Get policy
    pub fn policy(&self) -> &InterceptPolicy {
        &self.inner.policy
    }

    /// Get fallback routes
    pub fn fallbacks(&self) -> &FallbackTable {
        &self.fallbacks
    }

    /// Get the backing store
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    /// Snapshot of the request counters.
    pub fn stats(&self) -> InterceptorStats {
        self.inner.counters.snapshot()
    }

    /// Number of fetches currently shared through the in-flight table.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Serve `request`.
    pub async fn handle(&self, request: &Request) -> Result<InterceptedResponse, ServeError> {
        let outbound = self.outbound(request);
        let key = match CacheKey::for_request(request, Some(&self.origin), &self.key_options) {
            Ok(key) => Some(key),
            Err(e) => {
                log::debug!("serving {} uncached: {}", request.url, e);
                None
            }
        };

        match RequestClass::of(request) {
            RequestClass::Navigation => self.navigate(&outbound, key).await,
            RequestClass::SubResource => self.sub_resource(&outbound, key).await,
        }
    }

    /// Forward `request` to the network without touching the cache.
    pub async fn passthrough(&self, request: &Request) -> Result<InterceptedResponse, ServeError> {
        let outbound = self.outbound(request);
        match self.inner.fetch(&outbound).await {
            Ok(response) => Ok(InterceptedResponse::new(
                response,
                FetchSource::Network,
                CacheWrite::NotAttempted,
            )),
            Err(cause) => Err(ServeError::ResourceUnavailable {
                url: outbound.url,
                cause,
            }),
        }
    }

    /// The request with its URL resolved against the origin.
    fn outbound(&self, request: &Request) -> Request {
        let mut outbound = request.clone();
        if Url::parse(&request.url).is_err() {
            if let Ok(resolved) = self.origin.join(&request.url) {
                outbound.url = resolved.to_string();
            }
        }
        outbound
    }

    async fn navigate(
        &self,
        request: &Request,
        key: Option<CacheKey>,
    ) -> Result<InterceptedResponse, ServeError> {
        let failure = match self.inner.fetch(request).await {
            Ok(response) if response.ok() || !self.inner.policy.navigation_requires_success => {
                let write = match &key {
                    Some(key) => self.inner.write_back(key, request, &response),
                    None => CacheWrite::Skipped(SkipReason::Unkeyable),
                };
                return Ok(InterceptedResponse::new(response, FetchSource::Network, write));
            }
            Ok(response) => NetworkError::Status {
                status: response.status,
            },
            Err(e) => e,
        };

        log::info!("navigation to {} failed: {}", request.url, failure);

        if self.inner.policy.navigation_cache_lookup {
            if let Some(entry) = key.as_ref().and_then(|k| self.inner.lookup(k)) {
                Counters::bump(&self.inner.counters.cache_hits);
                return Ok(InterceptedResponse::from_entry(&entry, FetchSource::Cache));
            }
        }

        self.serve_fallback(RequestClass::Navigation)
            .ok_or_else(|| ServeError::NoFallbackAvailable {
                url: request.url.clone(),
            })
    }

    async fn sub_resource(
        &self,
        request: &Request,
        key: Option<CacheKey>,
    ) -> Result<InterceptedResponse, ServeError> {
        let Some(key) = key else {
            return match self.inner.fetch(request).await {
                Ok(response) => Ok(InterceptedResponse::new(
                    response,
                    FetchSource::Network,
                    CacheWrite::Skipped(SkipReason::Unkeyable),
                )),
                Err(cause) => self.unavailable(request, cause),
            };
        };

        let mut stale = None;
        if request.method.is_cacheable() {
            if let Some(entry) = self.inner.lookup(&key) {
                if self.is_fresh(&entry) {
                    Counters::bump(&self.inner.counters.cache_hits);
                    log::trace!("cache hit {}", key);
                    return Ok(InterceptedResponse::from_entry(&entry, FetchSource::Cache));
                }
                log::debug!("revalidating stale entry {}", key);
                stale = Some(entry);
            }
        }

        // Credentialed responses may be personal and are never shared.
        let shared = self.inner.policy.deduplicate
            && request.method.is_cacheable()
            && !request.has_credentials();
        let outcome = if shared {
            self.join_flight(key, request).await
        } else {
            self.inner.fetch_and_store(&key, request).await
        };

        match outcome {
            Ok((response, write)) => Ok(InterceptedResponse::new(
                response,
                FetchSource::Network,
                write,
            )),
            Err(cause) => {
                if let Some(entry) = stale {
                    Counters::bump(&self.inner.counters.cache_hits);
                    log::debug!("serving stale {} after {}", entry.key, cause);
                    return Ok(InterceptedResponse::from_entry(&entry, FetchSource::Cache));
                }
                self.unavailable(request, cause)
            }
        }
    }

    fn unavailable(
        &self,
        request: &Request,
        cause: NetworkError,
    ) -> Result<InterceptedResponse, ServeError> {
        log::debug!("{} unavailable: {}", request.url, cause);
        self.serve_fallback(RequestClass::SubResource)
            .ok_or_else(|| ServeError::ResourceUnavailable {
                url: request.url.clone(),
                cause,
            })
    }

    fn serve_fallback(&self, class: RequestClass) -> Option<InterceptedResponse> {
        let route = self.fallbacks.route(class)?;
        let Some(entry) = self.inner.store.get(&route.key) else {
            log::warn!("fallback route {} is not cached", route.key);
            return None;
        };
        Counters::bump(&self.inner.counters.fallbacks_served);
        Some(InterceptedResponse::from_entry(&entry, FetchSource::Fallback))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let Some(max_age) = self.inner.policy.max_age else {
            return true;
        };
        match entry.age(chrono::Utc::now()).to_std() {
            Ok(age) => age <= max_age,
            // Stored in the future relative to our clock.
            Err(_) => true,
        }
    }

    /// Join the in-flight fetch for `key`, starting one if none is running.
    fn join_flight(&self, key: CacheKey, request: &Request) -> Flight {
        let mut table = self.inflight.lock();
        if let Some(flight) = table.get(&key).and_then(|(_, weak)| weak.upgrade()) {
            Counters::bump(&self.inner.counters.deduplicated);
            log::trace!("joining in-flight fetch for {}", key);
            return flight;
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let slot = FlightSlot {
            table: self.inflight.clone(),
            key: key.clone(),
            id,
        };
        let inner = self.inner.clone();
        let request = request.clone();
        let table_key = key.clone();
        let flight = async move {
            let _slot = slot;
            inner.fetch_and_store(&key, &request).await
        }
        .boxed()
        .shared();

        if let Some(weak) = flight.downgrade() {
            table.insert(table_key, (id, weak));
        }
        flight
    }
}
