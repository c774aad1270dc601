//! KPIO offline request cache
//!
//! A durable, generation-based response cache with an offline fallback
//! layer for web apps:
//!
//! - [`store`]: generations of cached entries behind an atomic active pointer
//! - [`population`]: seeds a new generation from a manifest
//! - [`interceptor`]: per-request routing between cache, network and fallbacks
//! - [`eviction`]: keeps a generation within its byte capacity
//! - [`worker`]: install/activate/fetch hooks for the host
//!
//! The crate performs no network I/O of its own; hosts provide a
//! [`Fetcher`]. Logging goes through the `log` facade.

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod fallback;
pub mod http;
pub mod interceptor;
pub mod key;
pub mod lifecycle;
pub mod network;
pub mod population;
pub mod store;
pub mod worker;

pub use backend::{FsBackend, MemoryBackend, StorageBackend};
pub use config::OfflineCacheConfig;
pub use entry::{CacheEntry, GenerationId, GenerationInfo};
pub use error::{
    ConfigError, EvictionError, LifecycleError, NetworkError, PopulationError, ServeError,
    StoreError, WorkerError,
};
pub use eviction::EvictionManager;
pub use fallback::{FallbackRoute, FallbackTable, RequestClass};
pub use http::{Request, RequestMethod, RequestMode, Response};
pub use interceptor::{
    CacheExclusions, CacheWrite, FetchInterceptor, FetchSource, InterceptPolicy,
    InterceptedResponse, InterceptorStats, SkipReason,
};
pub use key::{CacheKey, KeyOptions};
pub use lifecycle::{LifecycleEvent, WorkerState};
pub use network::Fetcher;
pub use population::{PopulationPolicy, PopulationReport, Populator};
pub use store::{CacheStore, GenerationHandle, PutOutcome, StoreOptions};
pub use worker::{InitOutcome, OfflineWorker};
