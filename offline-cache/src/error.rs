//! Error taxonomy for the offline cache.
//!
//! Errors are grouped by the component that raises them:
//! - **Network** (`NetworkError`): transient, retryable by the caller
//! - **Store** (`StoreError`, `EvictionError`): local to the cache, recovered
//!   by the interceptor where possible
//! - **Population** (`PopulationError`): generation-level, never touches the
//!   currently active generation
//! - **Serve** (`ServeError`): the only errors that reach the end user

use std::path::PathBuf;

use crate::entry::GenerationId;

/// Generic message shown to end users when nothing can be served.
pub const OFFLINE_MESSAGE: &str = "You appear to be offline. Please check your connection and try again.";

/// Failure of the network collaborator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network fetch timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("network unreachable")]
    Offline,

    #[error("fetch cancelled")]
    Cancelled,
}

impl NetworkError {
    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection(_) | Self::Offline => true,
            Self::Status { status } => *status >= 500,
            Self::Cancelled => false,
        }
    }
}

/// Raised by the eviction manager when capacity cannot be restored.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvictionError {
    #[error(
        "eviction impossible: {required} bytes must be freed but only {reclaimable} are evictable (capacity {capacity})"
    )]
    EvictionImpossible {
        required: u64,
        reclaimable: u64,
        capacity: u64,
    },
}

/// Failures of the cache store and its storage backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("cache quota exceeded: entry of {requested} bytes does not fit in {capacity} bytes")]
    QuotaExceeded {
        requested: u64,
        capacity: u64,
        #[source]
        source: EvictionError,
    },

    #[error("no active generation")]
    NoActiveGeneration,

    #[error("generation {0} not found")]
    GenerationNotFound(GenerationId),

    #[error("corrupt record {record}: {reason}")]
    Corrupt { record: String, reason: String },

    #[error("store was opened read-only")]
    ReadOnly,

    #[error("record encoding error: {0}")]
    Encode(#[from] postcard::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// `true` for capacity failures the caller can act on by freeing space.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// A single manifest resource that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub url: String,
    pub error: NetworkError,
}

impl std::fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.error)
    }
}

/// Population failures. The previously active generation is left untouched.
#[derive(thiserror::Error, Debug)]
pub enum PopulationError {
    #[error("manifest is empty")]
    EmptyManifest,

    #[error("invalid manifest URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("population of {version} incomplete: {} of {total} resources failed", .failures.len())]
    Incomplete {
        version: String,
        total: usize,
        failures: Vec<ResourceFailure>,
    },

    #[error("population of {version} fetched nothing ({} failures)", .failures.len())]
    NothingFetched {
        version: String,
        failures: Vec<ResourceFailure>,
    },

    #[error("store error during population: {0}")]
    Store(#[from] StoreError),
}

/// Errors surfaced to the end user by the fetch interceptor.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    #[error("no fallback available for {url}")]
    NoFallbackAvailable { url: String },

    #[error("resource unavailable: {url}")]
    ResourceUnavailable {
        url: String,
        #[source]
        cause: NetworkError,
    },
}

impl ServeError {
    /// The message a host should render instead of technical details.
    pub fn user_message(&self) -> &'static str {
        OFFLINE_MESSAGE
    }

    /// URL of the request that could not be served.
    pub fn url(&self) -> &str {
        match self {
            Self::NoFallbackAvailable { url } | Self::ResourceUnavailable { url, .. } => url,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid worker state transitions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: crate::lifecycle::WorkerState,
        to: crate::lifecycle::WorkerState,
    },

    #[error("worker is not installed (state {0})")]
    NotInstalled(crate::lifecycle::WorkerState),
}

/// Failures of the host-facing worker hooks.
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Population(#[from] PopulationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
