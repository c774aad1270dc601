use std::process::ExitCode;

use kpio_offline_cache::{ConfigError, StoreError};

/// All errors produced by cachectl.
///
/// - **Setup errors** (exit code 2): unreadable or invalid config, storage
///   the tool cannot open
/// - **Lookup errors** (exit code 1): the store opened but lacks what was
///   asked for
#[derive(thiserror::Error, Debug)]
pub enum CachectlError {
    // ── Setup errors (exit code 2) ──────────────────────────────────

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("cache.storage_dir is not set; nothing on disk to inspect")]
    StorageDirRequired,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Lookup errors (exit code 1) ─────────────────────────────────

    #[error("no active generation in store")]
    NoActiveGeneration,

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("not cached: {url}")]
    NotCached { url: String },
}

impl CachectlError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::StorageDirRequired | Self::Store(_) | Self::Json(_) => 2,
            Self::NoActiveGeneration | Self::InvalidUrl { .. } | Self::NotCached { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_exit_with_two() {
        assert_eq!(CachectlError::StorageDirRequired.code(), 2);
        assert_eq!(
            CachectlError::Config(ConfigError::Parse("bad".to_string())).code(),
            2
        );
    }

    #[test]
    fn lookup_errors_exit_with_one() {
        let err = CachectlError::NotCached {
            url: "https://expenses.example/x".to_string(),
        };
        assert_eq!(err.code(), 1);
        assert_eq!(err.to_string(), "not cached: https://expenses.example/x");
    }
}
