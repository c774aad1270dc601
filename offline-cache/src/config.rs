//! TOML configuration.
//!
//! ```toml
//! [cache]
//! name = "expense-tracker"
//! version = "v1"
//! origin = "https://expenses.example/"
//! capacity_bytes = 26214400
//!
//! [population]
//! policy = "all_or_nothing"
//! manifest = ["/", "/offline/", "/static/css/style.css", "/manifest.json"]
//!
//! [fetch]
//! timeout_ms = 3000
//!
//! [fallback]
//! navigation = "/offline/"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::fallback::{FallbackTable, RequestClass};
use crate::interceptor::{CacheExclusions, InterceptPolicy};
use crate::key::{CacheKey, KeyOptions};
use crate::population::PopulationPolicy;
use crate::store::StoreOptions;

// ── Data models ─────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfflineCacheConfig {
    pub cache: CacheSection,
    #[serde(default)]
    pub population: PopulationSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub fallback: FallbackSection,
    #[serde(default)]
    pub exclusions: CacheExclusions,
}

/// Cache identity and storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    #[serde(default = "default_name")]
    pub name: String,
    pub version: String,
    /// Base URL relative manifest and request URLs resolve against.
    pub origin: String,
    #[serde(default = "default_capacity")]
    pub capacity_bytes: u64,
    /// Directory for the filesystem backend; in-memory when absent.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub ignore_search: bool,
    /// Request headers folded into cache keys.
    #[serde(default)]
    pub vary: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopulationSection {
    #[serde(default)]
    pub policy: PopulationPolicy,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub manifest: Vec<String>,
}

impl Default for PopulationSection {
    fn default() -> Self {
        Self {
            policy: PopulationPolicy::default(),
            concurrency: default_concurrency(),
            manifest: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub navigation_requires_success: bool,
    #[serde(default)]
    pub navigation_cache_lookup: bool,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            navigation_requires_success: true,
            navigation_cache_lookup: false,
            max_age_secs: None,
            deduplicate: true,
        }
    }
}

/// Fallback route URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FallbackSection {
    #[serde(default)]
    pub navigation: Option<String>,
    #[serde(default)]
    pub sub_resource: Option<String>,
}

fn default_name() -> String {
    "offline-cache".to_string()
}

fn default_capacity() -> u64 {
    StoreOptions::default().capacity_bytes
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

// ── Parsing ─────────────────────────────────────────────────────────

impl OfflineCacheConfig {
    /// Load and validate a config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot express as types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.name.trim().is_empty() {
            return Err(invalid("cache.name", "must not be empty"));
        }
        if self.cache.version.trim().is_empty() {
            return Err(invalid("cache.version", "must not be empty"));
        }
        let origin = self.origin()?;
        if self.cache.capacity_bytes == 0 {
            return Err(invalid("cache.capacity_bytes", "must be greater than zero"));
        }
        if self.population.concurrency == 0 {
            return Err(invalid("population.concurrency", "must be greater than zero"));
        }
        if self.fetch.timeout_ms == 0 {
            return Err(invalid("fetch.timeout_ms", "must be greater than zero"));
        }

        let key_options = self.key_options();
        for url in &self.population.manifest {
            CacheKey::get(url, Some(&origin), &key_options)
                .map_err(|e| invalid("population.manifest", e.to_string()))?;
        }
        self.fallback_table()?;

        if self.manifest().is_empty() {
            return Err(invalid(
                "population.manifest",
                "nothing to pre-cache: no manifest entries and no fallback routes",
            ));
        }
        Ok(())
    }

    // ── Derived settings ────────────────────────────────────────────

    /// The configured origin, restricted to http and https.
    pub fn origin(&self) -> Result<Url, ConfigError> {
        let origin = Url::parse(&self.cache.origin)
            .map_err(|e| invalid("cache.origin", e.to_string()))?;
        match origin.scheme() {
            "http" | "https" => Ok(origin),
            other => Err(invalid(
                "cache.origin",
                format!("unsupported scheme {other:?}"),
            )),
        }
    }

    /// Version tag stamped on generations, e.g. `expense-tracker-v1`.
    pub fn cache_tag(&self) -> String {
        format!("{}-{}", self.cache.name, self.cache.version)
    }

    /// Key normalization derived from `[cache]`.
    pub fn key_options(&self) -> KeyOptions {
        KeyOptions {
            ignore_search: self.cache.ignore_search,
            vary: self.cache.vary.clone(),
        }
    }

    /// Manifest URLs with fallback route URLs appended when missing.
    pub fn manifest(&self) -> Vec<String> {
        let mut manifest = self.population.manifest.clone();
        let routes = [&self.fallback.navigation, &self.fallback.sub_resource];
        for url in routes.into_iter().flatten() {
            if !manifest.contains(url) {
                manifest.push(url.clone());
            }
        }
        manifest
    }

    /// Fallback routes resolved against the origin.
    pub fn fallback_table(&self) -> Result<FallbackTable, ConfigError> {
        let origin = self.origin()?;
        let key_options = self.key_options();
        let mut table = FallbackTable::new();
        let routes = [
            (RequestClass::Navigation, &self.fallback.navigation, "fallback.navigation"),
            (RequestClass::SubResource, &self.fallback.sub_resource, "fallback.sub_resource"),
        ];
        for (class, url, field) in routes {
            if let Some(url) = url {
                let key = CacheKey::get(url, Some(&origin), &key_options)
                    .map_err(|e| invalid(field, e.to_string()))?;
                table = table.with_route(class, key);
            }
        }
        Ok(table)
    }

    /// Store options; fallback route keys are protected from eviction.
    pub fn store_options(&self) -> Result<StoreOptions, ConfigError> {
        Ok(StoreOptions {
            capacity_bytes: self.cache.capacity_bytes,
            protected: self.fallback_table()?.keys(),
        })
    }

    /// Request handling policy from `[fetch]` and `[exclusions]`.
    pub fn intercept_policy(&self) -> InterceptPolicy {
        InterceptPolicy {
            timeout: self.timeout(),
            navigation_requires_success: self.fetch.navigation_requires_success,
            navigation_cache_lookup: self.fetch.navigation_cache_lookup,
            max_age: self.fetch.max_age_secs.map(Duration::from_secs),
            deduplicate: self.fetch.deduplicate,
            exclusions: self.exclusions.clone(),
        }
    }

    /// Per-request network timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.fetch.timeout_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[cache]
version = "v1"
origin = "https://expenses.example/"

[population]
manifest = ["/", "/static/css/style.css", "/manifest.json"]

[fallback]
navigation = "/offline/"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = OfflineCacheConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.cache.name, "offline-cache");
        assert_eq!(config.cache.capacity_bytes, 25 * 1024 * 1024);
        assert_eq!(config.population.policy, PopulationPolicy::AllOrNothing);
        assert_eq!(config.population.concurrency, 4);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(config.fetch.deduplicate);
        assert!(!config.fetch.navigation_cache_lookup);
        assert_eq!(config.exclusions, CacheExclusions::default());
    }

    #[test]
    fn fallback_urls_join_the_manifest() {
        let config = OfflineCacheConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(
            config.manifest(),
            vec!["/", "/static/css/style.css", "/manifest.json", "/offline/"]
        );
        let options = config.store_options().unwrap();
        assert_eq!(options.protected.len(), 1);
        assert_eq!(options.protected[0].url(), "https://expenses.example/offline/");
    }

    #[test]
    fn full_config_parses() {
        let config = OfflineCacheConfig::from_toml_str(
            r#"
[cache]
name = "expense-tracker"
version = "v2"
origin = "https://expenses.example/"
capacity_bytes = 1048576
storage_dir = "/var/cache/expenses"
ignore_search = true
vary = ["Accept-Language"]

[population]
policy = "best_effort"
concurrency = 8
manifest = ["/", "/offline/"]

[fetch]
timeout_ms = 1500
navigation_cache_lookup = true
max_age_secs = 600
deduplicate = false

[fallback]
navigation = "/offline/"
sub_resource = "/static/placeholder.svg"

[exclusions]
content_types = ["application/json"]
authenticated = true
respect_no_store = true
"#,
        )
        .unwrap();

        assert_eq!(config.cache_tag(), "expense-tracker-v2");
        assert_eq!(config.population.policy, PopulationPolicy::BestEffort);
        let policy = config.intercept_policy();
        assert_eq!(policy.timeout, Duration::from_millis(1500));
        assert_eq!(policy.max_age, Some(Duration::from_secs(600)));
        assert!(!policy.deduplicate);
        assert!(policy.exclusions.authenticated);
        assert!(config.key_options().ignore_search);
        assert_eq!(config.fallback_table().unwrap().routes().len(), 2);
        assert_eq!(config.manifest().len(), 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            (MINIMAL.replace("version = \"v1\"", "version = \"\""), "cache.version"),
            (
                MINIMAL.replace("https://expenses.example/", "ftp://expenses.example/"),
                "cache.origin",
            ),
            (
                format!("{MINIMAL}\n[fetch]\ntimeout_ms = 0\n"),
                "fetch.timeout_ms",
            ),
            (
                MINIMAL.replace("\"/manifest.json\"", "\"data:text/plain,x\""),
                "population.manifest",
            ),
        ];
        for (toml, expected_field) in cases {
            match OfflineCacheConfig::from_toml_str(&toml) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected invalid {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_precache_set_is_rejected() {
        let err = OfflineCacheConfig::from_toml_str(
            "[cache]\nversion = \"v1\"\norigin = \"https://expenses.example/\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "population.manifest", .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = OfflineCacheConfig::from_toml_str("[cache\nversion=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = OfflineCacheConfig::from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = OfflineCacheConfig::from_path(&path).unwrap();
        assert_eq!(config.cache.version, "v1");
    }
}
