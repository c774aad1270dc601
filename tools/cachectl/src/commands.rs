//! Subcommand handlers. Each returns a JSON value for `output::emit`.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use kpio_offline_cache::{
    CacheEntry, CacheKey, CacheStore, FsBackend, OfflineCacheConfig, StoreError,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CachectlError;

/// Bytes of body shown by `inspect`.
const PREVIEW_BYTES: usize = 256;

/// One row of `entries`.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub content_type: String,
    pub size_bytes: u64,
    pub stored_at: String,
    pub sequence: u64,
    pub version: String,
}

impl EntrySummary {
    fn of(entry: &CacheEntry) -> Self {
        Self {
            url: entry.key.url().to_string(),
            method: entry.key.method().as_str().to_string(),
            status: entry.status,
            content_type: entry.content_type.clone(),
            size_bytes: entry.size_bytes,
            stored_at: entry.stored_at.to_rfc3339(),
            sequence: entry.sequence,
            version: entry.version.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<OfflineCacheConfig, CachectlError> {
    Ok(OfflineCacheConfig::from_path(path)?)
}

fn backend_for(config: &OfflineCacheConfig) -> Result<Arc<FsBackend>, CachectlError> {
    let dir = config
        .cache
        .storage_dir
        .as_ref()
        .ok_or(CachectlError::StorageDirRequired)?;
    log::debug!("opening store at {}", dir.display());
    Ok(Arc::new(FsBackend::open(dir).map_err(StoreError::Io)?))
}

/// Open the on-disk store named by `cache.storage_dir` for inspection.
/// Nothing on disk changes, so a running host's staging generation survives.
pub fn open_store(config: &OfflineCacheConfig) -> Result<CacheStore, CachectlError> {
    let backend = backend_for(config)?;
    Ok(CacheStore::open_read_only(backend, config.store_options()?)?)
}

/// Open the store for maintenance. Like a host start, this discards
/// staging generations and trims the active one to capacity.
pub fn open_store_for_update(config: &OfflineCacheConfig) -> Result<CacheStore, CachectlError> {
    let backend = backend_for(config)?;
    Ok(CacheStore::open(backend, config.store_options()?)?)
}

fn resolve(config: &OfflineCacheConfig, url: &str) -> Result<CacheKey, CachectlError> {
    let origin = config.origin()?;
    CacheKey::get(url, Some(&origin), &config.key_options()).map_err(|e| {
        CachectlError::InvalidUrl {
            url: url.to_string(),
            reason: e.reason,
        }
    })
}

pub fn config_check(config: &OfflineCacheConfig) -> Result<Value, CachectlError> {
    let origin = config.origin()?;
    let fallbacks = config.fallback_table()?;
    let routes: serde_json::Map<String, Value> = fallbacks
        .routes()
        .iter()
        .map(|route| {
            (
                route.class.as_str().to_string(),
                Value::String(route.key.url().to_string()),
            )
        })
        .collect();

    Ok(serde_json::json!({
        "tag": config.cache_tag(),
        "origin": origin.as_str(),
        "policy": config.population.policy,
        "manifest": config.manifest(),
        "fallbacks": routes,
        "capacity_bytes": config.cache.capacity_bytes,
        "timeout_ms": config.fetch.timeout_ms,
        "storage_dir": config.cache.storage_dir.as_ref().map(|d| d.display().to_string()),
    }))
}

pub fn generations(config: &OfflineCacheConfig) -> Result<Value, CachectlError> {
    let store = open_store(config)?;
    let rows: Vec<Value> = store
        .list_generations()
        .into_iter()
        .map(|info| {
            serde_json::json!({
                "id": info.id.to_string(),
                "version": info.version,
                "created_at": info.created_at.to_rfc3339(),
                "state": if info.active { "active" } else { "staging" },
                "entry_count": info.entry_count,
                "total_size": info.total_size,
                "active": info.active,
            })
        })
        .collect();
    Ok(Value::Array(rows))
}

/// Entries of the active generation, most recently stored first.
pub fn entries(config: &OfflineCacheConfig, limit: Option<usize>) -> Result<Value, CachectlError> {
    let store = open_store(config)?;
    let active = store.snapshot().ok_or(CachectlError::NoActiveGeneration)?;

    let mut all = active.entries();
    all.sort_by(|a, b| (b.stored_at, b.sequence).cmp(&(a.stored_at, a.sequence)));
    let rows: Vec<EntrySummary> = all
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|entry| EntrySummary::of(entry))
        .collect();

    Ok(serde_json::json!({
        "generation": active.id().to_string(),
        "version": active.version(),
        "total": active.len(),
        "usage_bytes": store.usage(),
        "capacity_bytes": store.capacity(),
        "entries": rows,
    }))
}

pub fn inspect(config: &OfflineCacheConfig, url: &str) -> Result<Value, CachectlError> {
    let key = resolve(config, url)?;
    let store = open_store(config)?;
    let entry = store.get(&key).ok_or_else(|| CachectlError::NotCached {
        url: key.url().to_string(),
    })?;

    let preview_len = entry.payload.len().min(PREVIEW_BYTES);
    let preview = String::from_utf8_lossy(&entry.payload[..preview_len]).into_owned();

    Ok(serde_json::json!({
        "entry": EntrySummary::of(&entry),
        "headers": entry.headers,
        "protected": store.is_protected(&key),
        "age_secs": entry.age(Utc::now()).num_seconds(),
        "preview": preview,
        "truncated": entry.payload.len() > PREVIEW_BYTES,
    }))
}

pub fn delete(config: &OfflineCacheConfig, url: &str) -> Result<Value, CachectlError> {
    let key = resolve(config, url)?;
    let store = open_store_for_update(config)?;
    if store.active_generation().is_none() {
        return Err(CachectlError::NoActiveGeneration);
    }
    if !store.delete(&key)? {
        return Err(CachectlError::NotCached {
            url: key.url().to_string(),
        });
    }
    log::info!("deleted {}", key.url());
    Ok(serde_json::json!({ "deleted": key.url() }))
}

pub fn retire(config: &OfflineCacheConfig) -> Result<Value, CachectlError> {
    let store = open_store_for_update(config)?;
    let retired = store.retire_inactive()?;
    Ok(serde_json::json!({
        "retired": retired,
        "active": store.active_generation().map(|id| id.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> OfflineCacheConfig {
        OfflineCacheConfig::from_toml_str(
            r#"
            [cache]
            version = "v1"
            origin = "https://expenses.example"

            [population]
            manifest = ["/", "/app.js"]

            [fallback]
            navigation = "/offline/"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn config_check_reports_derived_settings() {
        let value = config_check(&memory_config()).unwrap();
        assert_eq!(value["tag"], "offline-cache-v1");
        assert_eq!(value["fallbacks"]["navigation"], "https://expenses.example/offline/");
        assert_eq!(value["manifest"].as_array().unwrap().len(), 3);
        assert!(value["storage_dir"].is_null());
    }

    #[test]
    fn store_commands_need_storage_dir() {
        let err = generations(&memory_config()).unwrap_err();
        assert!(matches!(err, CachectlError::StorageDirRequired));
    }

    #[test]
    fn resolve_rejects_unkeyable_urls() {
        let err = resolve(&memory_config(), "data:text/plain,hi").unwrap_err();
        assert!(matches!(err, CachectlError::InvalidUrl { .. }));
        assert_eq!(err.code(), 1);
    }
}
