//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kpio_offline_cache::{
    CacheEntry, CacheKey, Fetcher, KeyOptions, NetworkError, OfflineCacheConfig, Request, Response,
};

pub const ORIGIN: &str = "https://expenses.example";

pub fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

pub fn key(path: &str) -> CacheKey {
    CacheKey::get(&url(path), None, &KeyOptions::default()).unwrap()
}

/// Entry whose accounted size is exactly `body.len()`.
pub fn bare_entry(path: &str, body: &[u8]) -> CacheEntry {
    let mut entry = CacheEntry::new(key(path), body.to_vec(), "");
    entry.headers.clear();
    entry
}

/// Network double answering from a mutable table. Unknown URLs are offline.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<BTreeMap<String, Result<Response, NetworkError>>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    count: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve(&self, path: &str, status: u16, content_type: &str, body: &str) {
        self.responses.lock().unwrap().insert(
            url(path),
            Ok(Response::new(status)
                .with_header("content-type", content_type)
                .with_body(body.as_bytes().to_vec())),
        );
    }

    pub fn fail(&self, path: &str, error: NetworkError) {
        self.responses.lock().unwrap().insert(url(path), Err(error));
    }

    pub fn go_offline(&self) {
        self.responses.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, path: &str) -> usize {
        let target = url(path);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| **u == target)
            .count()
    }

    /// Serve the expense tracker's pre-cache set.
    pub fn serve_site(&self) {
        self.serve("/", 200, "text/html", "<h1>Expenses</h1>");
        self.serve("/offline/", 200, "text/html", "<h1>You are offline</h1>");
        self.serve("/static/css/style.css", 200, "text/css", "body{margin:0}");
        self.serve("/manifest.json", 200, "application/manifest+json", "{\"name\":\"Expenses\"}");
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.url.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.responses.lock().unwrap().get(&request.url).cloned();
        result
            .unwrap_or(Err(NetworkError::Offline))
            .map(|response| response.with_url(request.url.clone()))
    }
}

/// The expense tracker configuration, optionally with extra TOML appended.
pub fn site_config(version: &str, extra: &str) -> OfflineCacheConfig {
    let toml = format!(
        r#"
[cache]
name = "expense-tracker"
version = "{version}"
origin = "{ORIGIN}/"

[population]
manifest = ["/", "/static/css/style.css", "/manifest.json"]

[fallback]
navigation = "/offline/"
{extra}
"#
    );
    OfflineCacheConfig::from_toml_str(&toml).unwrap()
}
