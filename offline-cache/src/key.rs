//! Normalized request identity.
//!
//! A `CacheKey` is `METHOD absolute-url` plus any `Vary` header values the
//! cache was told to honour. The canonical string form never depends on
//! process state, so keys written before a restart match keys built after.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, RequestMethod};

/// Options controlling how a request maps onto a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOptions {
    /// Ignore search (query string)
    #[serde(default)]
    pub ignore_search: bool,
    /// Request headers folded into the key (lower-cased names)
    #[serde(default)]
    pub vary: Vec<String>,
}

/// Why a URL could not become a key.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot normalize {url}: {reason}")]
pub struct KeyError {
    pub url: String,
    pub reason: String,
}

/// Normalized request identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    method: RequestMethod,
    url: String,
    vary: Vec<(String, String)>,
}

impl CacheKey {
    /// Build a key for `method url`, resolving relative URLs against `base`.
    pub fn new(
        method: RequestMethod,
        url: &str,
        base: Option<&Url>,
        options: &KeyOptions,
    ) -> Result<Self, KeyError> {
        let url = normalize_url(url, base, options.ignore_search)?;
        Ok(Self {
            method,
            url,
            vary: Vec::new(),
        })
    }

    /// Build the key for an inbound request.
    pub fn for_request(
        request: &Request,
        base: Option<&Url>,
        options: &KeyOptions,
    ) -> Result<Self, KeyError> {
        let mut key = Self::new(request.method, &request.url, base, options)?;
        let mut vary: Vec<(String, String)> = options
            .vary
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .filter_map(|name| {
                request
                    .header(&name)
                    .map(|value| (name, value.trim().to_string()))
            })
            .collect();
        vary.sort();
        vary.dedup();
        key.vary = vary;
        Ok(key)
    }

    /// `GET` key for a URL, the shape used by manifests and fallback routes.
    pub fn get(url: &str, base: Option<&Url>, options: &KeyOptions) -> Result<Self, KeyError> {
        Self::new(RequestMethod::Get, url, base, options)
    }

    /// The same key without `Vary` header values, or `None` when it has none.
    pub fn without_vary(&self) -> Option<Self> {
        if self.vary.is_empty() {
            return None;
        }
        Some(Self {
            method: self.method,
            url: self.url.clone(),
            vary: Vec::new(),
        })
    }

    /// Request method
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Normalized absolute URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Canonical string form, e.g. `GET https://app.example/offline/`.
    pub fn canonical(&self) -> String {
        let mut out = format!("{} {}", self.method.as_str(), self.url);
        for (name, value) in &self.vary {
            out.push('\n');
            out.push_str(name);
            out.push(':');
            out.push_str(value);
        }
        out
    }

    /// Stable record name: hex SHA-256 of the canonical form.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.canonical().as_bytes());
        format!("{hash:x}")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.url)
    }
}

fn normalize_url(raw: &str, base: Option<&Url>, ignore_search: bool) -> Result<String, KeyError> {
    let err = |reason: String| KeyError {
        url: raw.to_string(),
        reason,
    };

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(raw).map_err(|e| err(e.to_string()))?,
            None => return Err(err("relative URL without an origin".to_string())),
        },
        Err(e) => return Err(err(e.to_string())),
    };

    if url.cannot_be_a_base() {
        return Err(err("URL has no hierarchical path".to_string()));
    }

    url.set_fragment(None);
    if ignore_search || url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url.to_string())
}
