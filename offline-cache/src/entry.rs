//! Cache entries and generation identifiers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{status_text_for, Response};
use crate::key::CacheKey;

/// Identifier of a cache generation, unique within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationId(u64);

impl GenerationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get raw value
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{:06}", self.0)
    }
}

/// A stored response.
///
/// Entries are immutable once built; replacing one swaps the whole `Arc`,
/// so a reader never sees a half-written entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
    /// Store-wide write order; breaks `stored_at` ties.
    pub sequence: u64,
    pub size_bytes: u64,
    /// Version tag of the generation the entry was written for.
    pub version: String,
}

impl CacheEntry {
    /// Build an entry from a network response. `stored_at`, `sequence` and
    /// `version` are stamped by the store on write.
    pub fn from_response(key: CacheKey, response: &Response) -> Self {
        let headers = response.headers.clone();
        let size_bytes = entry_size(&response.body, &headers);
        Self {
            key,
            payload: response.body.clone(),
            content_type: response.content_type().to_string(),
            status: response.status,
            headers,
            stored_at: Utc::now(),
            sequence: 0,
            size_bytes,
            version: String::new(),
        }
    }

    /// Build a `200 OK` entry from raw bytes.
    pub fn new(key: CacheKey, payload: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.clone());
        let payload = payload.into();
        let size_bytes = entry_size(&payload, &headers);
        Self {
            key,
            payload,
            content_type,
            status: 200,
            headers,
            stored_at: Utc::now(),
            sequence: 0,
            size_bytes,
            version: String::new(),
        }
    }

    /// Replay the entry as a response.
    pub fn to_response(&self) -> Response {
        let mut headers = self.headers.clone();
        headers
            .entry("content-type".to_string())
            .or_insert_with(|| self.content_type.clone());
        Response {
            url: self.key.url().to_string(),
            status: self.status,
            status_text: status_text_for(self.status).to_string(),
            headers,
            body: self.payload.clone(),
        }
    }

    /// Age of the entry relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.stored_at)
    }

    /// Ordering used by eviction: oldest write first.
    pub(crate) fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.stored_at, self.sequence)
    }
}

/// Payload plus header bytes.
pub(crate) fn entry_size(payload: &[u8], headers: &BTreeMap<String, String>) -> u64 {
    let header_bytes: usize = headers.iter().map(|(k, v)| k.len() + v.len()).sum();
    (payload.len() + header_bytes) as u64
}

/// Summary of one generation, as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub id: GenerationId,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
    pub total_size: u64,
    pub active: bool,
}
