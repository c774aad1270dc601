//! Eviction Manager
//!
//! Keeps a generation within its byte capacity by removing the
//! least-recently-stored entries first, ordered by (`stored_at`, `sequence`).
//! Protected keys (fallback routes) and the key being written are never
//! candidates.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::entry::CacheEntry;
use crate::error::EvictionError;
use crate::key::CacheKey;

/// Keys chosen for removal and the bytes they free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub victims: Vec<CacheKey>,
    pub freed_bytes: u64,
}

impl EvictionPlan {
    /// Check if nothing is evicted
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Size-bounded LRU policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionManager {
    capacity: u64,
}

impl EvictionManager {
    /// Create a manager bounding generations to `capacity` bytes
    pub fn new(capacity: u64) -> Self {
        Self { capacity }
    }

    /// Get capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Plan evictions so that writing `incoming` (replacing any existing
    /// entry for the same key) keeps the generation within capacity.
    pub fn plan_for_put(
        &self,
        entries: &HashMap<CacheKey, Arc<CacheEntry>>,
        protected: &HashSet<CacheKey>,
        incoming: &CacheEntry,
    ) -> Result<EvictionPlan, EvictionError> {
        let current: u64 = entries.values().map(|e| e.size_bytes).sum();
        let replaced = entries
            .get(&incoming.key)
            .map(|e| e.size_bytes)
            .unwrap_or(0);
        let projected = current - replaced + incoming.size_bytes;
        self.plan(entries, protected, Some(&incoming.key), projected)
    }

    /// Plan evictions bringing an existing generation back within capacity.
    pub fn enforce(
        &self,
        entries: &HashMap<CacheKey, Arc<CacheEntry>>,
        protected: &HashSet<CacheKey>,
    ) -> Result<EvictionPlan, EvictionError> {
        let current: u64 = entries.values().map(|e| e.size_bytes).sum();
        self.plan(entries, protected, None, current)
    }

    fn plan(
        &self,
        entries: &HashMap<CacheKey, Arc<CacheEntry>>,
        protected: &HashSet<CacheKey>,
        exempt: Option<&CacheKey>,
        projected: u64,
    ) -> Result<EvictionPlan, EvictionError> {
        if projected <= self.capacity {
            return Ok(EvictionPlan::default());
        }
        let required = projected - self.capacity;

        let mut candidates: Vec<&Arc<CacheEntry>> = entries
            .values()
            .filter(|e| !protected.contains(&e.key) && Some(&e.key) != exempt)
            .collect();
        candidates.sort_by_key(|e| e.recency());

        let mut plan = EvictionPlan::default();
        for entry in candidates {
            if plan.freed_bytes >= required {
                break;
            }
            plan.freed_bytes += entry.size_bytes;
            plan.victims.push(entry.key.clone());
        }

        if plan.freed_bytes < required {
            log::debug!(
                "eviction cannot free {} bytes, only {} evictable",
                required,
                plan.freed_bytes
            );
            return Err(EvictionError::EvictionImpossible {
                required,
                reclaimable: plan.freed_bytes,
                capacity: self.capacity,
            });
        }

        Ok(plan)
    }
}
