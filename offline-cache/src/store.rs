//! Cache Store
//!
//! Generation-based, durable mapping from `CacheKey` to `CacheEntry`.
//!
//! Exactly one generation is active and visible to readers. Population
//! writes into a staging generation which becomes visible only through
//! [`CacheStore::activate`], a single pointer swap backed by one atomic
//! record write. Retired generations stay readable through any
//! [`GenerationHandle`] still holding them.
//!
//! Writes are linearized by a single writer gate; reads never take it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use spin::RwLock;

use crate::backend::StorageBackend;
use crate::entry::{entry_size, CacheEntry, GenerationId, GenerationInfo};
use crate::error::StoreError;
use crate::eviction::{EvictionManager, EvictionPlan};
use crate::key::CacheKey;

// ── Record layout ───────────────────────────────────────────────────

const ACTIVE_RECORD: &str = "active";
const GENERATIONS_PREFIX: &str = "gen/";

fn generation_prefix(id: GenerationId) -> String {
    format!("{GENERATIONS_PREFIX}{id}/")
}

fn meta_record(id: GenerationId) -> String {
    format!("{GENERATIONS_PREFIX}{id}/meta")
}

fn entries_prefix(id: GenerationId) -> String {
    format!("{GENERATIONS_PREFIX}{id}/entries/")
}

fn entry_record(id: GenerationId, key: &CacheKey) -> String {
    format!("{}{}", entries_prefix(id), key.digest())
}

/// Parse `gen/g000003/...` into its generation id.
fn parse_generation(name: &str) -> Option<GenerationId> {
    let rest = name.strip_prefix(GENERATIONS_PREFIX)?;
    let segment = rest.split('/').next()?;
    segment
        .strip_prefix('g')?
        .parse::<u64>()
        .ok()
        .map(GenerationId::new)
}

/// Decode a JSON record; malformed bytes become `StoreError::Corrupt`.
fn decode_json<T: DeserializeOwned>(record: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        record: record.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerationMeta {
    id: GenerationId,
    version: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivePointer {
    generation: GenerationId,
}

// ── Generations ─────────────────────────────────────────────────────

#[derive(Debug)]
struct Generation {
    id: GenerationId,
    version: String,
    created_at: DateTime<Utc>,
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl Generation {
    fn new(id: GenerationId, version: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            version,
            created_at,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn info(&self, active: bool) -> GenerationInfo {
        let entries = self.entries.read();
        GenerationInfo {
            id: self.id,
            version: self.version.clone(),
            created_at: self.created_at,
            entry_count: entries.len(),
            total_size: entries.values().map(|e| e.size_bytes).sum(),
            active,
        }
    }
}

/// A pinned view of one generation.
///
/// Every lookup through a handle resolves against the same generation, even
/// if another generation is activated meanwhile.
#[derive(Debug, Clone)]
pub struct GenerationHandle(Arc<Generation>);

impl GenerationHandle {
    /// Identifier of the pinned generation.
    pub fn id(&self) -> GenerationId {
        self.0.id
    }

    /// Version tag the generation was populated for.
    pub fn version(&self) -> &str {
        &self.0.version
    }

    /// Look up `key` in this generation only.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.0.entries.read().get(key).cloned()
    }

    /// Check if `key` is present
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.0.entries.read().contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.0.entries.read().is_empty()
    }

    /// Sum of entry `size_bytes`.
    pub fn total_size(&self) -> u64 {
        self.0.entries.read().values().map(|e| e.size_bytes).sum()
    }

    /// Entries ordered by key.
    pub fn entries(&self) -> Vec<Arc<CacheEntry>> {
        let mut entries: Vec<Arc<CacheEntry>> = self.0.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Store construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Upper bound on the total `size_bytes` of a generation.
    pub capacity_bytes: u64,
    /// Keys exempt from eviction, including the trim done on open.
    pub protected: Vec<CacheKey>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            capacity_bytes: 25 * 1024 * 1024,
            protected: Vec::new(),
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Write order assigned to the new entry.
    pub sequence: u64,
    /// Accounted size of the stored entry.
    pub size_bytes: u64,
    /// Whether an entry for the same key was replaced.
    pub replaced: bool,
    /// Keys evicted to make room.
    pub evicted: Vec<CacheKey>,
}

/// How `open` treats what it finds on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    /// Discard leftovers, drop corrupt records, trim to capacity.
    Repair,
    /// Load everything as found and refuse writes.
    ReadOnly,
}

/// The cache store.
pub struct CacheStore {
    backend: Arc<dyn StorageBackend>,
    mode: OpenMode,
    eviction: EvictionManager,
    active: RwLock<Option<Arc<Generation>>>,
    staging: RwLock<HashMap<GenerationId, Arc<Generation>>>,
    protected: RwLock<HashSet<CacheKey>>,
    next_generation: AtomicU64,
    next_sequence: AtomicU64,
    write_gate: Mutex<()>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("capacity", &self.eviction.capacity())
            .field("active", &self.active_generation())
            .field("read_only", &self.is_read_only())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open a store over `backend`, restoring the active generation.
    ///
    /// Generations other than the active one are leftovers of interrupted
    /// population runs and are removed. Corrupt entry records are dropped; a
    /// corrupt active pointer or metadata record leaves the store empty.
    pub fn open(backend: Arc<dyn StorageBackend>, options: StoreOptions) -> Result<Self, StoreError> {
        Self::open_with(backend, options, OpenMode::Repair)
    }

    /// Open a store for inspection without changing anything on disk.
    ///
    /// Staging generations are loaded next to the active one, capacity is
    /// not enforced, and a corrupt pointer or metadata record fails with
    /// [`StoreError::Corrupt`]. Every write returns [`StoreError::ReadOnly`].
    pub fn open_read_only(
        backend: Arc<dyn StorageBackend>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        Self::open_with(backend, options, OpenMode::ReadOnly)
    }

    fn open_with(
        backend: Arc<dyn StorageBackend>,
        options: StoreOptions,
        mode: OpenMode,
    ) -> Result<Self, StoreError> {
        let store = Self {
            backend,
            mode,
            eviction: EvictionManager::new(options.capacity_bytes),
            active: RwLock::new(None),
            staging: RwLock::new(HashMap::new()),
            protected: RwLock::new(options.protected.into_iter().collect()),
            next_generation: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
            write_gate: Mutex::new(()),
        };
        store.restore()?;
        Ok(store)
    }

    /// Whether this store may be written.
    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    fn repairing(&self) -> bool {
        self.mode == OpenMode::Repair
    }

    fn read_pointer(&self) -> Result<Option<ActivePointer>, StoreError> {
        let Some(bytes) = self.backend.get(ACTIVE_RECORD)? else {
            return Ok(None);
        };
        match decode_json(ACTIVE_RECORD, &bytes) {
            Ok(pointer) => Ok(Some(pointer)),
            Err(e) if self.repairing() => {
                log::warn!("{}; starting without an active generation", e);
                self.backend.delete(ACTIVE_RECORD)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load a generation's metadata and entries. `None` when the metadata
    /// record is missing, or corrupt while repairing.
    fn load_generation(
        &self,
        id: GenerationId,
        max_sequence: &mut u64,
    ) -> Result<Option<Generation>, StoreError> {
        let record = meta_record(id);
        let Some(meta_bytes) = self.backend.get(&record)? else {
            return Ok(None);
        };
        let meta: GenerationMeta = match decode_json(&record, &meta_bytes) {
            Ok(meta) => meta,
            Err(e) if self.repairing() => {
                log::warn!("{}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let generation = Generation::new(id, meta.version, meta.created_at);
        {
            let mut entries = generation.entries.write();
            for name in self.backend.list(&entries_prefix(id))? {
                let Some(bytes) = self.backend.get(&name)? else {
                    continue;
                };
                match postcard::from_bytes::<CacheEntry>(&bytes) {
                    Ok(entry) => {
                        *max_sequence = (*max_sequence).max(entry.sequence);
                        entries.insert(entry.key.clone(), Arc::new(entry));
                    }
                    Err(e) if self.repairing() => {
                        log::warn!("dropping corrupt cache record {}: {}", name, e);
                        self.backend.delete(&name)?;
                    }
                    Err(e) => log::warn!("skipping corrupt cache record {}: {}", name, e),
                }
            }
        }
        Ok(Some(generation))
    }

    fn restore(&self) -> Result<(), StoreError> {
        let pointer = self.read_pointer()?;

        let mut ids: Vec<GenerationId> = self
            .backend
            .list(GENERATIONS_PREFIX)?
            .iter()
            .filter_map(|name| parse_generation(name))
            .collect();
        ids.sort();
        ids.dedup();

        if let Some(max) = ids.last() {
            self.next_generation.store(max.next().raw(), Ordering::SeqCst);
        }

        let active_id = pointer.map(|p| p.generation);
        let mut max_sequence = 0u64;

        for id in ids {
            let is_active = Some(id) == active_id;
            if !is_active && self.repairing() {
                log::info!("discarding orphaned generation {}", id);
                self.backend.delete_prefix(&generation_prefix(id))?;
                continue;
            }

            let Some(generation) = self.load_generation(id, &mut max_sequence)? else {
                if !is_active {
                    log::debug!("skipping generation {} without metadata", id);
                    continue;
                }
                log::warn!("active generation {} has no readable metadata; starting empty", id);
                if self.repairing() {
                    self.backend.delete_prefix(&generation_prefix(id))?;
                    self.backend.delete(ACTIVE_RECORD)?;
                }
                continue;
            };

            log::info!(
                "restored generation {} ({}) with {} entries",
                id,
                generation.version,
                generation.entries.read().len()
            );
            if is_active {
                *self.active.write() = Some(Arc::new(generation));
            } else {
                self.staging.write().insert(id, Arc::new(generation));
            }
        }

        if active_id.is_some() && self.active.read().is_none() {
            log::warn!("active pointer references a missing generation");
            if self.repairing() {
                self.backend.delete(ACTIVE_RECORD)?;
            }
        }

        self.next_sequence.store(max_sequence + 1, Ordering::SeqCst);
        if self.repairing() {
            self.enforce_capacity()?;
        }
        Ok(())
    }

    fn writer(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        Ok(self
            .write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Look up `key` in the active generation.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let generation = self.active.read().clone()?;
        let entry = generation.entries.read().get(key).cloned();
        entry
    }

    /// Pin the active generation for a sequence of reads.
    pub fn snapshot(&self) -> Option<GenerationHandle> {
        self.active.read().clone().map(GenerationHandle)
    }

    /// Identifier of the active generation, if any.
    pub fn active_generation(&self) -> Option<GenerationId> {
        self.active.read().as_ref().map(|g| g.id)
    }

    /// Version tag of the active generation.
    pub fn active_version(&self) -> Option<String> {
        self.active.read().as_ref().map(|g| g.version.clone())
    }

    /// Active and staging generations, active first.
    pub fn list_generations(&self) -> Vec<GenerationInfo> {
        let mut out = Vec::new();
        if let Some(active) = self.active.read().as_ref() {
            out.push(active.info(true));
        }
        let mut staging: Vec<GenerationInfo> =
            self.staging.read().values().map(|g| g.info(false)).collect();
        staging.sort_by_key(|info| info.id);
        out.extend(staging);
        out
    }

    /// Total `size_bytes` of the active generation.
    pub fn usage(&self) -> u64 {
        self.snapshot().map(|g| g.total_size()).unwrap_or(0)
    }

    /// Configured byte capacity per generation.
    pub fn capacity(&self) -> u64 {
        self.eviction.capacity()
    }

    /// Keys the eviction manager must never remove.
    pub fn set_protected(&self, keys: impl IntoIterator<Item = CacheKey>) {
        *self.protected.write() = keys.into_iter().collect();
    }

    /// Check if `key` is exempt from eviction
    pub fn is_protected(&self, key: &CacheKey) -> bool {
        self.protected.read().contains(key)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Store `entry` under `key` in the active generation.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<PutOutcome, StoreError> {
        let _gate = self.writer()?;
        let generation = self
            .active
            .read()
            .clone()
            .ok_or(StoreError::NoActiveGeneration)?;
        self.write_locked(&generation, key, entry, false)
    }

    /// Store `entry` in a staging (or the active) generation.
    ///
    /// Staging generations never evict: an entry that does not fit next to
    /// what is already staged fails with [`StoreError::QuotaExceeded`].
    pub fn put_into(
        &self,
        generation: GenerationId,
        key: CacheKey,
        entry: CacheEntry,
    ) -> Result<PutOutcome, StoreError> {
        let _gate = self.writer()?;
        let (target, staging) = self.find_generation(generation)?;
        self.write_locked(&target, key, entry, staging)
    }

    /// Remove `key` from the active generation.
    pub fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let _gate = self.writer()?;
        let Some(generation) = self.active.read().clone() else {
            return Ok(false);
        };
        if !generation.entries.read().contains_key(key) {
            return Ok(false);
        }
        self.backend.delete(&entry_record(generation.id, key))?;
        generation.entries.write().remove(key);
        log::debug!("deleted {} from {}", key, generation.id);
        Ok(true)
    }

    /// The generation `id`, and whether it is staging.
    fn find_generation(&self, id: GenerationId) -> Result<(Arc<Generation>, bool), StoreError> {
        if let Some(generation) = self.staging.read().get(&id) {
            return Ok((generation.clone(), true));
        }
        match self.active.read().as_ref() {
            Some(active) if active.id == id => Ok((active.clone(), false)),
            _ => Err(StoreError::GenerationNotFound(id)),
        }
    }

    /// Caller holds the writer gate.
    fn write_locked(
        &self,
        generation: &Generation,
        key: CacheKey,
        mut entry: CacheEntry,
        staging: bool,
    ) -> Result<PutOutcome, StoreError> {
        entry.key = key;
        entry.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        entry.stored_at = now_millis();
        entry.version = generation.version.clone();
        entry.size_bytes = entry_size(&entry.payload, &entry.headers);

        let (plan, replaced) = {
            let entries = generation.entries.read();
            let protected: HashSet<CacheKey> = if staging {
                entries.keys().cloned().collect()
            } else {
                self.protected.read().clone()
            };
            let plan = self
                .eviction
                .plan_for_put(&entries, &protected, &entry)
                .map_err(|source| StoreError::QuotaExceeded {
                    requested: entry.size_bytes,
                    capacity: self.eviction.capacity(),
                    source,
                })?;
            (plan, entries.contains_key(&entry.key))
        };

        let bytes = postcard::to_allocvec(&entry)?;
        self.backend.put(&entry_record(generation.id, &entry.key), &bytes)?;
        self.remove_records(generation.id, &plan);

        let sequence = entry.sequence;
        let size_bytes = entry.size_bytes;
        let key = entry.key.clone();
        {
            let mut entries = generation.entries.write();
            for victim in &plan.victims {
                entries.remove(victim);
            }
            entries.insert(key.clone(), Arc::new(entry));
        }

        if !plan.is_empty() {
            log::info!(
                "evicted {} entries ({} bytes) from {} to store {}",
                plan.victims.len(),
                plan.freed_bytes,
                generation.id,
                key
            );
        }
        log::debug!("stored {} in {} (seq {})", key, generation.id, sequence);

        Ok(PutOutcome {
            sequence,
            size_bytes,
            replaced,
            evicted: plan.victims,
        })
    }

    fn remove_records(&self, generation: GenerationId, plan: &EvictionPlan) {
        for victim in &plan.victims {
            if let Err(e) = self.backend.delete(&entry_record(generation, victim)) {
                // Reloaded on restart and trimmed again by enforce_capacity.
                log::warn!("failed to delete evicted record {}: {}", victim, e);
            }
        }
    }

    fn enforce_capacity(&self) -> Result<(), StoreError> {
        let Some(generation) = self.active.read().clone() else {
            return Ok(());
        };
        let protected = self.protected.read().clone();
        let plan = {
            let entries = generation.entries.read();
            match self.eviction.enforce(&entries, &protected) {
                Ok(plan) => plan,
                Err(e) => {
                    log::warn!("generation {} stays over capacity: {}", generation.id, e);
                    return Ok(());
                }
            }
        };
        if plan.is_empty() {
            return Ok(());
        }
        self.remove_records(generation.id, &plan);
        let mut entries = generation.entries.write();
        for victim in &plan.victims {
            entries.remove(victim);
        }
        log::info!(
            "trimmed {} entries from {} to restore capacity",
            plan.victims.len(),
            generation.id
        );
        Ok(())
    }

    // ── Generations ─────────────────────────────────────────────────

    /// Create an empty staging generation tagged `version`.
    pub fn begin_generation(&self, version: &str) -> Result<GenerationId, StoreError> {
        let _gate = self.writer()?;
        let id = GenerationId::new(self.next_generation.fetch_add(1, Ordering::SeqCst));
        let meta = GenerationMeta {
            id,
            version: version.to_string(),
            created_at: now_millis(),
        };
        self.backend
            .put(&meta_record(id), &serde_json::to_vec(&meta)?)?;
        self.staging.write().insert(
            id,
            Arc::new(Generation::new(id, meta.version, meta.created_at)),
        );
        log::debug!("began staging generation {} ({})", id, version);
        Ok(id)
    }

    /// Drop a staging generation and its records.
    pub fn discard(&self, id: GenerationId) -> Result<(), StoreError> {
        let _gate = self.writer()?;
        if self.staging.write().remove(&id).is_none() {
            return Err(StoreError::GenerationNotFound(id));
        }
        self.backend.delete_prefix(&generation_prefix(id))?;
        log::info!("discarded staging generation {}", id);
        Ok(())
    }

    /// Make a staging generation the active one.
    ///
    /// The durable pointer is written first; the in-memory swap follows, so
    /// readers observe either the old generation or the new one in full.
    /// The previous generation's records are removed afterwards.
    pub fn activate(&self, id: GenerationId) -> Result<(), StoreError> {
        let _gate = self.writer()?;
        if self.active_generation() == Some(id) {
            return Ok(());
        }
        let generation = self
            .staging
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::GenerationNotFound(id))?;

        let pointer = serde_json::to_vec(&ActivePointer { generation: id })?;
        self.backend.put(ACTIVE_RECORD, &pointer)?;

        self.staging.write().remove(&id);
        let previous = self.active.write().replace(generation);

        log::info!("activated generation {}", id);

        if let Some(previous) = previous {
            if let Err(e) = self.backend.delete_prefix(&generation_prefix(previous.id)) {
                log::warn!("failed to remove retired generation {}: {}", previous.id, e);
            } else {
                log::debug!("retired generation {}", previous.id);
            }
        }
        Ok(())
    }

    /// Remove records of every generation that is neither active nor
    /// currently staging. Returns how many were removed.
    pub fn retire_inactive(&self) -> Result<usize, StoreError> {
        let _gate = self.writer()?;
        let active = self.active_generation();
        let staging: HashSet<GenerationId> = self.staging.read().keys().copied().collect();

        let mut ids: Vec<GenerationId> = self
            .backend
            .list(GENERATIONS_PREFIX)?
            .iter()
            .filter_map(|name| parse_generation(name))
            .collect();
        ids.sort();
        ids.dedup();

        let mut retired = 0;
        for id in ids {
            if Some(id) == active || staging.contains(&id) {
                continue;
            }
            self.backend.delete_prefix(&generation_prefix(id))?;
            log::info!("retired stale generation {}", id);
            retired += 1;
        }
        Ok(retired)
    }
}

/// Current time truncated to the millisecond precision kept on disk.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
