//! Property: LRU eviction keeps a generation within capacity.
//!
//! For any sequence of writes, the active generation never exceeds its
//! capacity after a successful put, protected entries are never evicted,
//! and every eviction removes entries older than everything that survives.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{bare_entry, key};
use kpio_offline_cache::{CacheStore, MemoryBackend, StoreError, StoreOptions};
use proptest::prelude::*;

fn open_store(capacity: u64, protected: Vec<kpio_offline_cache::CacheKey>) -> CacheStore {
    let store = CacheStore::open(
        Arc::new(MemoryBackend::new()),
        StoreOptions {
            capacity_bytes: capacity,
            protected,
        },
    )
    .unwrap();
    let generation = store.begin_generation("v1").unwrap();
    store.activate(generation).unwrap();
    store
}

/// Writes as (path index, payload size).
fn arb_writes() -> impl Strategy<Value = Vec<(u8, usize)>> {
    proptest::collection::vec((0u8..12, 1usize..40), 1..60)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn usage_never_exceeds_capacity(capacity in 40u64..200, writes in arb_writes()) {
        let store = open_store(capacity, Vec::new());
        for (index, size) in writes {
            let path = format!("/asset/{index}");
            let result = store.put(key(&path), bare_entry(&path, &vec![b'x'; size]));
            prop_assert!(result.is_ok());
            prop_assert!(store.usage() <= store.capacity());
            prop_assert!(store.get(&key(&path)).is_some());
        }
    }

    #[test]
    fn evicted_entries_are_older_than_survivors(writes in arb_writes()) {
        let store = open_store(100, Vec::new());
        for (index, size) in writes {
            let path = format!("/asset/{index}");
            let before: HashMap<_, _> = store
                .snapshot()
                .unwrap()
                .entries()
                .iter()
                .map(|e| (e.key.clone(), (e.stored_at, e.sequence)))
                .collect();

            let outcome = store.put(key(&path), bare_entry(&path, &vec![b'x'; size])).unwrap();

            let survivors: Vec<_> = store
                .snapshot()
                .unwrap()
                .entries()
                .iter()
                .filter(|e| e.key != key(&path))
                .map(|e| (e.stored_at, e.sequence))
                .collect();
            for victim in &outcome.evicted {
                prop_assert!(store.get(victim).is_none());
                let victim_recency = before[victim];
                prop_assert!(survivors.iter().all(|s| victim_recency < *s));
            }
        }
    }

    #[test]
    fn protected_entries_survive_any_write_pattern(writes in arb_writes()) {
        let protected = key("/offline/");
        let store = open_store(120, vec![protected.clone()]);
        store
            .put(protected.clone(), bare_entry("/offline/", &[b'o'; 30]))
            .unwrap();

        for (index, size) in writes {
            let path = format!("/asset/{index}");
            match store.put(key(&path), bare_entry(&path, &vec![b'x'; size])) {
                Ok(outcome) => prop_assert!(!outcome.evicted.contains(&protected)),
                Err(err) => prop_assert!(matches!(err, StoreError::QuotaExceeded { .. }), "expected QuotaExceeded error"),
            }
            prop_assert!(store.get(&protected).is_some());
        }
    }
}

#[test]
fn least_recently_stored_goes_first() {
    let store = open_store(30, Vec::new());
    store.put(key("/a"), bare_entry("/a", &[1; 10])).unwrap();
    store.put(key("/b"), bare_entry("/b", &[2; 10])).unwrap();
    store.put(key("/c"), bare_entry("/c", &[3; 10])).unwrap();

    // Re-storing /a makes /b the oldest.
    store.put(key("/a"), bare_entry("/a", &[1; 10])).unwrap();
    let outcome = store.put(key("/d"), bare_entry("/d", &[4; 10])).unwrap();

    assert_eq!(outcome.evicted, vec![key("/b")]);
    assert!(store.get(&key("/a")).is_some());
    assert!(store.get(&key("/c")).is_some());
}
