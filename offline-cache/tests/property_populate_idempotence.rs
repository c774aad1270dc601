//! Property: population is idempotent.
//!
//! Populating twice with the same manifest leaves an active generation with
//! the same keys and payloads as populating once, and re-running the install
//! hook without a version bump reuses the generation without network I/O.

mod common;

use std::sync::Arc;

use common::{key, site_config, ScriptedFetcher, ORIGIN};
use kpio_offline_cache::{
    CacheStore, InitOutcome, MemoryBackend, OfflineWorker, Populator, StoreOptions,
};
use proptest::prelude::*;
use url::Url;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Manifests drawn from a small path set, duplicates allowed.
fn arb_manifest() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(
        prop_oneof![
            Just("/".to_string()),
            Just("/offline/".to_string()),
            Just("/static/css/style.css".to_string()),
            Just("/manifest.json".to_string()),
            Just(format!("{ORIGIN}/manifest.json")),
        ],
        1..8,
    )
}

fn contents(store: &CacheStore) -> Vec<(String, Vec<u8>, u16)> {
    store
        .snapshot()
        .unwrap()
        .entries()
        .iter()
        .map(|e| (e.key.url().to_string(), e.payload.clone(), e.status))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn populating_twice_matches_populating_once(manifest in arb_manifest()) {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.serve_site();
        let store = Arc::new(
            CacheStore::open(Arc::new(MemoryBackend::new()), StoreOptions::default()).unwrap(),
        );
        let populator = Populator::new(store.clone(), fetcher, Url::parse(ORIGIN).unwrap());

        let rt = runtime();
        let first = rt.block_on(populator.populate("v1", &manifest)).unwrap();
        let once = contents(&store);
        let second = rt.block_on(populator.populate("v1", &manifest)).unwrap();
        let twice = contents(&store);

        prop_assert_eq!(once, twice);
        prop_assert_eq!(first.stored, second.stored);
        prop_assert_eq!(store.list_generations().len(), 1);
    }
}

#[tokio::test]
async fn repeated_install_reuses_active_generation() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.serve_site();
    let worker = OfflineWorker::with_backend(
        site_config("v1", ""),
        Arc::new(MemoryBackend::new()),
        fetcher.clone(),
    )
    .unwrap();

    let first = worker.on_init().await.unwrap();
    assert!(matches!(first, InitOutcome::Populated(_)));
    let calls = fetcher.calls();
    assert_eq!(calls, 4);

    let second = worker.on_init().await.unwrap();
    assert_eq!(
        second,
        InitOutcome::Reused {
            generation: first.generation(),
            version: "expense-tracker-v1".to_string(),
        }
    );
    assert_eq!(fetcher.calls(), calls);
    assert!(worker.store().get(&key("/offline/")).is_some());
}
