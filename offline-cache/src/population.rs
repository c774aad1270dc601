//! Population Policy
//!
//! Seeds a fresh generation from a manifest of URLs. Everything is written
//! into a staging generation; the active generation changes only when the
//! policy accepts the outcome, and is left untouched otherwise.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::entry::{CacheEntry, GenerationId};
use crate::error::{NetworkError, PopulationError, ResourceFailure};
use crate::http::{Request, Response};
use crate::key::{CacheKey, KeyOptions};
use crate::network::{fetch_with_timeout, Fetcher, DEFAULT_TIMEOUT};
use crate::store::CacheStore;

/// What to do when some manifest resources fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationPolicy {
    /// Any failure aborts population; the previous generation stays active.
    #[default]
    AllOrNothing,
    /// Activate with whatever succeeded; failures are logged.
    BestEffort,
}

/// Outcome of a successful population run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationReport {
    pub generation: GenerationId,
    pub version: String,
    pub stored: Vec<CacheKey>,
    /// Always empty under `AllOrNothing`.
    pub failures: Vec<ResourceFailure>,
    pub total_bytes: u64,
}

impl PopulationReport {
    /// Whether every manifest resource was stored.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs population against a store.
pub struct Populator {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    key_options: KeyOptions,
    policy: PopulationPolicy,
    concurrency: usize,
    timeout: Duration,
}

impl Populator {
    /// Create a populator with the default policy, concurrency 4 and a 3 s timeout.
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>, origin: Url) -> Self {
        Self {
            store,
            fetcher,
            origin,
            key_options: KeyOptions::default(),
            policy: PopulationPolicy::default(),
            concurrency: 4,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set population policy
    pub fn with_policy(mut self, policy: PopulationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_key_options(mut self, options: KeyOptions) -> Self {
        self.key_options = options;
        self
    }

    /// Set concurrent fetch limit (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get policy
    pub fn policy(&self) -> PopulationPolicy {
        self.policy
    }

    /// Resolve manifest URLs to keys, collapsing duplicates in order.
    pub fn resolve(&self, manifest: &[String]) -> Result<Vec<CacheKey>, PopulationError> {
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(manifest.len());
        for url in manifest {
            let key = CacheKey::get(url, Some(&self.origin), &self.key_options).map_err(|e| {
                PopulationError::InvalidUrl {
                    url: url.clone(),
                    reason: e.reason,
                }
            })?;
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Err(PopulationError::EmptyManifest);
        }
        Ok(keys)
    }

    /// Fetch every manifest resource into a new generation tagged `version`
    /// and activate it if the policy accepts the result.
    ///
    /// The staged generation never evicts, so a manifest larger than the
    /// store's capacity fails with `PopulationError::Store` under either
    /// policy.
    pub async fn populate(
        &self,
        version: &str,
        manifest: &[String],
    ) -> Result<PopulationReport, PopulationError> {
        let keys = self.resolve(manifest)?;
        let total = keys.len();
        log::info!(
            "populating {} with {} resources ({:?})",
            version,
            total,
            self.policy
        );

        let results: Vec<(CacheKey, Result<Response, NetworkError>)> = stream::iter(keys)
            .map(|key| async move {
                let request = Request::new(key.url());
                let result = fetch_with_timeout(self.fetcher.as_ref(), &request, self.timeout)
                    .await
                    .and_then(|response| {
                        if response.ok() {
                            Ok(response)
                        } else {
                            Err(NetworkError::Status {
                                status: response.status,
                            })
                        }
                    });
                (key, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fetched = Vec::new();
        let mut failures = Vec::new();
        for (key, result) in results {
            match result {
                Ok(response) => fetched.push((key, response)),
                Err(error) => {
                    log::warn!("failed to fetch {} for {}: {}", key.url(), version, error);
                    failures.push(ResourceFailure {
                        url: key.url().to_string(),
                        error,
                    });
                }
            }
        }

        if self.policy == PopulationPolicy::AllOrNothing && !failures.is_empty() {
            return Err(PopulationError::Incomplete {
                version: version.to_string(),
                total,
                failures,
            });
        }
        if fetched.is_empty() {
            return Err(PopulationError::NothingFetched {
                version: version.to_string(),
                failures,
            });
        }

        let generation = self.store.begin_generation(version)?;
        let mut stored = Vec::with_capacity(fetched.len());
        let mut total_bytes = 0;
        for (key, response) in fetched {
            let entry = CacheEntry::from_response(key.clone(), &response);
            match self.store.put_into(generation, key.clone(), entry) {
                Ok(outcome) => {
                    total_bytes += outcome.size_bytes;
                    stored.push(key);
                }
                Err(e) => {
                    self.abandon(generation);
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self.store.activate(generation) {
            self.abandon(generation);
            return Err(e.into());
        }

        log::info!(
            "populated {} as {}: {} stored, {} failed",
            version,
            generation,
            stored.len(),
            failures.len()
        );

        Ok(PopulationReport {
            generation,
            version: version.to_string(),
            stored,
            failures,
            total_bytes,
        })
    }

    fn abandon(&self, generation: GenerationId) {
        if let Err(e) = self.store.discard(generation) {
            log::warn!("failed to discard staging generation {}: {}", generation, e);
        }
    }
}
