//! Host-facing facade.
//!
//! `OfflineWorker` wires the store, population and interceptor together
//! from an [`OfflineCacheConfig`] and exposes the three hooks a host calls:
//! [`on_init`](OfflineWorker::on_init), [`on_activate`](OfflineWorker::on_activate)
//! and [`handle`](OfflineWorker::handle).

use std::sync::Arc;

use crate::backend::{FsBackend, MemoryBackend, StorageBackend};
use crate::config::OfflineCacheConfig;
use crate::entry::GenerationId;
use crate::error::{LifecycleError, ServeError, StoreError, WorkerError};
use crate::http::Request;
use crate::interceptor::{FetchInterceptor, InterceptedResponse, InterceptorStats};
use crate::lifecycle::{notify, LifecycleEvent, LifecycleManager, WorkerState};
use crate::network::Fetcher;
use crate::population::{PopulationReport, Populator};
use crate::store::CacheStore;

/// Result of [`OfflineWorker::on_init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new generation was fetched and activated.
    Populated(PopulationReport),
    /// The active generation already matched the configured version.
    Reused {
        generation: GenerationId,
        version: String,
    },
}

impl InitOutcome {
    /// Generation active after install.
    pub fn generation(&self) -> GenerationId {
        match self {
            Self::Populated(report) => report.generation,
            Self::Reused { generation, .. } => *generation,
        }
    }
}

pub struct OfflineWorker {
    config: OfflineCacheConfig,
    store: Arc<CacheStore>,
    populator: Populator,
    interceptor: FetchInterceptor,
    lifecycle: spin::Mutex<LifecycleManager>,
    /// Serializes the install and activate hooks.
    hooks: tokio::sync::Mutex<()>,
}

impl OfflineWorker {
    /// Build a worker over the backend named by `cache.storage_dir`, or an
    /// in-memory one when unset.
    pub fn open(config: OfflineCacheConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, WorkerError> {
        let backend: Arc<dyn StorageBackend> = match &config.cache.storage_dir {
            Some(dir) => Arc::new(FsBackend::open(dir).map_err(StoreError::Io)?),
            None => Arc::new(MemoryBackend::new()),
        };
        Self::with_backend(config, backend, fetcher)
    }

    /// Build a worker over an explicit storage backend.
    pub fn with_backend(
        config: OfflineCacheConfig,
        backend: Arc<dyn StorageBackend>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let origin = config.origin()?;
        let store = Arc::new(CacheStore::open(backend, config.store_options()?)?);

        let populator = Populator::new(store.clone(), fetcher.clone(), origin.clone())
            .with_policy(config.population.policy)
            .with_key_options(config.key_options())
            .with_concurrency(config.population.concurrency)
            .with_timeout(config.timeout());

        let interceptor = FetchInterceptor::new(store.clone(), fetcher, origin)
            .with_policy(config.intercept_policy())
            .with_key_options(config.key_options())
            .with_fallbacks(config.fallback_table()?);

        log::info!(
            "offline worker for {} ({}) opened",
            config.cache.origin,
            config.cache_tag()
        );

        Ok(Self {
            config,
            store,
            populator,
            interceptor,
            lifecycle: spin::Mutex::new(LifecycleManager::new()),
            hooks: tokio::sync::Mutex::new(()),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &OfflineCacheConfig {
        &self.config
    }

    /// Get the shared store
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Get current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.lifecycle.lock().state()
    }

    /// Interceptor counters
    pub fn stats(&self) -> InterceptorStats {
        self.interceptor.stats()
    }

    /// Register a lifecycle listener. Listeners run without any worker
    /// lock held and may query the worker.
    pub fn add_listener(&self, listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static) {
        self.lifecycle.lock().add_listener(Arc::new(listener));
    }

    fn transition(&self, to: WorkerState) -> Result<(), WorkerError> {
        let (event, listeners) = {
            let mut lifecycle = self.lifecycle.lock();
            (lifecycle.transition(to)?, lifecycle.listeners())
        };
        notify(&listeners, &event);
        Ok(())
    }

    fn emit(&self, event: LifecycleEvent) {
        let listeners = self.lifecycle.lock().listeners();
        notify(&listeners, &event);
    }

    /// Install hook: make sure a generation for the configured version is
    /// active. Safe to call repeatedly.
    pub async fn on_init(&self) -> Result<InitOutcome, WorkerError> {
        let _hooks = self.hooks.lock().await;

        if matches!(self.state(), WorkerState::Parsed | WorkerState::Redundant) {
            self.transition(WorkerState::Installing)?;
        }

        match self.install().await {
            Ok(outcome) => {
                if self.state() == WorkerState::Installing {
                    self.transition(WorkerState::Installed)?;
                }
                let (version, reused) = match &outcome {
                    InitOutcome::Populated(report) => (report.version.clone(), false),
                    InitOutcome::Reused { version, .. } => (version.clone(), true),
                };
                self.emit(LifecycleEvent::Installed {
                    generation: outcome.generation(),
                    version,
                    reused,
                });
                Ok(outcome)
            }
            Err(e) => {
                log::error!("install of {} failed: {}", self.config.cache_tag(), e);
                if self.state() == WorkerState::Installing {
                    self.transition(WorkerState::Redundant)?;
                }
                Err(e)
            }
        }
    }

    async fn install(&self) -> Result<InitOutcome, WorkerError> {
        let tag = self.config.cache_tag();
        let manifest = self.config.manifest();
        let keys = self.populator.resolve(&manifest)?;

        if let Some(active) = self.store.snapshot() {
            if active.version() == tag && keys.iter().all(|key| active.contains(key)) {
                log::info!("reusing generation {} for {}", active.id(), tag);
                return Ok(InitOutcome::Reused {
                    generation: active.id(),
                    version: tag,
                });
            }
        }

        let report = self.populator.populate(&tag, &manifest).await?;
        Ok(InitOutcome::Populated(report))
    }

    /// Activate hook: retire stale generations and take control of request
    /// handling. Safe to call repeatedly once installed.
    pub async fn on_activate(&self) -> Result<(), WorkerError> {
        let _hooks = self.hooks.lock().await;

        match self.state() {
            WorkerState::Activated => return Ok(()),
            WorkerState::Installed => {}
            other => return Err(LifecycleError::NotInstalled(other).into()),
        }

        self.transition(WorkerState::Activating)?;
        match self.store.retire_inactive() {
            Ok(retired) => {
                if retired > 0 {
                    log::info!("retired {} stale generations", retired);
                }
            }
            Err(e) => {
                log::error!("activation failed: {}", e);
                self.transition(WorkerState::Redundant)?;
                return Err(e.into());
            }
        }
        self.transition(WorkerState::Activated)?;
        let claimed = self.lifecycle.lock().claim()?;
        self.emit(claimed);
        Ok(())
    }

    /// Fetch hook. Before activation requests go straight to the network.
    pub async fn handle(&self, request: &Request) -> Result<InterceptedResponse, ServeError> {
        if self.state().controls_requests() {
            self.interceptor.handle(request).await
        } else {
            self.interceptor.passthrough(request).await
        }
    }
}
