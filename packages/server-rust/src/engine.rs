//! Engine assembly: shard stores, router, and background workers.
//!
//! Follows the deferred-startup pattern: [`Engine::new`] validates the
//! configuration and allocates the stores (wiring the shared event log into
//! each), [`Engine::start`] recovers snapshots and spawns the expirer and
//! snapshotter per shard, and [`Engine::shutdown`] signals every worker,
//! waits bounded for the final snapshot saves, and returns. All state is
//! reachable from the engine value; there are no module-level singletons.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::Router;
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::storage::{expirer, snapshot, EventLog, MutationObserver, Snapshotter, Store};

/// Mutations the event log retains for the admin surface.
const EVENT_LOG_CAPACITY: usize = 1024;

/// One process-worth of shards plus their background workers.
pub struct Engine {
    config: EngineConfig,
    router: Router,
    event_log: Arc<EventLog>,
    shutdown_tx: watch::Sender<bool>,
    expirers: Vec<JoinHandle<()>>,
    snapshotters: Vec<Snapshotter>,
}

impl Engine {
    /// Builds the shard stores and router without starting any worker.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the shard list or capacity is
    /// invalid.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let event_log = Arc::new(EventLog::new(EVENT_LOG_CAPACITY));
        let stores: Vec<Arc<Store>> = config
            .shards
            .iter()
            .map(|name| {
                let store = Arc::new(Store::new(name.clone(), config.max_entries));
                store.register_observer(
                    Arc::clone(&event_log) as Arc<dyn MutationObserver>
                );
                store
            })
            .collect();
        let router = Router::new(stores);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            router,
            event_log,
            shutdown_tx,
            expirers: Vec::new(),
            snapshotters: Vec::new(),
        })
    }

    /// Recovers each shard from its snapshot and spawns the background
    /// workers. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        for store in self.router.stores() {
            let path = self.config.snapshot_path(store.name());
            snapshot::recover(store, &path);
            self.expirers.push(expirer::spawn(
                Arc::clone(store),
                self.config.expirer_max_sleep(),
                self.shutdown_tx.subscribe(),
            ));
            self.snapshotters.push(Snapshotter::spawn(
                Arc::clone(store),
                path,
                self.config.snapshot_interval(),
                self.shutdown_tx.subscribe(),
            ));
        }
        info!(shards = self.router.stores().len(), "engine started");
    }

    /// The router over this engine's shards.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The shared mutation event log.
    #[must_use]
    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Requests an immediate snapshot save on every shard (operator
    /// command); concurrent requests coalesce per shard.
    pub fn request_save_all(&self) {
        for snapshotter in &self.snapshotters {
            snapshotter.request_save();
        }
    }

    /// Stops every background worker, waiting bounded for the final
    /// snapshot saves.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for snapshotter in self.snapshotters {
            if tokio::time::timeout(Duration::from_secs(5), snapshotter.join())
                .await
                .is_err()
            {
                warn!("snapshotter did not finish its final save in time");
            }
        }
        for task in self.expirers {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
        info!("engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("shards", &self.config.shards)
            .field("max_entries", &self.config.max_entries)
            .finish()
    }
}
