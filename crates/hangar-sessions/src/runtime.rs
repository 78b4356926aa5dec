// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable session runtime.
//!
//! Wires a store, a runner and an event recorder into a [`SessionManager`]
//! and runs the background tasks around it:
//! - admission queue loop (when queueing is enabled)
//! - expiry worker (idle expiry and periodic reconciliation)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hangar_sessions::{Config, SessionRuntime};
//!
//! let runtime = SessionRuntime::builder()
//!     .config(Config::from_env()?)
//!     .runner(Arc::new(my_runner))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! let manager = runtime.manager();
//! // ... serve requests ...
//!
//! runtime.shutdown().await?;
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backpressure::BackpressureHandler;
use crate::config::{Config, ConfigError};
use crate::events::EventRecorder;
use crate::expiry_worker::ExpiryWorker;
use crate::manager::SessionManager;
use crate::persistence::{PostgresStore, SessionStore, SqliteStore};
use crate::runner::Runner;

const POSTGRES_MAX_CONNECTIONS: u32 = 10;

/// Builder for creating a [`SessionRuntime`].
pub struct SessionRuntimeBuilder {
    store: Option<Arc<dyn SessionStore>>,
    runner: Option<Arc<dyn Runner>>,
    recorder: Option<Arc<dyn EventRecorder>>,
    config: Config,
    reconcile_on_start: bool,
}

impl Default for SessionRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            runner: None,
            recorder: None,
            config: Config::default(),
            reconcile_on_start: true,
        }
    }
}

impl SessionRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session store.
    ///
    /// When unset, a store is opened from `database_url` in the config.
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the workload runner (required).
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the lifecycle event recorder.
    ///
    /// Default: events are discarded
    pub fn recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Set limits, timeouts and queue settings.
    ///
    /// Default: [`Config::default()`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Whether to reconcile sessions against the runner before starting.
    ///
    /// Default: true
    pub fn reconcile_on_start(mut self, enabled: bool) -> Self {
        self.reconcile_on_start = enabled;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if the runner is missing, or if neither a store nor
    /// a database URL was given.
    pub fn build(self) -> Result<SessionRuntimeConfig> {
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner is required"))?;

        let store = match (self.store, &self.config.database_url) {
            (Some(store), _) => StoreSource::Ready(store),
            (None, Some(url)) => StoreSource::Url(url.clone()),
            (None, None) => return Err(ConfigError::Missing("HANGAR_DATABASE_URL").into()),
        };

        Ok(SessionRuntimeConfig {
            store,
            runner,
            recorder: self.recorder,
            config: self.config,
            reconcile_on_start: self.reconcile_on_start,
        })
    }
}

enum StoreSource {
    Ready(Arc<dyn SessionStore>),
    Url(String),
}

/// Configuration for a [`SessionRuntime`].
pub struct SessionRuntimeConfig {
    store: StoreSource,
    runner: Arc<dyn Runner>,
    recorder: Option<Arc<dyn EventRecorder>>,
    config: Config,
    reconcile_on_start: bool,
}

impl SessionRuntimeConfig {
    /// Start the runtime, spawning the queue loop and the expiry worker.
    pub async fn start(self) -> Result<SessionRuntime> {
        let store = match self.store {
            StoreSource::Ready(store) => store,
            StoreSource::Url(url) => connect_store(&url).await?,
        };

        let mut manager =
            SessionManager::new(store, self.runner.clone(), self.config.manager_config());
        if let Some(recorder) = self.recorder {
            manager = manager.with_recorder(recorder);
        }
        if let Some(queue_config) = self.config.queue_config() {
            manager = manager.with_queue(queue_config);
        }
        let manager = Arc::new(manager);

        // Repair whatever a previous run left behind before taking traffic
        if self.reconcile_on_start {
            match manager.reconcile().await {
                Ok(report) if !report.is_empty() => {
                    info!(?report, "Startup reconciliation repaired drift");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Startup reconciliation failed"),
            }
        }

        let queue_handle = manager.queue().cloned().map(|queue| {
            tokio::spawn(async move {
                queue.run().await;
            })
        });

        let expiry_worker = ExpiryWorker::new(manager.clone(), self.config.expiry_worker_config());
        let expiry_shutdown = expiry_worker.shutdown_handle();
        let expiry_handle = tokio::spawn(async move {
            expiry_worker.run().await;
        });

        info!(
            runner = self.runner.runner_type(),
            queue_enabled = queue_handle.is_some(),
            max_global_sessions = self.config.max_global_sessions,
            "SessionRuntime started"
        );

        Ok(SessionRuntime {
            manager,
            queue_handle,
            expiry_handle,
            expiry_shutdown,
        })
    }
}

/// Open a store for `database_url` and run its migrations.
///
/// `postgres://` and `postgresql://` URLs open a [`PostgresStore`];
/// `sqlite:` URLs open a [`SqliteStore`] (`sqlite::memory:` for a private
/// in-memory database).
pub async fn connect_store(database_url: &str) -> Result<Arc<dyn SessionStore>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let store = PostgresStore::connect(database_url, POSTGRES_MAX_CONNECTIONS)
            .await
            .context("failed to open PostgreSQL session store")?;
        return Ok(Arc::new(store));
    }

    if let Some(rest) = database_url.strip_prefix("sqlite:") {
        let path = rest.trim_start_matches("//");
        let store = if path == ":memory:" {
            SqliteStore::in_memory().await
        } else {
            SqliteStore::from_path(path).await
        }
        .context("failed to open SQLite session store")?;
        return Ok(Arc::new(store));
    }

    Err(ConfigError::Invalid(
        "HANGAR_DATABASE_URL",
        "must start with postgres://, postgresql:// or sqlite:",
    )
    .into())
}

/// A running session core that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SessionRuntime {
    manager: Arc<SessionManager>,
    queue_handle: Option<JoinHandle<()>>,
    expiry_handle: JoinHandle<()>,
    expiry_shutdown: Arc<Notify>,
}

impl SessionRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SessionRuntimeBuilder {
        SessionRuntimeBuilder::new()
    }

    /// The session manager serving requests.
    pub fn manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    /// A load and readiness handler over this runtime's manager.
    pub fn backpressure(&self) -> BackpressureHandler {
        BackpressureHandler::new(self.manager.clone())
    }

    /// Gracefully shut down the runtime.
    ///
    /// Every queued caller is released with
    /// [`QueueError::ShuttingDown`](crate::queue::QueueError::ShuttingDown),
    /// then the background tasks are stopped and awaited. Running sessions
    /// and their workloads are left alone.
    pub async fn shutdown(self) -> Result<()> {
        info!("SessionRuntime shutting down...");

        if let Some(queue) = self.manager.queue() {
            queue.shutdown();
        }
        self.expiry_shutdown.notify_one();

        if let Some(handle) = self.queue_handle
            && let Err(e) = handle.await
        {
            error!("Session queue task panicked: {}", e);
        }

        if let Err(e) = self.expiry_handle.await {
            error!("Expiry worker task panicked: {}", e);
        }

        info!("SessionRuntime shutdown complete");
        Ok(())
    }
}
