// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that expires idle sessions.
//!
//! Every `poll_interval` the worker asks the manager for running sessions
//! idle past the session timeout and expires each through the regular
//! expire path. When `reconcile_interval` is set it also runs
//! reconciliation on that cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::manager::SessionManager;

const MIN_PERIOD: Duration = Duration::from_millis(1);
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Configuration for the expiry worker.
#[derive(Debug, Clone)]
pub struct ExpiryWorkerConfig {
    /// How often to sweep for idle sessions.
    pub poll_interval: Duration,
    /// How often to reconcile against the runner (None = never).
    pub reconcile_interval: Option<Duration>,
}

impl Default for ExpiryWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            reconcile_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// Background worker that expires idle sessions.
pub struct ExpiryWorker {
    manager: Arc<SessionManager>,
    config: ExpiryWorkerConfig,
    shutdown: Arc<Notify>,
}

impl ExpiryWorker {
    /// Create a new expiry worker.
    pub fn new(manager: Arc<SessionManager>, config: ExpiryWorkerConfig) -> Self {
        Self {
            manager,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            session_timeout_secs = self.manager.config().session_timeout.as_secs(),
            reconcile_interval_secs = self.config.reconcile_interval.map(|d| d.as_secs()),
            "Expiry worker started"
        );

        let poll_interval = self.config.poll_interval.max(MIN_PERIOD);
        let mut sweep = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A disabled reconcile timer still needs a period; it is never polled.
        let reconcile_period = self
            .config
            .reconcile_interval
            .unwrap_or(FAR_FUTURE)
            .max(MIN_PERIOD);
        let mut reconcile =
            tokio::time::interval_at(Instant::now() + reconcile_period, reconcile_period);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Expiry worker received shutdown signal");
                    break;
                }

                _ = sweep.tick() => {
                    self.sweep_once().await;
                }

                _ = reconcile.tick(), if self.config.reconcile_interval.is_some() => {
                    self.reconcile_once().await;
                }
            }
        }

        info!("Expiry worker stopped");
    }

    /// Run a single expiry sweep.
    pub async fn sweep_once(&self) -> usize {
        match self.manager.expire_stale_sessions().await {
            Ok(0) => {
                debug!("Expiry sweep found no idle sessions");
                0
            }
            Ok(expired) => expired,
            Err(e) => {
                error!(error = %e, "Expiry sweep failed");
                0
            }
        }
    }

    async fn reconcile_once(&self) {
        if let Err(e) = self.manager.reconcile().await {
            error!(error = %e, "Periodic reconciliation failed");
        }
    }
}
