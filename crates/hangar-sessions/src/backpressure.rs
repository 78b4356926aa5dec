// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Load and readiness signalling.
//!
//! Read-side view over the manager and its queue for health endpoints, load
//! balancers and autoscalers. Every call reads fresh counts from the store
//! so all replicas report the same load.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::manager::SessionManager;

/// Load factor at which a replica reports itself not ready.
pub const READINESS_LOAD_THRESHOLD: f64 = 0.95;

const MIN_RETRY_AFTER_SECS: f64 = 5.0;
const MAX_RETRY_AFTER_SECS: f64 = 30.0;

/// Snapshot of current load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadStatus {
    /// Sessions in `creating` or `running`.
    pub active_sessions: u64,
    /// Global limit (0 = unlimited).
    pub max_sessions: u32,
    /// `active / max`, clamped to `[0, 1]`; 0 when unlimited.
    pub load_factor: f64,
    /// Whether an admission queue is configured.
    pub queue_enabled: bool,
    /// Callers currently waiting.
    pub queue_length: usize,
    /// Queue capacity (0 without a queue).
    pub queue_max_size: usize,
    /// Whether a new request would be admitted or queued.
    pub accepting: bool,
    /// Suggested client back-off.
    pub retry_after_secs: u64,
}

impl LoadStatus {
    /// Derive a snapshot from raw counts. `queue` is `(length, max_size)`.
    pub fn compute(active_sessions: u64, max_sessions: u32, queue: Option<(usize, usize)>) -> Self {
        let load_factor = if max_sessions == 0 {
            0.0
        } else {
            (active_sessions as f64 / f64::from(max_sessions)).min(1.0)
        };

        let at_capacity = max_sessions > 0 && active_sessions >= u64::from(max_sessions);
        let queue_has_room = queue.is_some_and(|(len, max)| len < max);
        let accepting = !at_capacity || queue_has_room;

        let (queue_length, queue_max_size) = queue.unwrap_or((0, 0));

        Self {
            active_sessions,
            max_sessions,
            load_factor,
            queue_enabled: queue.is_some(),
            queue_length,
            queue_max_size,
            accepting,
            retry_after_secs: retry_after(load_factor).as_secs(),
        }
    }

    /// Whether new traffic should be routed to this replica.
    pub fn is_ready(&self) -> bool {
        self.max_sessions == 0 || self.load_factor < READINESS_LOAD_THRESHOLD
    }
}

/// Retry-After for a load factor: 5s idle up to 30s at full load.
pub fn retry_after(load_factor: f64) -> Duration {
    let lf = load_factor.clamp(0.0, 1.0);
    let secs = MIN_RETRY_AFTER_SECS + lf * (MAX_RETRY_AFTER_SECS - MIN_RETRY_AFTER_SECS);
    Duration::from_secs(secs.round() as u64)
}

/// Result of the readiness probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadinessStatus {
    /// Whether the replica should receive new traffic.
    pub ready: bool,
    /// Why not, when not ready.
    pub reason: Option<String>,
    /// Whether the store answered.
    pub store_healthy: bool,
    /// Whether the workload platform answered.
    pub runner_healthy: bool,
    /// Load snapshot, if it could be computed.
    pub load: Option<LoadStatus>,
}

/// Computes load and readiness signals.
pub struct BackpressureHandler {
    manager: Arc<SessionManager>,
}

impl BackpressureHandler {
    /// Create a handler over `manager`.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Current load, read fresh from the store.
    pub async fn load_status(&self) -> Result<LoadStatus> {
        let active = self.manager.active_session_count().await?;
        let queue = self.manager.queue().map(|q| (q.len(), q.max_size()));
        Ok(LoadStatus::compute(
            active,
            self.manager.config().max_global_sessions,
            queue,
        ))
    }

    /// Readiness probe covering the store, the runner and load.
    ///
    /// Only gates new routing; it says nothing about established sessions.
    pub async fn enhanced_readiness_check(&self) -> ReadinessStatus {
        let store_healthy = match self.manager.store().health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(error = %e, "Session store health check failed");
                false
            }
        };
        let runner_healthy = self.manager.runner().healthy().await;

        let load = if store_healthy {
            match self.load_status().await {
                Ok(load) => Some(load),
                Err(e) => {
                    warn!(error = %e, "Failed to compute load status");
                    None
                }
            }
        } else {
            None
        };

        let reason = if !store_healthy {
            Some("session store unavailable".to_string())
        } else if !runner_healthy {
            Some("workload runner unavailable".to_string())
        } else {
            match &load {
                None => Some("load status unavailable".to_string()),
                Some(load) if !load.is_ready() => Some(format!(
                    "load factor {:.2} at or above {:.2}",
                    load.load_factor, READINESS_LOAD_THRESHOLD
                )),
                Some(_) => None,
            }
        };

        ReadinessStatus {
            ready: reason.is_none(),
            reason,
            store_healthy,
            runner_healthy,
            load,
        }
    }

    /// Response headers advertising load. `Retry-After` only when not accepting.
    pub async fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(Self::headers_for(&self.load_status().await?))
    }

    /// Headers for an already computed snapshot.
    pub fn headers_for(load: &LoadStatus) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-Load-Factor", format!("{:.2}", load.load_factor)),
            ("X-Active-Sessions", load.active_sessions.to_string()),
            ("X-Queue-Length", load.queue_length.to_string()),
        ];
        if !load.accepting {
            headers.push(("Retry-After", load.retry_after_secs.to_string()));
        }
        headers
    }
}
