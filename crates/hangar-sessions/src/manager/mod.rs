// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session manager - the orchestrator.
//!
//! Turns creation requests into running sessions and drives them through
//! their lifecycle. The manager is stateless apart from its collaborators:
//! every read goes to the [`SessionStore`] so any number of replicas can run
//! side by side.
//!
//! - `lifecycle`: create / stop / restart / terminate / expire
//! - `quota`: per-user, per-tenant and global admission
//! - `readiness`: background task that waits for a workload and records the outcome
//! - `workload`: workload config building, provisioning and teardown
//! - `reconcile`: repairs drift between sessions and backend workloads

mod lifecycle;
mod quota;
mod readiness;
mod reconcile;
mod workload;

pub use quota::QuotaStatus;
pub use reconcile::ReconcileReport;
pub use workload::{APP_LABEL, SESSION_LABEL, USER_LABEL};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::{EventRecorder, NoopRecorder};
use crate::models::{Application, ResourceLimits, Session};
use crate::persistence::SessionStore;
use crate::queue::{CapacityCheck, QueueConfig, SessionQueue};
use crate::runner::Runner;
use quota::Admissions;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum active sessions per user (0 = unlimited).
    pub max_sessions_per_user: u32,
    /// Maximum active sessions per tenant (0 = unlimited).
    pub max_sessions_per_tenant: u32,
    /// Maximum active sessions overall (0 = unlimited).
    pub max_global_sessions: u32,
    /// Idle time after which a running session is expired.
    pub session_timeout: Duration,
    /// How long a workload may take to become ready.
    pub ready_timeout: Duration,
    /// Resource limits used when an application defines none.
    pub default_resources: ResourceLimits,
    /// Minimum age before an unowned workload is deleted by reconciliation.
    pub orphan_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: 5,
            max_sessions_per_tenant: 0,
            max_global_sessions: 0,
            session_timeout: Duration::from_secs(2 * 3600),
            ready_timeout: Duration::from_secs(300),
            default_resources: ResourceLimits::default(),
            orphan_grace: Duration::from_secs(300),
        }
    }
}

/// `now - age`, saturating at the earliest representable time.
pub(crate) fn cutoff_before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Capacity check backing the admission queue: "active + starting sessions < global limit".
struct GlobalCapacity {
    store: Arc<dyn SessionStore>,
    admissions: Arc<Admissions>,
    max_global_sessions: u32,
}

#[async_trait]
impl CapacityCheck for GlobalCapacity {
    async fn has_capacity(&self) -> bool {
        if self.max_global_sessions == 0 {
            return true;
        }
        match self.store.count_active_sessions().await {
            Ok(active) => {
                active + self.admissions.pending() < u64::from(self.max_global_sessions)
            }
            Err(e) => {
                warn!(error = %e, "Failed to count active sessions for queue");
                false
            }
        }
    }
}

/// Orchestrates session lifecycles against a store and a runner.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    runner: Arc<dyn Runner>,
    recorder: Arc<dyn EventRecorder>,
    queue: Option<Arc<SessionQueue>>,
    admissions: Arc<Admissions>,
    config: ManagerConfig,
}

impl SessionManager {
    /// Create a manager without an admission queue and with a no-op recorder.
    pub fn new(
        store: Arc<dyn SessionStore>,
        runner: Arc<dyn Runner>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            runner,
            recorder: Arc::new(NoopRecorder),
            queue: None,
            admissions: Arc::new(Admissions::default()),
            config,
        }
    }

    /// Use `recorder` for lifecycle events.
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Enable the admission queue for requests over the global limit.
    ///
    /// The queue's processing loop is not started here; run
    /// [`SessionQueue::run`] on the returned [`queue`](Self::queue).
    pub fn with_queue(mut self, config: QueueConfig) -> Self {
        let capacity = GlobalCapacity {
            store: self.store.clone(),
            admissions: self.admissions.clone(),
            max_global_sessions: self.config.max_global_sessions,
        };
        self.queue = Some(Arc::new(SessionQueue::new(config, Arc::new(capacity))));
        self
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Admission queue, if enabled.
    pub fn queue(&self) -> Option<&Arc<SessionQueue>> {
        self.queue.as_ref()
    }

    /// Session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Workload runner.
    pub fn runner(&self) -> &Arc<dyn Runner> {
        &self.runner
    }

    /// Fetch a session.
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// List every session, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.store.list_sessions().await?)
    }

    /// List a user's sessions, newest first.
    pub async fn list_sessions_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self.store.list_sessions_by_user(user_id).await?)
    }

    /// Record user activity, postponing idle expiry.
    ///
    /// Returns false if the session exists but is not live.
    pub async fn touch_session(&self, id: &str) -> Result<bool> {
        if self.store.touch_session(id).await? {
            return Ok(true);
        }
        // Distinguish "not live" from "no such session"
        self.get_session(id).await?;
        Ok(false)
    }

    /// Number of sessions in `creating` or `running` across all replicas.
    pub async fn active_session_count(&self) -> Result<u64> {
        Ok(self.store.count_active_sessions().await?)
    }

    /// Wake the queue loop; capacity may have freed up.
    pub fn notify_capacity(&self) {
        if let Some(queue) = &self.queue {
            queue.notify_capacity();
        }
    }

    async fn load_application(&self, app_id: &str) -> Result<Application> {
        self.store
            .get_application(app_id)
            .await?
            .ok_or_else(|| Error::ApplicationNotFound(app_id.to_string()))
    }
}
