// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background readiness task.
//!
//! One task per created or restarted session. It owns clones of the
//! collaborators and writes its outcome back through the store only, so it
//! needs no coordination with request handlers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::SessionManager;
use super::workload::teardown_workload;
use crate::events::{EventRecorder, SessionEvent, SessionEventKind};
use crate::models::{Session, SessionStatus};
use crate::persistence::SessionStore;
use crate::queue::SessionQueue;
use crate::runner::{Runner, RunnerError};
use crate::state_machine::validate_and_log_transition;

struct ReadinessTask {
    store: Arc<dyn SessionStore>,
    runner: Arc<dyn Runner>,
    recorder: Arc<dyn EventRecorder>,
    queue: Option<Arc<SessionQueue>>,
    timeout: Duration,
}

impl SessionManager {
    /// Spawn the readiness task for a session in `creating`.
    pub(crate) fn spawn_readiness(&self, session: Session) -> tokio::task::JoinHandle<()> {
        let task = ReadinessTask {
            store: self.store.clone(),
            runner: self.runner.clone(),
            recorder: self.recorder.clone(),
            queue: self.queue.clone(),
            timeout: self.config.ready_timeout,
        };
        tokio::spawn(task.run(session))
    }
}

impl ReadinessTask {
    async fn run(self, session: Session) {
        debug!(
            session_id = %session.id,
            workload = %session.workload_name,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for workload readiness"
        );

        match self.await_address(&session.workload_name).await {
            Ok(ip) => self.mark_ready(&session, &ip).await,
            Err(e) => self.mark_failed(&session, &e.to_string()).await,
        }
    }

    async fn await_address(&self, workload_name: &str) -> Result<String, RunnerError> {
        self.runner.wait_for_ready(workload_name, self.timeout).await?;
        self.runner.get_ip(workload_name).await
    }

    async fn mark_ready(&self, session: &Session, ip: &str) {
        if validate_and_log_transition(
            &session.id,
            SessionStatus::Creating,
            SessionStatus::Running,
            "workload ready",
        )
        .is_err()
        {
            return;
        }

        match self.store.set_session_ready(&session.id, ip).await {
            Ok(true) => {
                info!(
                    session_id = %session.id,
                    workload = %session.workload_name,
                    ip = %ip,
                    "Session ready"
                );
                self.recorder.record(
                    SessionEvent::new(session, SessionEventKind::Ready)
                        .with_metadata("workload", session.workload_name.as_str())
                        .with_metadata("ip", ip),
                );
            }
            Ok(false) => {
                // Failed by reconciliation or another replica while we waited
                debug!(
                    session_id = %session.id,
                    "Session left creating before it became ready"
                );
            }
            Err(e) => {
                error!(
                    session_id = %session.id,
                    error = %e,
                    "Failed to record session readiness"
                );
            }
        }
    }

    async fn mark_failed(&self, session: &Session, reason: &str) {
        warn!(
            session_id = %session.id,
            workload = %session.workload_name,
            reason = %reason,
            "Workload did not become ready"
        );

        let recorded = validate_and_log_transition(
            &session.id,
            SessionStatus::Creating,
            SessionStatus::Failed,
            reason,
        )
        .is_ok();

        if recorded {
            match self
                .store
                .update_session_status(&session.id, SessionStatus::Creating, SessionStatus::Failed)
                .await
            {
                Ok(true) => {
                    self.recorder.record(
                        SessionEvent::new(session, SessionEventKind::Failed)
                            .with_reason(reason)
                            .with_metadata("workload", session.workload_name.as_str()),
                    );
                }
                Ok(false) => {
                    debug!(session_id = %session.id, "Session already left creating");
                }
                Err(e) => {
                    error!(
                        session_id = %session.id,
                        error = %e,
                        "Failed to record session failure"
                    );
                }
            }
        }

        teardown_workload(self.runner.as_ref(), &session.id, &session.workload_name).await;

        if let Some(queue) = &self.queue {
            queue.notify_capacity();
        }
    }
}
