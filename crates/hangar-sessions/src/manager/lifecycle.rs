// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session lifecycle operations.

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::workload::teardown_workload;
use super::{SessionManager, cutoff_before};
use crate::error::{Error, Result};
use crate::events::{SessionEvent, SessionEventKind};
use crate::models::{CreateSessionRequest, Session, SessionStatus};
use crate::state_machine::{is_terminal_state, validate_and_log_transition};

const REASON_STOP: &str = "stop requested";
const REASON_TERMINATE: &str = "user requested";
const REASON_EXPIRE: &str = "session timeout";
const REASON_RESTART: &str = "restart requested";

impl SessionManager {
    /// Create a session and start its workload.
    ///
    /// Returns once the session is persisted in `creating`; readiness is
    /// driven by a background task and observed through [`get_session`].
    /// When the global limit is reached and a queue is configured, this waits
    /// in the queue. Dropping the future leaves the queue.
    ///
    /// [`get_session`]: SessionManager::get_session
    pub async fn create_session(&self, req: CreateSessionRequest) -> Result<Session> {
        if req.user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("user_id is required".to_string()));
        }
        if req.app_id.trim().is_empty() {
            return Err(Error::InvalidRequest("app_id is required".to_string()));
        }

        let app = self.load_application(&req.app_id).await?;
        let image = self.runnable_image(&app)?;

        let permit = self.admit(&req.user_id, app.tenant_id.as_deref()).await?;

        let session_id = Uuid::new_v4().to_string();
        let config = self.build_workload_config(&session_id, &req.user_id, &app, image, req.screen);
        let workload = self.provision(&config, &app).await?;

        let now = Utc::now();
        let session = Session {
            id: session_id,
            user_id: req.user_id,
            tenant_id: app.tenant_id.clone(),
            app_id: app.id.clone(),
            workload_name: workload.name,
            workload_ip: None,
            status: SessionStatus::Creating,
            idle_timeout: req.idle_timeout,
            screen: req.screen,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        };

        if let Err(e) = self.store.create_session(&session).await {
            error!(
                session_id = %session.id,
                workload = %session.workload_name,
                error = %e,
                "Failed to persist session, rolling back workload"
            );
            teardown_workload(self.runner.as_ref(), &session.id, &session.workload_name).await;
            return Err(e.into());
        }
        // The row now counts toward the global limit on its own
        drop(permit);

        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            app_id = %session.app_id,
            workload = %session.workload_name,
            "Session created"
        );
        self.recorder.record(
            SessionEvent::new(&session, SessionEventKind::Created)
                .with_metadata("workload", session.workload_name.as_str()),
        );

        self.spawn_readiness(session.clone());
        Ok(session)
    }

    /// Stop a running session. It can be restarted later.
    pub async fn stop_session(&self, id: &str) -> Result<Session> {
        self.end_session(id, SessionStatus::Stopped, REASON_STOP, SessionEventKind::Stopped)
            .await
    }

    /// Terminate a session on request.
    pub async fn terminate_session(&self, id: &str) -> Result<Session> {
        self.end_session(
            id,
            SessionStatus::Stopped,
            REASON_TERMINATE,
            SessionEventKind::Terminated,
        )
        .await
    }

    /// Expire an idle session.
    pub async fn expire_session(&self, id: &str) -> Result<Session> {
        self.end_session(id, SessionStatus::Expired, REASON_EXPIRE, SessionEventKind::Expired)
            .await
    }

    /// Tear down the workload and move the session to `to`.
    ///
    /// Terminal sessions, sessions already in `to`, and lost races against
    /// another writer all return the current session without error.
    async fn end_session(
        &self,
        id: &str,
        to: SessionStatus,
        reason: &str,
        kind: SessionEventKind,
    ) -> Result<Session> {
        let session = self.get_session(id).await?;

        if is_terminal_state(session.status) || session.status == to {
            debug!(
                session_id = %id,
                status = %session.status,
                requested = %to,
                "Session already ended, nothing to do"
            );
            return Ok(session);
        }

        validate_and_log_transition(&session.id, session.status, to, reason)?;

        teardown_workload(self.runner.as_ref(), &session.id, &session.workload_name).await;

        if !self
            .store
            .update_session_status(&session.id, session.status, to)
            .await?
        {
            let current = self.get_session(id).await?;
            debug!(
                session_id = %id,
                expected = %session.status,
                actual = %current.status,
                "Session changed concurrently, leaving it as is"
            );
            return Ok(current);
        }

        self.recorder.record(
            SessionEvent::new(&session, kind)
                .with_reason(reason)
                .with_metadata("workload", session.workload_name.as_str()),
        );
        self.notify_capacity();

        self.get_session(id).await
    }

    /// Restart a stopped session with a fresh workload, keeping its ID.
    ///
    /// Quotas are checked again since the session takes a slot once more.
    pub async fn restart_session(&self, id: &str) -> Result<Session> {
        let session = self.get_session(id).await?;
        validate_and_log_transition(
            &session.id,
            session.status,
            SessionStatus::Creating,
            REASON_RESTART,
        )?;

        let app = self.load_application(&session.app_id).await?;
        let image = self.runnable_image(&app)?;

        let permit = self.admit(&session.user_id, session.tenant_id.as_deref()).await?;

        let config = self.build_workload_config(
            &session.id,
            &session.user_id,
            &app,
            image,
            session.screen,
        );
        let workload = self.provision(&config, &app).await?;

        let applied = match self
            .store
            .update_session_workload(&session.id, &workload.name)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(
                    session_id = %session.id,
                    workload = %workload.name,
                    error = %e,
                    "Failed to persist restarted session, rolling back workload"
                );
                teardown_workload(self.runner.as_ref(), &session.id, &workload.name).await;
                return Err(e.into());
            }
        };
        drop(permit);

        if !applied {
            warn!(
                session_id = %session.id,
                workload = %workload.name,
                "Session was no longer stopped, discarding new workload"
            );
            teardown_workload(self.runner.as_ref(), &session.id, &workload.name).await;
            return self.get_session(id).await;
        }

        let restarted = self.get_session(id).await?;
        info!(
            session_id = %restarted.id,
            workload = %restarted.workload_name,
            "Session restarted"
        );
        self.recorder.record(
            SessionEvent::new(&restarted, SessionEventKind::Restarted)
                .with_metadata("workload", restarted.workload_name.as_str()),
        );

        self.spawn_readiness(restarted.clone());
        Ok(restarted)
    }

    /// Expire every running session idle for longer than the session timeout.
    ///
    /// Each goes through [`expire_session`](Self::expire_session). Returns the
    /// number of sessions expired by this call.
    pub async fn expire_stale_sessions(&self) -> Result<usize> {
        let idle_since = cutoff_before(Utc::now(), self.config.session_timeout);
        let stale = self.store.get_stale_sessions(idle_since).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut expired = 0;
        for session in stale {
            match self.expire_session(&session.id).await {
                Ok(s) if s.status == SessionStatus::Expired => expired += 1,
                Ok(_) => {}
                Err(e) => warn!(
                    session_id = %session.id,
                    error = %e,
                    "Failed to expire idle session"
                ),
            }
        }

        info!(expired, "Expired idle sessions");
        Ok(expired)
    }
}
