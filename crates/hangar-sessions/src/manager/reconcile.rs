// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation of recorded sessions against backend workloads.
//!
//! Repairs the drift that best-effort teardown and crashed replicas leave
//! behind:
//! - workloads no live session owns are deleted once past the grace period
//! - `running` sessions whose workload vanished are failed
//! - `creating` sessions whose readiness task died are failed after the
//!   readiness timeout

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::workload::teardown_workload;
use super::{SessionManager, cutoff_before};
use crate::error::Result;
use crate::events::{SessionEvent, SessionEventKind};
use crate::models::{Session, SessionStatus};
use crate::state_machine::validate_and_log_transition;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Workloads deleted because no live session owned them.
    pub orphans_deleted: usize,
    /// Running sessions failed because their workload disappeared.
    pub lost_sessions_failed: usize,
    /// Creating sessions failed because readiness never completed.
    pub stuck_sessions_failed: usize,
}

impl ReconcileReport {
    /// Whether the pass changed anything.
    pub fn is_empty(&self) -> bool {
        self.orphans_deleted == 0
            && self.lost_sessions_failed == 0
            && self.stuck_sessions_failed == 0
    }
}

impl SessionManager {
    /// Run one reconciliation pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        // Sessions before workloads: a session that goes live after this read
        // is not judged, and its fresh workload is within the orphan grace
        let live = self.store.list_live_sessions().await?;
        let workloads = self.runner.list_workloads().await?;
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        let owned: HashSet<&str> = live.iter().map(|s| s.workload_name.as_str()).collect();
        let existing: HashSet<&str> = workloads.iter().map(|w| w.name.as_str()).collect();

        let orphan_cutoff = cutoff_before(now, self.config.orphan_grace);
        for workload in &workloads {
            if owned.contains(workload.name.as_str()) {
                continue;
            }
            // Unknown age is treated as too young: it may be mid-creation
            let Some(created_at) = workload.created_at else {
                debug!(workload = %workload.name, "Skipping unowned workload with unknown age");
                continue;
            };
            if created_at >= orphan_cutoff {
                continue;
            }

            let session_id = workload.session_id.as_deref().unwrap_or("");
            info!(
                workload = %workload.name,
                session_id = %session_id,
                "Deleting orphaned workload"
            );
            teardown_workload(self.runner.as_ref(), session_id, &workload.name).await;
            report.orphans_deleted += 1;
        }

        let stuck_cutoff = cutoff_before(now, self.config.ready_timeout);
        for session in &live {
            match session.status {
                SessionStatus::Running if !existing.contains(session.workload_name.as_str()) => {
                    if self.fail_session(session, "workload lost").await {
                        report.lost_sessions_failed += 1;
                    }
                }
                SessionStatus::Creating if session.updated_at < stuck_cutoff => {
                    if self.fail_session(session, "readiness never completed").await {
                        report.stuck_sessions_failed += 1;
                    }
                }
                _ => {}
            }
        }

        if report.is_empty() {
            debug!(
                workloads = workloads.len(),
                live_sessions = live.len(),
                "Reconciliation found nothing to repair"
            );
        } else {
            info!(
                orphans_deleted = report.orphans_deleted,
                lost_sessions_failed = report.lost_sessions_failed,
                stuck_sessions_failed = report.stuck_sessions_failed,
                "Reconciliation completed"
            );
        }

        Ok(report)
    }

    /// Move a live session to `failed` and clean up after it.
    ///
    /// Returns whether this call applied the transition.
    async fn fail_session(&self, session: &Session, reason: &str) -> bool {
        if validate_and_log_transition(&session.id, session.status, SessionStatus::Failed, reason)
            .is_err()
        {
            return false;
        }

        let applied = match self
            .store
            .update_session_status(&session.id, session.status, SessionStatus::Failed)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(session_id = %session.id, error = %e, "Failed to mark session failed");
                return false;
            }
        };
        if !applied {
            debug!(session_id = %session.id, "Session changed concurrently, skipping");
            return false;
        }

        warn!(
            session_id = %session.id,
            workload = %session.workload_name,
            reason = %reason,
            "Session failed by reconciliation"
        );
        self.recorder.record(
            SessionEvent::new(session, SessionEventKind::Failed)
                .with_reason(reason)
                .with_metadata("workload", session.workload_name.as_str()),
        );
        teardown_workload(self.runner.as_ref(), &session.id, &session.workload_name).await;
        self.notify_capacity();
        true
    }
}
