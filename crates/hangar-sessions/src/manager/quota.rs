// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quota checks and admission.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::SessionManager;
use crate::error::{Error, QuotaExceededError, QuotaScope, Result};
use crate::queue::SessionQueue;

/// Snapshot of a user's quota usage, computed fresh from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// User the snapshot is for.
    pub user_id: String,
    /// User's active sessions.
    pub user_active: u64,
    /// Per-user limit (0 = unlimited).
    pub user_limit: u32,
    /// Tenant the snapshot is for.
    pub tenant_id: Option<String>,
    /// Tenant's active sessions, when a tenant was given.
    pub tenant_active: Option<u64>,
    /// Per-tenant limit (0 = unlimited).
    pub tenant_limit: u32,
    /// Active sessions across all replicas.
    pub global_active: u64,
    /// Global limit (0 = unlimited).
    pub global_limit: u32,
    /// Whether a new session would be admitted without queueing.
    pub can_create: bool,
}

fn at_limit(active: u64, limit: u32) -> bool {
    limit > 0 && active >= u64::from(limit)
}

impl SessionManager {
    /// Current quota usage for a user (and optionally their tenant).
    pub async fn get_quota_status(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<QuotaStatus> {
        let user_active = self.store.count_active_sessions_by_user(user_id).await?;
        let tenant_active = match tenant_id {
            Some(tenant) => Some(self.store.count_active_sessions_by_tenant(tenant).await?),
            None => None,
        };
        let global_active = self.store.count_active_sessions().await?;

        let can_create = !at_limit(user_active, self.config.max_sessions_per_user)
            && !tenant_active
                .is_some_and(|active| at_limit(active, self.config.max_sessions_per_tenant))
            && !at_limit(
                global_active + self.admissions.pending(),
                self.config.max_global_sessions,
            );

        Ok(QuotaStatus {
            user_id: user_id.to_string(),
            user_active,
            user_limit: self.config.max_sessions_per_user,
            tenant_id: tenant_id.map(str::to_string),
            tenant_active,
            tenant_limit: self.config.max_sessions_per_tenant,
            global_active,
            global_limit: self.config.max_global_sessions,
            can_create,
        })
    }

    async fn check_scoped_quotas(&self, user_id: &str, tenant_id: Option<&str>) -> Result<()> {
        let limit = self.config.max_sessions_per_user;
        if limit > 0 {
            let active = self.store.count_active_sessions_by_user(user_id).await?;
            if at_limit(active, limit) {
                return Err(QuotaExceededError {
                    scope: QuotaScope::User,
                    reason: format!(
                        "user {} has {} active sessions (limit {})",
                        user_id, active, limit
                    ),
                }
                .into());
            }
        }

        let limit = self.config.max_sessions_per_tenant;
        if let Some(tenant) = tenant_id
            && limit > 0
        {
            let active = self.store.count_active_sessions_by_tenant(tenant).await?;
            if at_limit(active, limit) {
                return Err(QuotaExceededError {
                    scope: QuotaScope::Tenant,
                    reason: format!(
                        "tenant {} has {} active sessions (limit {})",
                        tenant, active, limit
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Reserve a global slot for this replica, or fail with a global quota error.
    ///
    /// Checks and reservations are serialized so two local callers never see
    /// the same free slot.
    async fn reserve_global_slot(&self) -> Result<AdmissionPermit> {
        let _gate = self.admissions.gate.lock().await;

        let limit = self.config.max_global_sessions;
        if limit > 0 {
            let persisted = self.store.count_active_sessions().await?;
            let pending = self.admissions.pending();
            if at_limit(persisted + pending, limit) {
                return Err(QuotaExceededError {
                    scope: QuotaScope::Global,
                    reason: format!(
                        "global session limit reached ({} active, {} starting, limit {})",
                        persisted, pending, limit
                    ),
                }
                .into());
            }
        }

        Ok(AdmissionPermit::reserve(self.admissions.clone(), self.queue.clone()))
    }

    /// Decide whether a new session may start now.
    ///
    /// A global-limit violation waits in the queue when one is configured.
    /// Once released, the per-user and per-tenant quotas are checked again:
    /// the caller may have started other sessions while it waited. A released
    /// caller that finds the slot taken goes back to the head of the queue.
    ///
    /// The returned permit must be held until the session row is written.
    pub(crate) async fn admit(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<AdmissionPermit> {
        self.check_scoped_quotas(user_id, tenant_id).await?;

        let mut queued = false;
        loop {
            let err = match self.reserve_global_slot().await {
                Ok(permit) => return Ok(permit),
                Err(err) => err,
            };

            let global_only =
                matches!(&err, Error::QuotaExceeded(e) if e.scope == QuotaScope::Global);
            let queue = match &self.queue {
                Some(queue) if global_only => queue,
                _ => return Err(err),
            };

            if queued {
                debug!(user_id = %user_id, "Released slot was taken, returning to queue head");
                queue.requeue().await?;
            } else {
                info!(
                    user_id = %user_id,
                    queue_len = queue.len(),
                    "Global session limit reached, queueing request"
                );
                queue.enqueue().await?;
                queued = true;
            }
            debug!(user_id = %user_id, "Released from session queue");

            self.check_scoped_quotas(user_id, tenant_id).await?;
        }
    }
}

/// Global slots reserved on this replica whose sessions are not persisted yet.
#[derive(Default)]
pub(crate) struct Admissions {
    pending: AtomicU64,
    gate: Mutex<()>,
}

impl Admissions {
    /// Reserved slots not yet visible in the store.
    pub(crate) fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }
}

/// A reserved global slot. Dropping it releases the reservation and wakes
/// the queue.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub(crate) struct AdmissionPermit {
    admissions: Arc<Admissions>,
    queue: Option<Arc<SessionQueue>>,
}

impl AdmissionPermit {
    fn reserve(admissions: Arc<Admissions>, queue: Option<Arc<SessionQueue>>) -> Self {
        admissions.pending.fetch_add(1, Ordering::SeqCst);
        Self { admissions, queue }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.admissions.pending.fetch_sub(1, Ordering::SeqCst);
        if let Some(queue) = &self.queue {
            queue.notify_capacity();
        }
    }
}
