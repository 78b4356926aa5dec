// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for session state.
//!
//! The store is the single source of truth shared by every replica: the
//! manager keeps no session cache and re-reads on every call. Status writes
//! are compare-and-set on the expected current status, so two replicas
//! racing on the same session cannot both apply a transition.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Application, EgressPolicy, LaunchType, OsType, ResourceLimits, ScreenGeometry, Session,
    SessionStatus,
};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row does not map onto the domain model.
    #[error("Invalid {entity} record {id}: {reason}")]
    InvalidRecord {
        /// Table / entity name.
        entity: &'static str,
        /// Row identifier.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Filesystem setup for an embedded database failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Session row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Session identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning tenant.
    pub tenant_id: Option<String>,
    /// Application identifier.
    pub app_id: String,
    /// Current workload name.
    pub workload_name: String,
    /// Workload address.
    pub workload_ip: Option<String>,
    /// Status string.
    pub status: String,
    /// Idle timeout hint in seconds.
    pub idle_timeout_secs: Option<i64>,
    /// JSON object.
    pub screen: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Last activity time.
    pub last_activity_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self> {
        let status = row
            .status
            .parse::<SessionStatus>()
            .map_err(|reason| StoreError::InvalidRecord {
                entity: "session",
                id: row.id.clone(),
                reason,
            })?;
        let screen: Option<ScreenGeometry> = row
            .screen
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            app_id: row.app_id,
            workload_name: row.workload_name,
            workload_ip: row.workload_ip,
            status,
            idle_timeout: row
                .idle_timeout_secs
                .and_then(|secs| u64::try_from(secs).ok())
                .map(Duration::from_secs),
            screen,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_activity_at: row.last_activity_at,
        })
    }
}

/// Application row as stored. List and map columns hold JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApplicationRow {
    /// Application identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Option<String>,
    /// Launch type string.
    pub launch_type: String,
    /// OS type string.
    pub os_type: String,
    /// Image reference.
    pub image: Option<String>,
    /// Workload port.
    pub port: i32,
    /// JSON array.
    pub command: String,
    /// JSON array.
    pub args: String,
    /// JSON object.
    pub env: String,
    /// JSON object.
    pub resource_limits: Option<String>,
    /// JSON object.
    pub egress_policy: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = StoreError;

    fn try_from(row: ApplicationRow) -> Result<Self> {
        let invalid = |reason: String| StoreError::InvalidRecord {
            entity: "application",
            id: row.id.clone(),
            reason,
        };

        let launch_type: LaunchType = row.launch_type.parse().map_err(invalid)?;
        let os_type: OsType = row.os_type.parse().map_err(invalid)?;
        let port = u16::try_from(row.port)
            .map_err(|_| invalid(format!("port {} out of range", row.port)))?;

        let command: Vec<String> = serde_json::from_str(&row.command)?;
        let args: Vec<String> = serde_json::from_str(&row.args)?;
        let env: BTreeMap<String, String> = serde_json::from_str(&row.env)?;
        let resource_limits: Option<ResourceLimits> = row
            .resource_limits
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let egress_policy: Option<EgressPolicy> = row
            .egress_policy
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Application {
            id: row.id,
            name: row.name,
            tenant_id: row.tenant_id,
            launch_type,
            os_type,
            image: row.image,
            port,
            command,
            args,
            env,
            resource_limits,
            egress_policy,
            created_at: row.created_at,
        })
    }
}

/// JSON-encoded columns of an application, ready to bind.
pub(crate) struct ApplicationColumns {
    pub command: String,
    pub args: String,
    pub env: String,
    pub resource_limits: Option<String>,
    pub egress_policy: Option<String>,
}

impl ApplicationColumns {
    pub(crate) fn encode(app: &Application) -> Result<Self> {
        Ok(Self {
            command: serde_json::to_string(&app.command)?,
            args: serde_json::to_string(&app.args)?,
            env: serde_json::to_string(&app.env)?,
            resource_limits: app
                .resource_limits
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            egress_policy: app
                .egress_policy
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }
}

pub(crate) fn idle_timeout_secs(session: &Session) -> Option<i64> {
    session
        .idle_timeout
        .and_then(|d| i64::try_from(d.as_secs()).ok())
}

pub(crate) fn screen_column(session: &Session) -> Result<Option<String>> {
    Ok(session.screen.as_ref().map(serde_json::to_string).transpose()?)
}

pub(crate) fn into_sessions(rows: Vec<SessionRow>) -> Result<Vec<Session>> {
    rows.into_iter().map(Session::try_from).collect()
}

/// Persistence collaborator for sessions and applications.
///
/// Mutating session methods return `true` when the row changed and `false`
/// when the expected current state did not match (another writer won).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register an application template.
    async fn create_application(&self, app: &Application) -> Result<()>;

    /// Fetch an application by ID.
    async fn get_application(&self, id: &str) -> Result<Option<Application>>;

    /// List all applications ordered by name.
    async fn list_applications(&self) -> Result<Vec<Application>>;

    /// Insert a new session row.
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Fetch a session by ID.
    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// List every session, newest first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// List a user's sessions, newest first.
    async fn list_sessions_by_user(&self, user_id: &str) -> Result<Vec<Session>>;

    /// List sessions in `creating` or `running`.
    async fn list_live_sessions(&self) -> Result<Vec<Session>>;

    /// Move a session from `from` to `to`.
    async fn update_session_status(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool>;

    /// Set the workload address and move `creating` to `running` in one write.
    async fn set_session_ready(&self, id: &str, workload_ip: &str) -> Result<bool>;

    /// Attach a fresh workload to a `stopped` session and move it to `creating`.
    async fn update_session_workload(&self, id: &str, workload_name: &str) -> Result<bool>;

    /// Record user activity on a live session.
    async fn touch_session(&self, id: &str) -> Result<bool>;

    /// Count sessions in `creating` or `running`.
    async fn count_active_sessions(&self) -> Result<u64>;

    /// Count a user's sessions in `creating` or `running`.
    async fn count_active_sessions_by_user(&self, user_id: &str) -> Result<u64>;

    /// Count a tenant's sessions in `creating` or `running`.
    async fn count_active_sessions_by_tenant(&self, tenant_id: &str) -> Result<u64>;

    /// Running sessions with no activity since `idle_since`.
    async fn get_stale_sessions(&self, idle_since: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Check database connectivity.
    async fn health_check(&self) -> Result<bool>;
}
