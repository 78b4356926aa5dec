// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed session store.
//!
//! Meant for single-node embedding and tests. Timestamps are always bound
//! from Rust so they compare consistently as RFC 3339 text.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{
    ApplicationColumns, ApplicationRow, Result, SessionRow, SessionStore, idle_timeout_secs,
    into_sessions, screen_column,
};
use crate::migrations;
use crate::models::{Application, Session, SessionStatus};

const SESSION_COLUMNS: &str = "id, user_id, tenant_id, app_id, workload_name, workload_ip, status, \
     idle_timeout_secs, screen, created_at, updated_at, last_activity_at";

/// SQLite-backed session store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        migrations::SQLITE.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Open a private in-memory database and run migrations.
    ///
    /// Limited to one connection, since each SQLite memory connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        migrations::SQLITE.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_sessions(&self, sql: &str, bind: Option<&str>) -> Result<Vec<Session>> {
        let mut query = sqlx::query_as::<_, SessionRow>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        into_sessions(rows)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_application(&self, app: &Application) -> Result<()> {
        let cols = ApplicationColumns::encode(app)?;

        sqlx::query(
            r#"
            INSERT INTO applications
                (id, name, tenant_id, launch_type, os_type, image, port,
                 command, args, env, resource_limits, egress_policy, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&app.id)
        .bind(&app.name)
        .bind(&app.tenant_id)
        .bind(app.launch_type.as_str())
        .bind(app.os_type.as_str())
        .bind(&app.image)
        .bind(i32::from(app.port))
        .bind(&cols.command)
        .bind(&cols.args)
        .bind(&cols.env)
        .bind(&cols.resource_limits)
        .bind(&cols.egress_policy)
        .bind(app.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, name, tenant_id, launch_type, os_type, image, port,
                   command, args, env, resource_limits, egress_policy, created_at
            FROM applications
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Application::try_from).transpose()
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, name, tenant_id, launch_type, os_type, image, port,
                   command, args, env, resource_limits, egress_policy, created_at
            FROM applications
            ORDER BY name, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Application::try_from).collect()
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, user_id, tenant_id, app_id, workload_name, workload_ip, status,
                 idle_timeout_secs, screen, created_at, updated_at, last_activity_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.tenant_id)
        .bind(&session.app_id)
        .bind(&session.workload_name)
        .bind(&session.workload_ip)
        .bind(session.status.as_str())
        .bind(idle_timeout_secs(session))
        .bind(screen_column(session)?)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.last_activity_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Session::try_from).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id");
        self.fetch_sessions(&sql, None).await
    }

    async fn list_sessions_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ? ORDER BY created_at DESC, id"
        );
        self.fetch_sessions(&sql, Some(user_id)).await
    }

    async fn list_live_sessions(&self) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE status IN ('creating', 'running') ORDER BY created_at, id"
        );
        self.fetch_sessions(&sql, None).await
    }

    async fn update_session_status(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status = ?4
            "#,
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_session_ready(&self, id: &str, workload_ip: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'running', workload_ip = ?1, updated_at = ?2, last_activity_at = ?2
            WHERE id = ?3 AND status = 'creating'
            "#,
        )
        .bind(workload_ip)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_session_workload(&self, id: &str, workload_name: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'creating', workload_name = ?1, workload_ip = NULL,
                updated_at = ?2, last_activity_at = ?2
            WHERE id = ?3 AND status = 'stopped'
            "#,
        )
        .bind(workload_name)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET last_activity_at = ?1
            WHERE id = ?2 AND status IN ('creating', 'running')
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_active_sessions(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE status IN ('creating', 'running')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn count_active_sessions_by_user(&self, user_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ? AND status IN ('creating', 'running')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn count_active_sessions_by_tenant(&self, tenant_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE tenant_id = ? AND status IN ('creating', 'running')",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn get_stale_sessions(&self, idle_since: DateTime<Utc>) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE status = 'running' AND last_activity_at < ? ORDER BY last_activity_at, id"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(idle_since)
            .fetch_all(&self.pool)
            .await?;

        into_sessions(rows)
    }

    async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
