// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed session store, shared by every server replica.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use super::{
    ApplicationColumns, ApplicationRow, Result, SessionRow, SessionStore, idle_timeout_secs,
    into_sessions, screen_column,
};
use crate::migrations;
use crate::models::{Application, Session, SessionStatus};

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        migrations::POSTGRES.run(&pool).await?;
        info!(max_connections, "Connected to PostgreSQL session store");

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn create_application(&self, app: &Application) -> Result<()> {
        let cols = ApplicationColumns::encode(app)?;

        sqlx::query(
            r#"
            INSERT INTO applications
                (id, name, tenant_id, launch_type, os_type, image, port,
                 command, args, env, resource_limits, egress_policy, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
            WHERE id = $1
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
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
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, tenant_id, app_id, workload_name, workload_ip, status,
                   idle_timeout_secs, screen, created_at, updated_at, last_activity_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, tenant_id, app_id, workload_name, workload_ip, status,
                   idle_timeout_secs, screen, created_at, updated_at, last_activity_at
            FROM sessions
            ORDER BY created_at DESC, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        into_sessions(rows)
    }

    async fn list_sessions_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, tenant_id, app_id, workload_name, workload_ip, status,
                   idle_timeout_secs, screen, created_at, updated_at, last_activity_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        into_sessions(rows)
    }

    async fn list_live_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, tenant_id, app_id, workload_name, workload_ip, status,
                   idle_timeout_secs, screen, created_at, updated_at, last_activity_at
            FROM sessions
            WHERE status IN ('creating', 'running')
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        into_sessions(rows)
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
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_session_ready(&self, id: &str, workload_ip: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'running', workload_ip = $1, updated_at = NOW(), last_activity_at = NOW()
            WHERE id = $2 AND status = 'creating'
            "#,
        )
        .bind(workload_ip)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_session_workload(&self, id: &str, workload_name: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'creating', workload_name = $1, workload_ip = NULL,
                updated_at = NOW(), last_activity_at = NOW()
            WHERE id = $2 AND status = 'stopped'
            "#,
        )
        .bind(workload_name)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET last_activity_at = NOW()
            WHERE id = $1 AND status IN ('creating', 'running')
            "#,
        )
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
            "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND status IN ('creating', 'running')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn count_active_sessions_by_tenant(&self, tenant_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE tenant_id = $1 AND status IN ('creating', 'running')",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn get_stale_sessions(&self, idle_since: DateTime<Utc>) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, tenant_id, app_id, workload_name, workload_ip, status,
                   idle_timeout_secs, screen, created_at, updated_at, last_activity_at
            FROM sessions
            WHERE status = 'running' AND last_activity_at < $1
            ORDER BY last_activity_at, id
            "#,
        )
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
