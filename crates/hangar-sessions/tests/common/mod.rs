// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for hangar-sessions integration tests.
//!
//! Provides TestContext wiring an in-memory SQLite store, a MockRunner and a
//! channel recorder into a SessionManager, plus FaultyStore for persistence
//! failures.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hangar_sessions::events::{ChannelRecorder, SessionEvent, SessionEventKind};
use hangar_sessions::models::{
    Application, EgressMode, EgressPolicy, LaunchType, OsType, Session, SessionStatus,
};
use hangar_sessions::persistence::{self, StoreError};
use hangar_sessions::queue::QueueConfig;
use hangar_sessions::runner::{MockRunner, Runner};
use hangar_sessions::{ManagerConfig, SessionManager, SessionStore, SqliteStore};

pub const DESKTOP_APP: &str = "desktop";
pub const TENANT_APP: &str = "tenant-desktop";
pub const LOCKED_APP: &str = "locked-desktop";
pub const LINK_APP: &str = "wiki-link";
pub const TENANT: &str = "acme";

/// Test context holding the manager and direct handles on its collaborators.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub runner: Arc<MockRunner>,
    pub manager: Arc<SessionManager>,
    pub events: mpsc::Receiver<SessionEvent>,
    queue_handle: Option<JoinHandle<()>>,
}

impl TestContext {
    /// Manager without a queue over a fast-ready mock runner.
    pub async fn new(config: ManagerConfig) -> Self {
        Self::build(config, MockRunner::new(), None, plain_store).await
    }

    /// Manager without a queue over the given runner.
    pub async fn with_runner(config: ManagerConfig, runner: MockRunner) -> Self {
        Self::build(config, runner, None, plain_store).await
    }

    /// Manager with an admission queue whose loop is running.
    pub async fn with_queue(config: ManagerConfig, queue: QueueConfig) -> Self {
        Self::build(config, MockRunner::new(), Some(queue), plain_store).await
    }

    /// Manager with an admission queue over the given runner.
    pub async fn with_queue_and_runner(
        config: ManagerConfig,
        queue: QueueConfig,
        runner: MockRunner,
    ) -> Self {
        Self::build(config, runner, Some(queue), plain_store).await
    }

    /// Manager whose store is wrapped in a [`FaultyStore`].
    pub async fn with_faulty_store(
        config: ManagerConfig,
        runner: MockRunner,
    ) -> (Self, Arc<FaultyStore>) {
        let mut faulty = None;
        let ctx = Self::build(config, runner, None, |store| {
            let wrapped = Arc::new(FaultyStore::new(store));
            faulty = Some(wrapped.clone());
            wrapped as Arc<dyn SessionStore>
        })
        .await;
        (ctx, faulty.expect("store wrapper was not installed"))
    }

    async fn build(
        config: ManagerConfig,
        runner: MockRunner,
        queue: Option<QueueConfig>,
        wrap_store: impl FnOnce(Arc<SqliteStore>) -> Arc<dyn SessionStore>,
    ) -> Self {
        let store = Arc::new(
            SqliteStore::in_memory()
                .await
                .expect("Failed to create in-memory store"),
        );
        seed_applications(store.as_ref()).await;

        let runner = Arc::new(runner);
        let (recorder, events) = ChannelRecorder::new(256);

        let mut manager = SessionManager::new(
            wrap_store(store.clone()),
            runner.clone() as Arc<dyn Runner>,
            config,
        )
        .with_recorder(Arc::new(recorder));
        if let Some(queue) = queue {
            manager = manager.with_queue(queue);
        }
        let manager = Arc::new(manager);

        let queue_handle = manager.queue().cloned().map(|queue| {
            tokio::spawn(async move {
                queue.run().await;
            })
        });

        Self {
            store,
            runner,
            manager,
            events,
            queue_handle,
        }
    }

    /// Kinds of the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    /// Wait for the next recorded event.
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("Timed out waiting for session event")
            .expect("Event channel closed")
    }

    /// Wait for the next `n` events and return their kinds.
    pub async fn next_kinds(&mut self, n: usize) -> Vec<SessionEventKind> {
        let mut kinds = Vec::with_capacity(n);
        for _ in 0..n {
            kinds.push(self.next_event().await.kind);
        }
        kinds
    }

    /// Create a session and wait until its readiness task has finished.
    pub async fn create_running(&self, user_id: &str, app_id: &str) -> Session {
        let session = self
            .manager
            .create_session(hangar_sessions::CreateSessionRequest::new(user_id, app_id))
            .await
            .expect("Failed to create session");
        wait_for_status(&self.manager, &session.id, SessionStatus::Running).await
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(queue) = self.manager.queue() {
            queue.shutdown();
        }
        if let Some(handle) = self.queue_handle.take() {
            handle.abort();
        }
    }
}

fn plain_store(store: Arc<SqliteStore>) -> Arc<dyn SessionStore> {
    store
}

/// Manager config with no limits except those the test sets.
pub fn unlimited() -> ManagerConfig {
    ManagerConfig {
        max_sessions_per_user: 0,
        max_sessions_per_tenant: 0,
        max_global_sessions: 0,
        ..ManagerConfig::default()
    }
}

/// Queue config with short test timings.
pub fn fast_queue(max_size: usize, timeout: Duration) -> QueueConfig {
    QueueConfig {
        max_size,
        timeout,
        poll_interval: Duration::from_millis(50),
    }
}

/// A container application.
pub fn container_app(id: &str, tenant_id: Option<&str>) -> Application {
    Application {
        id: id.to_string(),
        name: format!("App {}", id),
        tenant_id: tenant_id.map(str::to_string),
        launch_type: LaunchType::Container,
        os_type: OsType::Linux,
        image: Some("registry.local/desktop:1".to_string()),
        port: 6901,
        command: vec![],
        args: vec![],
        env: BTreeMap::new(),
        resource_limits: None,
        egress_policy: None,
        created_at: Utc::now(),
    }
}

/// Register the standard test applications.
pub async fn seed_applications(store: &SqliteStore) {
    let locked = Application {
        egress_policy: Some(EgressPolicy {
            mode: EgressMode::DenyAll,
            rules: vec![],
        }),
        ..container_app(LOCKED_APP, None)
    };
    let link = Application {
        launch_type: LaunchType::Url,
        image: None,
        ..container_app(LINK_APP, None)
    };

    for app in [
        container_app(DESKTOP_APP, None),
        container_app(TENANT_APP, Some(TENANT)),
        locked,
        link,
    ] {
        store
            .create_application(&app)
            .await
            .expect("Failed to seed application");
    }
}

/// Poll until the session reaches `status`, panicking after five seconds.
pub async fn wait_for_status(
    manager: &SessionManager,
    session_id: &str,
    status: SessionStatus,
) -> Session {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let session = manager
            .get_session(session_id)
            .await
            .expect("Failed to fetch session");
        if session.status == status {
            return session;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "session {} stuck in {} waiting for {}",
                session_id, session.status, status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the runner no longer has the workload, panicking after five seconds.
pub async fn wait_for_workload_gone(runner: &MockRunner, workload_name: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while runner.has_workload(workload_name).await {
        if tokio::time::Instant::now() >= deadline {
            panic!("workload {} was never deleted", workload_name);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// SQLite store whose session writes can be switched to fail.
pub struct FaultyStore {
    inner: Arc<SqliteStore>,
    fail_create_session: AtomicBool,
    fail_update_workload: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            fail_create_session: AtomicBool::new(false),
            fail_update_workload: AtomicBool::new(false),
        }
    }

    /// Make `create_session` fail from now on.
    pub fn fail_create_session(&self) {
        self.fail_create_session.store(true, Ordering::SeqCst);
    }

    /// Make `update_session_workload` fail from now on.
    pub fn fail_update_workload(&self) {
        self.fail_update_workload.store(true, Ordering::SeqCst);
    }
}

fn injected_failure() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn create_application(&self, app: &Application) -> persistence::Result<()> {
        self.inner.create_application(app).await
    }

    async fn get_application(&self, id: &str) -> persistence::Result<Option<Application>> {
        self.inner.get_application(id).await
    }

    async fn list_applications(&self) -> persistence::Result<Vec<Application>> {
        self.inner.list_applications().await
    }

    async fn create_session(&self, session: &Session) -> persistence::Result<()> {
        if self.fail_create_session.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        self.inner.create_session(session).await
    }

    async fn get_session(&self, id: &str) -> persistence::Result<Option<Session>> {
        self.inner.get_session(id).await
    }

    async fn list_sessions(&self) -> persistence::Result<Vec<Session>> {
        self.inner.list_sessions().await
    }

    async fn list_sessions_by_user(&self, user_id: &str) -> persistence::Result<Vec<Session>> {
        self.inner.list_sessions_by_user(user_id).await
    }

    async fn list_live_sessions(&self) -> persistence::Result<Vec<Session>> {
        self.inner.list_live_sessions().await
    }

    async fn update_session_status(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> persistence::Result<bool> {
        self.inner.update_session_status(id, from, to).await
    }

    async fn set_session_ready(&self, id: &str, workload_ip: &str) -> persistence::Result<bool> {
        self.inner.set_session_ready(id, workload_ip).await
    }

    async fn update_session_workload(
        &self,
        id: &str,
        workload_name: &str,
    ) -> persistence::Result<bool> {
        if self.fail_update_workload.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        self.inner.update_session_workload(id, workload_name).await
    }

    async fn touch_session(&self, id: &str) -> persistence::Result<bool> {
        self.inner.touch_session(id).await
    }

    async fn count_active_sessions(&self) -> persistence::Result<u64> {
        self.inner.count_active_sessions().await
    }

    async fn count_active_sessions_by_user(&self, user_id: &str) -> persistence::Result<u64> {
        self.inner.count_active_sessions_by_user(user_id).await
    }

    async fn count_active_sessions_by_tenant(&self, tenant_id: &str) -> persistence::Result<u64> {
        self.inner.count_active_sessions_by_tenant(tenant_id).await
    }

    async fn get_stale_sessions(
        &self,
        idle_since: DateTime<Utc>,
    ) -> persistence::Result<Vec<Session>> {
        self.inner.get_stale_sessions(idle_since).await
    }

    async fn health_check(&self) -> persistence::Result<bool> {
        self.inner.health_check().await
    }
}
