// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL session store.
//!
//! Skipped unless TEST_HANGAR_DATABASE_URL points at a disposable database.

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use hangar_sessions::models::{CreateSessionRequest, Session, SessionStatus};
use hangar_sessions::runner::{MockRunner, Runner};
use hangar_sessions::{PostgresStore, SessionManager, SessionStore};
use uuid::Uuid;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_HANGAR_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_HANGAR_DATABASE_URL not set");
            return;
        }
    };
}

/// Connect and migrate, or None if the database is unavailable.
async fn get_test_store() -> Option<PostgresStore> {
    let database_url = std::env::var("TEST_HANGAR_DATABASE_URL").ok()?;
    PostgresStore::connect(&database_url, 5).await.ok()
}

/// Register an application with a unique ID so runs do not collide.
async fn create_test_app(store: &PostgresStore, tenant_id: Option<&str>) -> String {
    let app_id = format!("test-app-{}", Uuid::new_v4());
    store
        .create_application(&container_app(&app_id, tenant_id))
        .await
        .expect("Failed to create test application");
    app_id
}

fn test_session(user_id: &str, app_id: &str, status: SessionStatus) -> Session {
    let now = Utc::now();
    Session {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        tenant_id: None,
        app_id: app_id.to_string(),
        workload_name: format!("w-{}", Uuid::new_v4()),
        workload_ip: None,
        status,
        idle_timeout: None,
        screen: None,
        created_at: now,
        updated_at: now,
        last_activity_at: now,
    }
}

#[tokio::test]
async fn test_application_round_trip() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");

    let app_id = create_test_app(&store, Some("acme")).await;
    let app = store.get_application(&app_id).await.unwrap().unwrap();
    assert_eq!(app.tenant_id.as_deref(), Some("acme"));
    assert_eq!(app.image.as_deref(), Some("registry.local/desktop:1"));

    assert!(store.get_application("no-such-app").await.unwrap().is_none());
    assert!(
        store
            .list_applications()
            .await
            .unwrap()
            .iter()
            .any(|a| a.id == app_id)
    );
}

#[tokio::test]
async fn test_status_writes_are_compare_and_set() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");
    let app_id = create_test_app(&store, None).await;

    let session = test_session("pg-cas-user", &app_id, SessionStatus::Creating);
    store.create_session(&session).await.unwrap();

    assert!(store.set_session_ready(&session.id, "10.1.0.5").await.unwrap());
    // Already running: the second writer loses
    assert!(!store.set_session_ready(&session.id, "10.1.0.6").await.unwrap());

    assert!(
        store
            .update_session_status(&session.id, SessionStatus::Running, SessionStatus::Stopped)
            .await
            .unwrap()
    );
    assert!(
        !store
            .update_session_status(&session.id, SessionStatus::Running, SessionStatus::Expired)
            .await
            .unwrap()
    );

    assert!(store.update_session_workload(&session.id, "w-next").await.unwrap());
    let restarted = store.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(restarted.status, SessionStatus::Creating);
    assert_eq!(restarted.workload_name, "w-next");
    assert!(restarted.workload_ip.is_none());
}

#[tokio::test]
async fn test_counts_and_stale_sessions() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect");
    let app_id = create_test_app(&store, None).await;
    let user = format!("pg-count-{}", Uuid::new_v4());

    for status in SessionStatus::ALL {
        store
            .create_session(&test_session(&user, &app_id, status))
            .await
            .unwrap();
    }
    assert_eq!(store.count_active_sessions_by_user(&user).await.unwrap(), 2);

    let mut idle = test_session(&user, &app_id, SessionStatus::Running);
    idle.last_activity_at = Utc::now() - ChronoDuration::hours(3);
    store.create_session(&idle).await.unwrap();

    let stale = store
        .get_stale_sessions(Utc::now() - ChronoDuration::hours(2))
        .await
        .unwrap();
    assert!(stale.iter().any(|s| s.id == idle.id));
    assert!(stale.iter().all(|s| s.status == SessionStatus::Running));

    assert!(store.touch_session(&idle.id).await.unwrap());
    let stale = store
        .get_stale_sessions(Utc::now() - ChronoDuration::hours(2))
        .await
        .unwrap();
    assert!(stale.iter().all(|s| s.id != idle.id));
}

#[tokio::test]
async fn test_manager_lifecycle_on_postgres() {
    skip_if_no_db!();
    let store = Arc::new(get_test_store().await.expect("Failed to connect"));
    let app_id = create_test_app(&store, None).await;
    let user = format!("pg-manager-{}", Uuid::new_v4());

    let manager = SessionManager::new(
        store.clone() as Arc<dyn SessionStore>,
        Arc::new(MockRunner::new()) as Arc<dyn Runner>,
        unlimited(),
    );

    let session = manager
        .create_session(CreateSessionRequest::new(&user, &app_id))
        .await
        .unwrap();
    let running = wait_for_status(&manager, &session.id, SessionStatus::Running).await;
    assert!(running.workload_ip.is_some());

    let stopped = manager.stop_session(&session.id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert_eq!(store.count_active_sessions_by_user(&user).await.unwrap(), 0);
}
