// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for session lifecycle operations - create, readiness, stop, restart,
//! terminate and expire.

mod common;

use std::time::Duration;

use common::*;
use hangar_sessions::events::SessionEventKind;
use hangar_sessions::models::{CreateSessionRequest, EgressMode, ScreenGeometry, SessionStatus};
use hangar_sessions::runner::{MockRunner, RunnerError};
use hangar_sessions::{Error, ManagerConfig, QuotaScope};

#[tokio::test]
async fn test_create_session_becomes_running() {
    let mut ctx = TestContext::new(unlimited()).await;

    let created = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP))
        .await
        .unwrap();
    assert_eq!(created.status, SessionStatus::Creating);
    assert!(created.workload_ip.is_none());
    assert_eq!(created.app_id, DESKTOP_APP);
    assert!(ctx.runner.has_workload(&created.workload_name).await);

    let running = wait_for_status(&ctx.manager, &created.id, SessionStatus::Running).await;
    assert_eq!(running.workload_name, created.workload_name);
    assert!(running.workload_ip.as_deref().unwrap().starts_with("10.42."));

    let created_event = ctx.next_event().await;
    assert_eq!(created_event.kind, SessionEventKind::Created);
    assert_eq!(created_event.user_id, "alice");

    let ready_event = ctx.next_event().await;
    assert_eq!(ready_event.kind, SessionEventKind::Ready);
    assert_eq!(ready_event.metadata.get("ip"), running.workload_ip.as_ref());
}

#[tokio::test]
async fn test_create_copies_tenant_from_application() {
    let ctx = TestContext::new(unlimited()).await;

    let session = ctx.create_running("alice", TENANT_APP).await;
    assert_eq!(session.tenant_id.as_deref(), Some(TENANT));
}

#[tokio::test]
async fn test_create_rejects_invalid_requests() {
    let ctx = TestContext::new(unlimited()).await;

    let err = ctx
        .manager
        .create_session(CreateSessionRequest::new("  ", DESKTOP_APP))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    let err = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", "no-such-app"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // URL applications never get a workload
    let err = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", LINK_APP))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    assert!(ctx.manager.list_sessions().await.unwrap().is_empty());
    assert!(ctx.runner.workload_names().await.is_empty());
}

#[tokio::test]
async fn test_create_failure_persists_nothing() {
    let mut ctx = TestContext::with_runner(unlimited(), MockRunner::failing()).await;

    let err = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Runner(RunnerError::CreateFailed(_))));

    assert!(ctx.manager.list_sessions().await.unwrap().is_empty());
    assert!(ctx.drain_events().is_empty());
}

#[tokio::test]
async fn test_workload_crash_fails_session_and_deletes_workload() {
    let mut runner = MockRunner::new();
    runner.fail_ready = true;
    let mut ctx = TestContext::with_runner(unlimited(), runner).await;

    let created = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP))
        .await
        .unwrap();
    let failed = wait_for_status(&ctx.manager, &created.id, SessionStatus::Failed).await;
    assert!(failed.workload_ip.is_none());

    assert_eq!(ctx.next_event().await.kind, SessionEventKind::Created);
    let event = ctx.next_event().await;
    assert_eq!(event.kind, SessionEventKind::Failed);
    assert!(event.reason.unwrap().contains("Mock crash"));

    assert!(!ctx.runner.has_workload(&created.workload_name).await);
    assert_eq!(ctx.manager.active_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ready_timeout_fails_session() {
    let config = ManagerConfig {
        ready_timeout: Duration::from_millis(50),
        ..unlimited()
    };
    let ctx = TestContext::with_runner(config, MockRunner::never_ready()).await;

    let created = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP))
        .await
        .unwrap();
    wait_for_status(&ctx.manager, &created.id, SessionStatus::Failed).await;

    wait_for_workload_gone(&ctx.runner, &created.workload_name).await;
    assert_eq!(
        ctx.runner.deleted_workloads().await,
        vec![created.workload_name.clone()]
    );
}

#[tokio::test]
async fn test_missing_address_fails_session_and_deletes_workload() {
    let mut runner = MockRunner::new();
    runner.no_ip = true;
    let mut ctx = TestContext::with_runner(unlimited(), runner).await;

    let created = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP))
        .await
        .unwrap();
    let failed = wait_for_status(&ctx.manager, &created.id, SessionStatus::Failed).await;
    assert!(failed.workload_ip.is_none());

    assert_eq!(ctx.next_event().await.kind, SessionEventKind::Created);
    let event = ctx.next_event().await;
    assert_eq!(event.kind, SessionEventKind::Failed);
    assert!(event.reason.unwrap().contains("no IP address"));

    wait_for_workload_gone(&ctx.runner, &created.workload_name).await;
    assert_eq!(
        ctx.runner.deleted_workloads().await,
        vec![created.workload_name.clone()]
    );
    assert_eq!(ctx.manager.active_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_delete_still_ends_sessions() {
    let mut runner = MockRunner::new();
    runner.fail_delete = true;
    let mut ctx = TestContext::with_runner(unlimited(), runner).await;

    let stopping = ctx.create_running("alice", DESKTOP_APP).await;
    let expiring = ctx.create_running("bob", DESKTOP_APP).await;
    ctx.next_kinds(4).await;

    let stopped = ctx.manager.stop_session(&stopping.id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert_eq!(ctx.next_event().await.kind, SessionEventKind::Stopped);

    let expired = ctx.manager.expire_session(&expiring.id).await.unwrap();
    assert_eq!(expired.status, SessionStatus::Expired);
    assert_eq!(ctx.next_event().await.kind, SessionEventKind::Expired);

    assert_eq!(
        ctx.runner.deleted_workloads().await,
        vec![stopping.workload_name.clone(), expiring.workload_name.clone()]
    );
    assert_eq!(ctx.manager.active_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stop_tears_down_and_is_idempotent() {
    let mut ctx = TestContext::new(unlimited()).await;
    let session = ctx.create_running("alice", DESKTOP_APP).await;
    ctx.next_kinds(2).await;

    let stopped = ctx.manager.stop_session(&session.id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(!ctx.runner.has_workload(&session.workload_name).await);
    assert_eq!(ctx.next_event().await.kind, SessionEventKind::Stopped);

    // Second stop is a no-op
    let again = ctx.manager.stop_session(&session.id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Stopped);
    assert!(ctx.drain_events().is_empty());
    assert_eq!(ctx.runner.deleted_workloads().await.len(), 1);
}

#[tokio::test]
async fn test_terminate_records_terminated_event() {
    let mut ctx = TestContext::new(unlimited()).await;
    let session = ctx.create_running("alice", DESKTOP_APP).await;
    ctx.next_kinds(2).await;

    let terminated = ctx.manager.terminate_session(&session.id).await.unwrap();
    assert_eq!(terminated.status, SessionStatus::Stopped);

    let event = ctx.next_event().await;
    assert_eq!(event.kind, SessionEventKind::Terminated);
    assert_eq!(event.reason.as_deref(), Some("user requested"));
}

#[tokio::test]
async fn test_terminal_sessions_ignore_terminate_and_expire() {
    let mut ctx = TestContext::new(unlimited()).await;
    let session = ctx.create_running("alice", DESKTOP_APP).await;
    ctx.next_kinds(2).await;

    let expired = ctx.manager.expire_session(&session.id).await.unwrap();
    assert_eq!(expired.status, SessionStatus::Expired);
    assert_eq!(ctx.next_event().await.kind, SessionEventKind::Expired);

    let again = ctx.manager.expire_session(&session.id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Expired);

    let terminated = ctx.manager.terminate_session(&session.id).await.unwrap();
    assert_eq!(terminated.status, SessionStatus::Expired);

    assert!(ctx.drain_events().is_empty());
    assert_eq!(ctx.runner.deleted_workloads().await.len(), 1);
}

#[tokio::test]
async fn test_terminate_while_creating_is_rejected() {
    let ctx = TestContext::with_runner(unlimited(), MockRunner::never_ready()).await;

    let created = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP))
        .await
        .unwrap();

    let err = ctx.manager.terminate_session(&created.id).await.unwrap_err();
    match err {
        Error::Transition(e) => {
            assert_eq!(e.from, SessionStatus::Creating);
            assert_eq!(e.to, SessionStatus::Stopped);
        }
        other => panic!("expected transition error, got {other}"),
    }

    let current = ctx.manager.get_session(&created.id).await.unwrap();
    assert_eq!(current.status, SessionStatus::Creating);
    assert!(ctx.runner.has_workload(&created.workload_name).await);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let ctx = TestContext::new(unlimited()).await;

    let err = ctx.manager.stop_session("missing").await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));
    assert!(ctx.manager.get_session("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_restart_keeps_id_with_fresh_workload() {
    let mut ctx = TestContext::new(unlimited()).await;
    let session = ctx.create_running("alice", DESKTOP_APP).await;
    ctx.manager.stop_session(&session.id).await.unwrap();

    let restarted = ctx.manager.restart_session(&session.id).await.unwrap();
    assert_eq!(restarted.id, session.id);
    assert_eq!(restarted.status, SessionStatus::Creating);
    assert_ne!(restarted.workload_name, session.workload_name);
    assert!(restarted.workload_ip.is_none());

    let running = wait_for_status(&ctx.manager, &session.id, SessionStatus::Running).await;
    assert!(running.workload_ip.is_some());
    assert!(!ctx.runner.has_workload(&session.workload_name).await);
    assert!(ctx.runner.has_workload(&restarted.workload_name).await);

    assert_eq!(
        ctx.next_kinds(5).await,
        vec![
            SessionEventKind::Created,
            SessionEventKind::Ready,
            SessionEventKind::Stopped,
            SessionEventKind::Restarted,
            SessionEventKind::Ready,
        ]
    );
}

#[tokio::test]
async fn test_restart_reuses_requested_screen() {
    let ctx = TestContext::new(unlimited()).await;
    let screen = ScreenGeometry {
        width: 2560,
        height: 1440,
        dpi: 144,
    };

    let created = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", DESKTOP_APP).with_screen(screen))
        .await
        .unwrap();
    assert_eq!(created.screen, Some(screen));
    assert_eq!(ctx.runner.screen_for(&created.workload_name).await, Some(screen));

    wait_for_status(&ctx.manager, &created.id, SessionStatus::Running).await;
    ctx.manager.stop_session(&created.id).await.unwrap();

    let restarted = ctx.manager.restart_session(&created.id).await.unwrap();
    assert_eq!(restarted.screen, Some(screen));
    assert_eq!(ctx.runner.screen_for(&restarted.workload_name).await, Some(screen));
}

#[tokio::test]
async fn test_create_rolls_back_workload_when_persist_fails() {
    let (mut ctx, store) =
        TestContext::with_faulty_store(unlimited(), MockRunner::with_network_policies()).await;
    store.fail_create_session();

    let err = ctx
        .manager
        .create_session(CreateSessionRequest::new("alice", LOCKED_APP))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let deleted = ctx.runner.deleted_workloads().await;
    assert_eq!(deleted.len(), 1);
    assert!(ctx.runner.workload_names().await.is_empty());
    assert!(ctx.runner.policy_for(&deleted[0]).await.is_none());

    assert!(ctx.manager.list_sessions().await.unwrap().is_empty());
    assert!(ctx.drain_events().is_empty());
}

#[tokio::test]
async fn test_restart_rolls_back_workload_when_persist_fails() {
    let (mut ctx, store) =
        TestContext::with_faulty_store(unlimited(), MockRunner::with_network_policies()).await;
    let session = ctx.create_running("alice", LOCKED_APP).await;
    ctx.manager.stop_session(&session.id).await.unwrap();
    ctx.next_kinds(3).await;

    store.fail_update_workload();
    let err = ctx.manager.restart_session(&session.id).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let current = ctx.manager.get_session(&session.id).await.unwrap();
    assert_eq!(current.status, SessionStatus::Stopped);
    assert_eq!(current.workload_name, session.workload_name);

    let deleted = ctx.runner.deleted_workloads().await;
    assert_eq!(deleted.len(), 2);
    assert_ne!(deleted[1], session.workload_name);
    assert!(ctx.runner.workload_names().await.is_empty());
    assert!(ctx.runner.policy_for(&deleted[1]).await.is_none());
    assert!(ctx.drain_events().is_empty());
}

#[tokio::test]
async fn test_restart_requires_stopped() {
    let ctx = TestContext::new(unlimited()).await;
    let session = ctx.create_running("alice", DESKTOP_APP).await;

    let err = ctx.manager.restart_session(&session.id).await.unwrap_err();
    assert!(matches!(err, Error::Transition(_)));

    ctx.manager.expire_session(&session.id).await.unwrap();
    let err = ctx.manager.restart_session(&session.id).await.unwrap_err();
    assert!(matches!(err, Error::Transition(_)));
}

#[tokio::test]
async fn test_restart_rechecks_user_quota() {
    let config = ManagerConfig {
        max_sessions_per_user: 1,
        ..unlimited()
    };
    let ctx = TestContext::new(config).await;

    let first = ctx.create_running("alice", DESKTOP_APP).await;
    ctx.manager.stop_session(&first.id).await.unwrap();
    let second = ctx.create_running("alice", DESKTOP_APP).await;

    let err = ctx.manager.restart_session(&first.id).await.unwrap_err();
    match err {
        Error::QuotaExceeded(e) => assert_eq!(e.scope, QuotaScope::User),
        other => panic!("expected quota error, got {other}"),
    }

    let first = ctx.manager.get_session(&first.id).await.unwrap();
    assert_eq!(first.status, SessionStatus::Stopped);
    assert_eq!(
        ctx.runner.workload_names().await,
        vec![second.workload_name.clone()]
    );
}

#[tokio::test]
async fn test_egress_policy_follows_workload() {
    let ctx = TestContext::with_runner(unlimited(), MockRunner::with_network_policies()).await;

    let locked = ctx.create_running("alice", LOCKED_APP).await;
    let policy = ctx.runner.policy_for(&locked.workload_name).await.unwrap();
    assert_eq!(policy.mode, EgressMode::DenyAll);

    let open = ctx.create_running("alice", DESKTOP_APP).await;
    assert!(ctx.runner.policy_for(&open.workload_name).await.is_none());

    ctx.manager.stop_session(&locked.id).await.unwrap();
    assert!(ctx.runner.policy_for(&locked.workload_name).await.is_none());
}

#[tokio::test]
async fn test_egress_policy_failure_does_not_block_session() {
    let mut runner = MockRunner::with_network_policies();
    runner.fail_network_policy = true;
    let ctx = TestContext::with_runner(unlimited(), runner).await;

    let session = ctx.create_running("alice", LOCKED_APP).await;
    assert!(ctx.runner.policy_for(&session.workload_name).await.is_none());
}

#[tokio::test]
async fn test_runner_without_policy_support_still_runs_locked_app() {
    let ctx = TestContext::new(unlimited()).await;

    let session = ctx.create_running("alice", LOCKED_APP).await;
    assert!(session.workload_ip.is_some());
}

#[tokio::test]
async fn test_list_sessions_by_user() {
    let ctx = TestContext::new(unlimited()).await;
    ctx.create_running("alice", DESKTOP_APP).await;
    ctx.create_running("alice", DESKTOP_APP).await;
    ctx.create_running("bob", DESKTOP_APP).await;

    assert_eq!(ctx.manager.list_sessions().await.unwrap().len(), 3);

    let alice = ctx.manager.list_sessions_by_user("alice").await.unwrap();
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|s| s.user_id == "alice"));
}
