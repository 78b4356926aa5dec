// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hangar Sessions - Session Orchestration Core
//!
//! This crate turns "user X wants application Y" into an isolated, running
//! workload and drives that session through its lifecycle. It is the
//! orchestration core of the hangar platform; HTTP handlers, proxies and
//! authentication live in the embedding product.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Embedding product (HTTP API, proxy)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!            │ create / stop / restart / terminate        │ load, readiness
//!            ▼                                            ▼
//! ┌──────────────────────────────────────┐   ┌──────────────────────────────┐
//! │           SessionManager              │◄──│     BackpressureHandler      │
//! │  quotas ─► SessionQueue (FIFO)        │   └──────────────────────────────┘
//! │  state machine ─► EventRecorder       │◄──── ExpiryWorker (idle expiry,
//! │  readiness tasks                      │       reconciliation)
//! └──────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────────┐      ┌─────────────────────────────────────┐
//! │ SessionStore             │      │ Runner (+ NetworkPolicyRunner)      │
//! │ PostgreSQL / SQLite      │      │ Kubernetes, Docker, ... (external)  │
//! └──────────────────────────┘      └─────────────────────────────────────┘
//! ```
//!
//! Any number of replicas can share one PostgreSQL store. Replicas hold no
//! session state in memory: quota counts and load are read from the store
//! on every call, and every status write is compare-and-set on the expected
//! current status, so concurrent replicas never apply the same transition
//! twice.
//!
//! # Session Status State Machine
//!
//! ```text
//!   creating ──► running ──► stopped ──► creating (restart)
//!      │            │
//!      ▼            ├──► expired
//!    failed ◄───────┘
//! ```
//!
//! `expired` and `failed` are terminal. See [`state_machine`].
//!
//! # Configuration
//!
//! [`Config::from_env`] reads `HANGAR_*` environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HANGAR_DATABASE_URL` | - | PostgreSQL or SQLite URL (optional) |
//! | `HANGAR_MAX_SESSIONS_PER_USER` | `5` | Per-user limit, 0 = unlimited |
//! | `HANGAR_MAX_SESSIONS_PER_TENANT` | `0` | Per-tenant limit |
//! | `HANGAR_MAX_GLOBAL_SESSIONS` | `0` | Limit across all replicas |
//! | `HANGAR_SESSION_TIMEOUT_SECS` | `7200` | Idle time before expiry |
//! | `HANGAR_CLEANUP_INTERVAL_SECS` | `60` | Expiry sweep interval |
//! | `HANGAR_READY_TIMEOUT_SECS` | `300` | Workload readiness timeout |
//! | `HANGAR_QUEUE_ENABLED` | `false` | Queue requests over the global limit |
//! | `HANGAR_QUEUE_MAX_SIZE` | `100` | Maximum queued requests |
//! | `HANGAR_QUEUE_TIMEOUT_SECS` | `60` | Maximum wait in the queue |
//! | `HANGAR_QUEUE_POLL_INTERVAL_MS` | `500` | Capacity re-check interval |
//! | `HANGAR_RECONCILE_INTERVAL_SECS` | `300` | Reconciliation interval, 0 disables |
//! | `HANGAR_ORPHAN_GRACE_SECS` | `300` | Age before unowned workloads are deleted |
//!
//! # Modules
//!
//! - [`manager`]: Session lifecycle orchestration
//! - [`queue`]: FIFO admission queue
//! - [`backpressure`]: Load and readiness signals
//! - [`runner`]: Workload backend abstraction
//! - [`persistence`]: Session and application stores
//! - [`events`]: Lifecycle event recorders
//! - [`runtime`]: Embeddable runtime with background tasks

#![deny(missing_docs)]

/// Load and readiness signalling for load balancers and autoscalers.
pub mod backpressure;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for session orchestration.
pub mod error;

/// Session lifecycle events and recorders.
pub mod events;

/// Background worker expiring idle sessions.
pub mod expiry_worker;

/// Session manager.
pub mod manager;

/// Database migrations for the session stores.
pub mod migrations;

/// Domain types.
pub mod models;

/// Session and application persistence.
pub mod persistence;

/// FIFO admission queue.
pub mod queue;

/// Workload backends.
pub mod runner;

/// Embeddable runtime.
pub mod runtime;

/// Session status transitions.
pub mod state_machine;

pub use backpressure::{BackpressureHandler, LoadStatus, ReadinessStatus};
pub use config::Config;
pub use error::{Error, QuotaExceededError, QuotaScope, Result};
pub use events::{EventRecorder, SessionEvent, SessionEventKind};
pub use manager::{ManagerConfig, QuotaStatus, ReconcileReport, SessionManager};
pub use models::{Application, CreateSessionRequest, Session, SessionStatus};
pub use persistence::{PostgresStore, SessionStore, SqliteStore};
pub use queue::{QueueConfig, QueueError, SessionQueue};
pub use runner::{NetworkPolicyRunner, Runner, RunnerError};
pub use runtime::SessionRuntime;
