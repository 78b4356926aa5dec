// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for hangar-sessions.

use thiserror::Error;

use crate::persistence::StoreError;
use crate::queue::QueueError;
use crate::runner::RunnerError;
use crate::state_machine::TransitionError;

/// A quota check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("quota exceeded: {reason}")]
pub struct QuotaExceededError {
    /// Which limit was hit.
    pub scope: QuotaScope,
    /// Human-readable explanation.
    pub reason: String,
}

/// Level at which a quota is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    /// Per-user limit.
    User,
    /// Per-tenant limit.
    Tenant,
    /// Cluster-wide limit.
    Global,
}

/// Session orchestration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Persistence operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Runner (workload platform) operation failed.
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Admission queue rejected or abandoned the request.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Requested status change is not allowed.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A session quota was exceeded.
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceededError),

    /// Application was not found.
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    /// Session was not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether the caller may retry the same request later with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Queue(QueueError::Full { .. } | QueueError::Timeout(_)) => true,
            Error::QuotaExceeded(e) => e.scope == QuotaScope::Global,
            _ => false,
        }
    }

    /// Whether the error means the referenced entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ApplicationNotFound(_) | Error::SessionNotFound(_)
        )
    }
}

/// Result type using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
