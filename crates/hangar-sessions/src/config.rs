// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::expiry_worker::ExpiryWorkerConfig;
use crate::manager::ManagerConfig;
use crate::models::ResourceLimits;
use crate::queue::QueueConfig;

/// Hangar session core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL, if the embedder wants one opened for it
    pub database_url: Option<String>,
    /// Maximum active sessions per user (0 = unlimited)
    pub max_sessions_per_user: u32,
    /// Maximum active sessions per tenant (0 = unlimited)
    pub max_sessions_per_tenant: u32,
    /// Maximum active sessions across all replicas (0 = unlimited)
    pub max_global_sessions: u32,
    /// Idle time after which a running session is expired
    pub session_timeout: Duration,
    /// How often stale sessions are swept
    pub cleanup_interval: Duration,
    /// How long a workload may take to become ready
    pub ready_timeout: Duration,
    /// Whether callers over the global limit wait in a queue
    pub queue_enabled: bool,
    /// Maximum queued callers
    pub queue_max_size: usize,
    /// Maximum time a caller waits in the queue
    pub queue_timeout: Duration,
    /// How often the queue re-checks capacity
    pub queue_poll_interval: Duration,
    /// Resource limits for applications that define none
    pub default_resources: ResourceLimits,
    /// How often workloads are reconciled against sessions (None = only at startup)
    pub reconcile_interval: Option<Duration>,
    /// Minimum age before an unowned workload is deleted
    pub orphan_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_sessions_per_user: 5,
            max_sessions_per_tenant: 0,
            max_global_sessions: 0,
            session_timeout: Duration::from_secs(7200),
            cleanup_interval: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(300),
            queue_enabled: false,
            queue_max_size: 100,
            queue_timeout: Duration::from_secs(60),
            queue_poll_interval: Duration::from_millis(500),
            default_resources: ResourceLimits::default(),
            reconcile_interval: Some(Duration::from_secs(300)),
            orphan_grace: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `HANGAR_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `HANGAR_MAX_SESSIONS_PER_USER` (default: 5)
    /// - `HANGAR_MAX_SESSIONS_PER_TENANT` (default: 0, unlimited)
    /// - `HANGAR_MAX_GLOBAL_SESSIONS` (default: 0, unlimited)
    /// - `HANGAR_SESSION_TIMEOUT_SECS` (default: 7200)
    /// - `HANGAR_CLEANUP_INTERVAL_SECS` (default: 60)
    /// - `HANGAR_READY_TIMEOUT_SECS` (default: 300)
    /// - `HANGAR_QUEUE_ENABLED` (default: false)
    /// - `HANGAR_QUEUE_MAX_SIZE` (default: 100)
    /// - `HANGAR_QUEUE_TIMEOUT_SECS` (default: 60)
    /// - `HANGAR_QUEUE_POLL_INTERVAL_MS` (default: 500)
    /// - `HANGAR_DEFAULT_CPU_REQUEST`, `HANGAR_DEFAULT_CPU_LIMIT`,
    ///   `HANGAR_DEFAULT_MEMORY_REQUEST`, `HANGAR_DEFAULT_MEMORY_LIMIT`
    /// - `HANGAR_RECONCILE_INTERVAL_SECS` (default: 300, 0 disables)
    /// - `HANGAR_ORPHAN_GRACE_SECS` (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = non_empty_var("HANGAR_DATABASE_URL");

        let max_sessions_per_user = parse_var(
            "HANGAR_MAX_SESSIONS_PER_USER",
            defaults.max_sessions_per_user,
            "must be a non-negative integer",
        )?;
        let max_sessions_per_tenant = parse_var(
            "HANGAR_MAX_SESSIONS_PER_TENANT",
            defaults.max_sessions_per_tenant,
            "must be a non-negative integer",
        )?;
        let max_global_sessions = parse_var(
            "HANGAR_MAX_GLOBAL_SESSIONS",
            defaults.max_global_sessions,
            "must be a non-negative integer",
        )?;

        let session_timeout = secs_var("HANGAR_SESSION_TIMEOUT_SECS", defaults.session_timeout)?;
        let cleanup_interval = secs_var("HANGAR_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval)?;
        let ready_timeout = secs_var("HANGAR_READY_TIMEOUT_SECS", defaults.ready_timeout)?;
        if cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "HANGAR_CLEANUP_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }

        let queue_enabled = parse_var(
            "HANGAR_QUEUE_ENABLED",
            defaults.queue_enabled,
            "must be true or false",
        )?;
        let queue_max_size = parse_var(
            "HANGAR_QUEUE_MAX_SIZE",
            defaults.queue_max_size,
            "must be a non-negative integer",
        )?;
        let queue_timeout = secs_var("HANGAR_QUEUE_TIMEOUT_SECS", defaults.queue_timeout)?;
        let queue_poll_interval = Duration::from_millis(parse_var(
            "HANGAR_QUEUE_POLL_INTERVAL_MS",
            defaults.queue_poll_interval.as_millis() as u64,
            "must be a number of milliseconds",
        )?);
        if queue_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "HANGAR_QUEUE_POLL_INTERVAL_MS",
                "must be greater than zero",
            ));
        }

        let default_resources = ResourceLimits {
            cpu_request: non_empty_var("HANGAR_DEFAULT_CPU_REQUEST"),
            cpu_limit: non_empty_var("HANGAR_DEFAULT_CPU_LIMIT"),
            memory_request: non_empty_var("HANGAR_DEFAULT_MEMORY_REQUEST"),
            memory_limit: non_empty_var("HANGAR_DEFAULT_MEMORY_LIMIT"),
        };

        let reconcile_secs: u64 = parse_var(
            "HANGAR_RECONCILE_INTERVAL_SECS",
            defaults.reconcile_interval.map_or(0, |d| d.as_secs()),
            "must be a number of seconds",
        )?;
        let reconcile_interval = (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs));
        let orphan_grace = secs_var("HANGAR_ORPHAN_GRACE_SECS", defaults.orphan_grace)?;

        Ok(Self {
            database_url,
            max_sessions_per_user,
            max_sessions_per_tenant,
            max_global_sessions,
            session_timeout,
            cleanup_interval,
            ready_timeout,
            queue_enabled,
            queue_max_size,
            queue_timeout,
            queue_poll_interval,
            default_resources,
            reconcile_interval,
            orphan_grace,
        })
    }

    /// Settings for the session manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_sessions_per_user: self.max_sessions_per_user,
            max_sessions_per_tenant: self.max_sessions_per_tenant,
            max_global_sessions: self.max_global_sessions,
            session_timeout: self.session_timeout,
            ready_timeout: self.ready_timeout,
            default_resources: self.default_resources.clone(),
            orphan_grace: self.orphan_grace,
        }
    }

    /// Settings for the admission queue, if queueing is enabled.
    pub fn queue_config(&self) -> Option<QueueConfig> {
        self.queue_enabled.then(|| QueueConfig {
            max_size: self.queue_max_size,
            timeout: self.queue_timeout,
            poll_interval: self.queue_poll_interval,
        })
    }

    /// Settings for the expiry worker.
    pub fn expiry_worker_config(&self) -> ExpiryWorkerConfig {
        ExpiryWorkerConfig {
            poll_interval: self.cleanup_interval,
            reconcile_interval: self.reconcile_interval,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: T,
    reason: &'static str,
) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name, reason)),
        None => Ok(default),
    }
}

fn secs_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(name, default.as_secs(), "must be a number of seconds").map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
