// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface for workload backends.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EgressPolicy, LaunchType, OsType, ResourceLimits, ScreenGeometry};

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Workload does not exist on the backend.
    #[error("Workload not found: {0}")]
    NotFound(String),

    /// Workload could not be created.
    #[error("Workload creation failed: {0}")]
    CreateFailed(String),

    /// Workload did not become ready in time.
    #[error("Workload {name} not ready after {timeout:?}")]
    ReadyTimeout {
        /// Workload name.
        name: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Workload terminated before becoming ready.
    #[error("Workload {name} failed: {reason}")]
    WorkloadFailed {
        /// Workload name.
        name: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// No routable address has been assigned yet.
    #[error("Workload {0} has no IP address assigned")]
    NoAddress(String),

    /// Network policy could not be applied or removed.
    #[error("Network policy error: {0}")]
    NetworkPolicy(String),

    /// Backend platform is unreachable.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Everything a backend needs to start a workload for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Session the workload backs.
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Application template.
    pub app_id: String,
    /// Container image.
    pub image: String,
    /// Entrypoint override.
    pub command: Vec<String>,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Port the workload serves on.
    pub port: u16,
    /// Resource requests and limits.
    pub resources: ResourceLimits,
    /// Remote desktop geometry.
    pub screen: ScreenGeometry,
    /// Launch type.
    pub launch_type: LaunchType,
    /// Operating system.
    pub os_type: OsType,
    /// Labels the backend attaches to the workload for reconciliation.
    pub labels: BTreeMap<String, String>,
}

/// Result of creating a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResult {
    /// Backend-assigned workload name (e.g. pod name).
    pub name: String,
}

/// Workload as reported by the backend listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    /// Workload name.
    pub name: String,
    /// Session label, if the backend kept it.
    pub session_id: Option<String>,
    /// Assigned address.
    pub ip: Option<String>,
    /// Whether the workload passed its readiness checks.
    pub ready: bool,
    /// When the backend created it.
    pub created_at: Option<DateTime<Utc>>,
}

/// Trait for workload runners.
///
/// Runners are PURE platform adapters - they do NOT access the database.
/// Status bookkeeping is handled by the session manager.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier (e.g., "kubernetes", "docker", "mock").
    fn runner_type(&self) -> &'static str;

    /// Provision a workload.
    ///
    /// Callers may retry on transient failures; idempotency is up to the backend.
    async fn create_workload(&self, config: &WorkloadConfig) -> Result<WorkloadResult>;

    /// Tear down a workload. Best effort: callers log failures and move on.
    async fn delete_workload(&self, name: &str) -> Result<()>;

    /// Block until the workload is ready or `timeout` elapses.
    async fn wait_for_ready(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Routable address of the workload.
    ///
    /// Fails with [`RunnerError::NoAddress`] if none is assigned yet.
    async fn get_ip(&self, name: &str) -> Result<String>;

    /// List workloads managed by this runner.
    async fn list_workloads(&self) -> Result<Vec<WorkloadInfo>>;

    /// Cheap platform reachability probe.
    async fn healthy(&self) -> bool;

    /// Egress policy support, for backends that have it.
    ///
    /// The default is `None`: the manager skips policy handling entirely.
    fn network_policies(&self) -> Option<&dyn NetworkPolicyRunner> {
        None
    }
}

/// Optional capability for backends that can enforce egress policy.
#[async_trait]
pub trait NetworkPolicyRunner: Send + Sync {
    /// Apply `policy` to the workload named `workload_name`.
    async fn create_network_policy(
        &self,
        workload_name: &str,
        session_id: &str,
        policy: &EgressPolicy,
    ) -> Result<()>;

    /// Remove the policy for `workload_name`. Best effort.
    async fn delete_network_policy(&self, workload_name: &str) -> Result<()>;
}
