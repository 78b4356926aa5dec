// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! A simple runner implementation that simulates workload provisioning
//! without talking to any container platform.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::traits::*;
use crate::models::{EgressPolicy, ScreenGeometry};

/// Mock workload state.
#[derive(Debug, Clone)]
struct MockWorkload {
    session_id: Option<String>,
    ip: String,
    ready: bool,
    screen: Option<ScreenGeometry>,
    created_at: DateTime<Utc>,
}

/// Mock runner for testing.
pub struct MockRunner {
    workloads: Arc<Mutex<HashMap<String, MockWorkload>>>,
    policies: Arc<Mutex<HashMap<String, EgressPolicy>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    next_id: AtomicU32,
    /// Simulated time until a workload becomes ready (in milliseconds)
    pub ready_delay_ms: u64,
    /// Simulated time `create_workload` takes (in milliseconds)
    pub create_delay_ms: u64,
    /// If true, `create_workload` fails
    pub fail_create: bool,
    /// If true, workloads crash before becoming ready
    pub fail_ready: bool,
    /// If true, workloads never become ready and readiness waits time out
    pub never_ready: bool,
    /// If true, `get_ip` fails even for ready workloads
    pub no_ip: bool,
    /// If true, `delete_workload` fails (the workload is still removed)
    pub fail_delete: bool,
    /// If true, the runner exposes the network policy capability
    pub supports_network_policies: bool,
    /// If true, `create_network_policy` fails
    pub fail_network_policy: bool,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner whose workloads become ready quickly.
    pub fn new() -> Self {
        Self {
            workloads: Arc::new(Mutex::new(HashMap::new())),
            policies: Arc::new(Mutex::new(HashMap::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU32::new(1),
            ready_delay_ms: 10,
            create_delay_ms: 0,
            fail_create: false,
            fail_ready: false,
            never_ready: false,
            no_ip: false,
            fail_delete: false,
            supports_network_policies: false,
            fail_network_policy: false,
        }
    }

    /// Create a mock runner that cannot create workloads.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    /// Create a mock runner whose workloads never become ready.
    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::new()
        }
    }

    /// Create a mock runner that also enforces egress policies.
    pub fn with_network_policies() -> Self {
        Self {
            supports_network_policies: true,
            ..Self::new()
        }
    }

    /// Names of the workloads that currently exist.
    pub async fn workload_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workloads.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a workload currently exists.
    pub async fn has_workload(&self, name: &str) -> bool {
        self.workloads.lock().await.contains_key(name)
    }

    /// Names passed to `delete_workload`, in call order.
    pub async fn deleted_workloads(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    /// Screen geometry a workload was created with.
    pub async fn screen_for(&self, workload_name: &str) -> Option<ScreenGeometry> {
        self.workloads.lock().await.get(workload_name)?.screen
    }

    /// Egress policy currently applied to a workload.
    pub async fn policy_for(&self, workload_name: &str) -> Option<EgressPolicy> {
        self.policies.lock().await.get(workload_name).cloned()
    }

    /// Simulate the platform losing a workload (node failure, manual delete).
    pub async fn lose_workload(&self, name: &str) {
        self.workloads.lock().await.remove(name);
    }

    /// Register a workload this runner did not create through the manager.
    pub async fn insert_workload(
        &self,
        name: &str,
        session_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) {
        let ip = self.allocate_ip();
        self.workloads.lock().await.insert(
            name.to_string(),
            MockWorkload {
                session_id: session_id.map(str::to_string),
                ip,
                ready: true,
                screen: None,
                created_at,
            },
        );
    }

    fn allocate_ip(&self) -> String {
        ip_for(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

fn ip_for(n: u32) -> String {
    format!("10.42.{}.{}", n / 250, n % 250 + 2)
}

#[async_trait]
impl Runner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn create_workload(&self, config: &WorkloadConfig) -> Result<WorkloadResult> {
        if self.fail_create {
            return Err(RunnerError::CreateFailed("Mock failure".to_string()));
        }
        if self.create_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.create_delay_ms)).await;
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let short_id: String = config.session_id.chars().take(8).collect();
        let name = format!("mock-{}-{}", short_id, n);
        let ip = ip_for(n);

        self.workloads.lock().await.insert(
            name.clone(),
            MockWorkload {
                session_id: Some(config.session_id.clone()),
                ip,
                ready: false,
                screen: Some(config.screen),
                created_at: Utc::now(),
            },
        );

        Ok(WorkloadResult { name })
    }

    async fn delete_workload(&self, name: &str) -> Result<()> {
        self.deleted.lock().await.push(name.to_string());
        let existed = self.workloads.lock().await.remove(name).is_some();

        if self.fail_delete {
            return Err(RunnerError::Other("Mock delete failure".to_string()));
        }
        if !existed {
            return Err(RunnerError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn wait_for_ready(&self, name: &str, timeout: Duration) -> Result<()> {
        if self.never_ready {
            tokio::time::sleep(timeout).await;
            return Err(RunnerError::ReadyTimeout {
                name: name.to_string(),
                timeout,
            });
        }

        let delay = Duration::from_millis(self.ready_delay_ms);
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(RunnerError::ReadyTimeout {
                name: name.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(delay).await;

        if self.fail_ready {
            self.workloads.lock().await.remove(name);
            return Err(RunnerError::WorkloadFailed {
                name: name.to_string(),
                reason: "Mock crash".to_string(),
            });
        }

        let mut workloads = self.workloads.lock().await;
        match workloads.get_mut(name) {
            Some(workload) => {
                workload.ready = true;
                Ok(())
            }
            None => Err(RunnerError::NotFound(name.to_string())),
        }
    }

    async fn get_ip(&self, name: &str) -> Result<String> {
        let workloads = self.workloads.lock().await;
        let workload = workloads
            .get(name)
            .ok_or_else(|| RunnerError::NotFound(name.to_string()))?;

        if self.no_ip || !workload.ready {
            return Err(RunnerError::NoAddress(name.to_string()));
        }
        Ok(workload.ip.clone())
    }

    async fn list_workloads(&self) -> Result<Vec<WorkloadInfo>> {
        let workloads = self.workloads.lock().await;
        let mut infos: Vec<WorkloadInfo> = workloads
            .iter()
            .map(|(name, w)| WorkloadInfo {
                name: name.clone(),
                session_id: w.session_id.clone(),
                ip: w.ready.then(|| w.ip.clone()),
                ready: w.ready,
                created_at: Some(w.created_at),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn healthy(&self) -> bool {
        true
    }

    fn network_policies(&self) -> Option<&dyn NetworkPolicyRunner> {
        if self.supports_network_policies {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl NetworkPolicyRunner for MockRunner {
    async fn create_network_policy(
        &self,
        workload_name: &str,
        _session_id: &str,
        policy: &EgressPolicy,
    ) -> Result<()> {
        if self.fail_network_policy {
            return Err(RunnerError::NetworkPolicy("Mock policy failure".to_string()));
        }
        self.policies
            .lock()
            .await
            .insert(workload_name.to_string(), policy.clone());
        Ok(())
    }

    async fn delete_network_policy(&self, workload_name: &str) -> Result<()> {
        self.policies.lock().await.remove(workload_name);
        Ok(())
    }
}
