// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload provisioning and teardown.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::SessionManager;
use crate::error::{Error, Result};
use crate::models::{Application, ResourceLimits, ScreenGeometry};
use crate::runner::{Runner, WorkloadConfig, WorkloadResult};

/// Label carrying the owning session ID on every workload.
pub const SESSION_LABEL: &str = "hangar.io/session-id";
/// Label carrying the owning user ID.
pub const USER_LABEL: &str = "hangar.io/user-id";
/// Label carrying the application ID.
pub const APP_LABEL: &str = "hangar.io/app-id";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

impl SessionManager {
    /// Check that `app` is something this core can start and return its image.
    pub(crate) fn runnable_image<'a>(&self, app: &'a Application) -> Result<&'a str> {
        if !app.launch_type.runs_workload() {
            return Err(Error::InvalidRequest(format!(
                "application {} has launch type {}, which does not run a workload",
                app.id, app.launch_type
            )));
        }
        app.runnable_image().ok_or_else(|| {
            Error::InvalidRequest(format!("application {} has no container image", app.id))
        })
    }

    /// Build the runner-facing config for a session of `app`.
    pub(crate) fn build_workload_config(
        &self,
        session_id: &str,
        user_id: &str,
        app: &Application,
        image: &str,
        screen: Option<ScreenGeometry>,
    ) -> WorkloadConfig {
        let labels = BTreeMap::from([
            (SESSION_LABEL.to_string(), session_id.to_string()),
            (USER_LABEL.to_string(), user_id.to_string()),
            (APP_LABEL.to_string(), app.id.clone()),
            (MANAGED_BY_LABEL.to_string(), "hangar".to_string()),
        ]);

        WorkloadConfig {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            app_id: app.id.clone(),
            image: image.to_string(),
            command: app.command.clone(),
            args: app.args.clone(),
            env: app.env.clone(),
            port: app.port,
            resources: ResourceLimits::effective(
                app.resource_limits.as_ref(),
                &self.config.default_resources,
            ),
            screen: screen.unwrap_or_default(),
            launch_type: app.launch_type,
            os_type: app.os_type,
            labels,
        }
    }

    /// Create the workload and, when the runner supports it, its egress policy.
    ///
    /// A policy failure is logged and otherwise ignored.
    pub(crate) async fn provision(
        &self,
        config: &WorkloadConfig,
        app: &Application,
    ) -> Result<WorkloadResult> {
        let workload = self.runner.create_workload(config).await?;
        info!(
            session_id = %config.session_id,
            workload = %workload.name,
            runner = self.runner.runner_type(),
            "Workload created"
        );

        let Some(policy) = app.egress_policy.as_ref().filter(|p| p.is_enforced()) else {
            return Ok(workload);
        };
        match self.runner.network_policies() {
            Some(policies) => {
                if let Err(e) = policies
                    .create_network_policy(&workload.name, &config.session_id, policy)
                    .await
                {
                    warn!(
                        session_id = %config.session_id,
                        workload = %workload.name,
                        error = %e,
                        "Failed to create network policy, continuing without egress restrictions"
                    );
                }
            }
            None => {
                debug!(
                    session_id = %config.session_id,
                    runner = self.runner.runner_type(),
                    "Runner does not support network policies, skipping egress policy"
                );
            }
        }

        Ok(workload)
    }
}

/// Delete a workload and its network policy. Failures are logged, never returned.
pub(crate) async fn teardown_workload(runner: &dyn Runner, session_id: &str, workload_name: &str) {
    if let Some(policies) = runner.network_policies()
        && let Err(e) = policies.delete_network_policy(workload_name).await
    {
        warn!(
            session_id = %session_id,
            workload = %workload_name,
            error = %e,
            "Failed to delete network policy"
        );
    }

    match runner.delete_workload(workload_name).await {
        Ok(()) => debug!(session_id = %session_id, workload = %workload_name, "Workload deleted"),
        Err(e) => warn!(
            session_id = %session_id,
            workload = %workload_name,
            error = %e,
            "Failed to delete workload"
        ),
    }
}
