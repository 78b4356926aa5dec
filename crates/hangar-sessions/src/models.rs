// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared by the manager, the runners and the stores.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
///
/// See [`crate::state_machine`] for the legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Workload requested, waiting for readiness.
    Creating,
    /// Workload is ready and has an address.
    Running,
    /// Stopped by the user; can be restarted.
    Stopped,
    /// Expired after idling past the session timeout.
    Expired,
    /// Workload failed to start or was lost.
    Failed,
}

impl SessionStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Creating,
        SessionStatus::Running,
        SessionStatus::Stopped,
        SessionStatus::Expired,
        SessionStatus::Failed,
    ];

    /// Statuses that hold a workload and count toward quotas.
    pub const ACTIVE: [SessionStatus; 2] = [SessionStatus::Creating, SessionStatus::Running];

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Creating => "creating",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        }
    }

    /// Whether a session in this status consumes capacity.
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(SessionStatus::Creating),
            "running" => Ok(SessionStatus::Running),
            "stopped" => Ok(SessionStatus::Stopped),
            "expired" => Ok(SessionStatus::Expired),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// How an application is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchType {
    /// Plain external link; no workload is started.
    Url,
    /// Desktop/application container streamed to the browser.
    Container,
    /// Web application reached through a reverse proxy.
    WebProxy,
}

impl LaunchType {
    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchType::Url => "url",
            LaunchType::Container => "container",
            LaunchType::WebProxy => "web_proxy",
        }
    }

    /// Whether the session core starts a workload for this launch type.
    pub fn runs_workload(&self) -> bool {
        matches!(self, LaunchType::Container | LaunchType::WebProxy)
    }
}

impl fmt::Display for LaunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(LaunchType::Url),
            "container" => Ok(LaunchType::Container),
            "web_proxy" => Ok(LaunchType::WebProxy),
            other => Err(format!("unknown launch type '{}'", other)),
        }
    }
}

/// Operating system of the workload image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    /// Linux container (default).
    #[default]
    Linux,
    /// Windows container or VM.
    Windows,
}

impl OsType {
    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(OsType::Linux),
            "windows" => Ok(OsType::Windows),
            other => Err(format!("unknown os type '{}'", other)),
        }
    }
}

/// CPU and memory requests/limits in orchestrator notation (`500m`, `2Gi`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    /// CPU limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    /// Memory request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    /// Memory limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

impl ResourceLimits {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.cpu_request.is_none()
            && self.cpu_limit.is_none()
            && self.memory_request.is_none()
            && self.memory_limit.is_none()
    }

    /// Pick the limits a workload runs with.
    ///
    /// An application that sets any limit replaces the defaults wholesale;
    /// the two sets are never merged field by field.
    pub fn effective(app: Option<&ResourceLimits>, defaults: &ResourceLimits) -> ResourceLimits {
        match app {
            Some(limits) if !limits.is_empty() => limits.clone(),
            _ => defaults.clone(),
        }
    }
}

/// Remote desktop geometry requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Dots per inch.
    pub dpi: u32,
}

impl Default for ScreenGeometry {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            dpi: 96,
        }
    }
}

/// Egress enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressMode {
    /// No restriction.
    #[default]
    AllowAll,
    /// Only the listed destinations are reachable.
    Allowlist,
    /// All outbound traffic blocked except DNS.
    DenyAll,
}

/// One allowed egress destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRule {
    /// Destination CIDR block.
    pub cidr: String,
    /// Destination ports; empty means any port.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Transport protocol (`TCP` or `UDP`).
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// Network egress policy attached to an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressPolicy {
    /// Enforcement mode.
    #[serde(default)]
    pub mode: EgressMode,
    /// Allowed destinations (used with [`EgressMode::Allowlist`]).
    #[serde(default)]
    pub rules: Vec<EgressRule>,
}

impl EgressPolicy {
    /// Whether this policy restricts anything and needs a backend policy object.
    pub fn is_enforced(&self) -> bool {
        self.mode != EgressMode::AllowAll
    }
}

/// Application template a session is launched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Application identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning tenant, if multi-tenant.
    pub tenant_id: Option<String>,
    /// Launch type.
    pub launch_type: LaunchType,
    /// Operating system of the image.
    pub os_type: OsType,
    /// Container image reference.
    pub image: Option<String>,
    /// Port the workload listens on.
    pub port: u16,
    /// Entrypoint override.
    pub command: Vec<String>,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Application-specific resource limits.
    pub resource_limits: Option<ResourceLimits>,
    /// Egress policy.
    pub egress_policy: Option<EgressPolicy>,
    /// When the application was registered.
    pub created_at: DateTime<Utc>,
}

impl Application {
    /// Image reference if it is present and non-blank.
    pub fn runnable_image(&self) -> Option<&str> {
        self.image.as_deref().map(str::trim).filter(|i| !i.is_empty())
    }
}

/// Persisted session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning tenant (copied from the application).
    pub tenant_id: Option<String>,
    /// Application the session was launched from.
    pub app_id: String,
    /// Runner-assigned workload name.
    pub workload_name: String,
    /// Routable address once running.
    pub workload_ip: Option<String>,
    /// Current status.
    pub status: SessionStatus,
    /// Idle timeout hint supplied by the client.
    pub idle_timeout: Option<Duration>,
    /// Screen geometry requested at creation, reused on restart.
    #[serde(default)]
    pub screen: Option<ScreenGeometry>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last status-relevant mutation.
    pub updated_at: DateTime<Utc>,
    /// Last user activity seen by the proxy layer.
    pub last_activity_at: DateTime<Utc>,
}

/// Request to create a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Requesting user.
    pub user_id: String,
    /// Application to launch.
    pub app_id: String,
    /// Idle timeout hint.
    #[serde(default)]
    pub idle_timeout: Option<Duration>,
    /// Requested screen geometry.
    #[serde(default)]
    pub screen: Option<ScreenGeometry>,
}

impl CreateSessionRequest {
    /// Build a request with default geometry and no idle hint.
    pub fn new(user_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            app_id: app_id.into(),
            idle_timeout: None,
            screen: None,
        }
    }

    /// Set the screen geometry.
    pub fn with_screen(mut self, screen: ScreenGeometry) -> Self {
        self.screen = Some(screen);
        self
    }
}
