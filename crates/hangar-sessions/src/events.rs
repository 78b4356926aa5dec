// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session lifecycle events.
//!
//! Every lifecycle transition is reported to an [`EventRecorder`]. Recorders
//! are called synchronously from request paths, so implementations must not
//! block: [`ChannelRecorder`] hands events to a consumer task with `try_send`
//! and drops them when the consumer falls behind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::Session;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEventKind {
    /// Session row persisted, workload requested.
    #[serde(rename = "session.created")]
    Created,
    /// Workload became ready.
    #[serde(rename = "session.ready")]
    Ready,
    /// Workload failed to start or was lost.
    #[serde(rename = "session.failed")]
    Failed,
    /// Stopped by the user.
    #[serde(rename = "session.stopped")]
    Stopped,
    /// A stopped session was started again.
    #[serde(rename = "session.restarted")]
    Restarted,
    /// Expired after idling.
    #[serde(rename = "session.expired")]
    Expired,
    /// Terminated on request.
    #[serde(rename = "session.terminated")]
    Terminated,
}

impl SessionEventKind {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventKind::Created => "session.created",
            SessionEventKind::Ready => "session.ready",
            SessionEventKind::Failed => "session.failed",
            SessionEventKind::Stopped => "session.stopped",
            SessionEventKind::Restarted => "session.restarted",
            SessionEventKind::Expired => "session.expired",
            SessionEventKind::Terminated => "session.terminated",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Session the event is about.
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Application the session runs.
    pub app_id: String,
    /// What happened.
    pub kind: SessionEventKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Why it happened, if known.
    pub reason: Option<String>,
    /// Free-form details (workload name, IP, ...).
    pub metadata: BTreeMap<String, String>,
}

impl SessionEvent {
    /// Build an event for `session`, timestamped now.
    pub fn new(session: &Session, kind: SessionEventKind) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            app_id: session.app_id.clone(),
            kind,
            timestamp: Utc::now(),
            reason: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Sink for lifecycle events.
///
/// Called synchronously from hot paths; implementations must return quickly
/// and never fail the caller.
pub trait EventRecorder: Send + Sync {
    /// Record one event.
    fn record(&self, event: SessionEvent);
}

/// Recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _event: SessionEvent) {}
}

/// Recorder that writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(&self, event: SessionEvent) {
        info!(
            event = %event.kind,
            session_id = %event.session_id,
            user_id = %event.user_id,
            app_id = %event.app_id,
            reason = event.reason.as_deref().unwrap_or(""),
            "Session event"
        );
    }
}

/// Recorder that forwards events to a bounded channel.
///
/// Events are dropped with a warning when the channel is full or the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
    tx: mpsc::Sender<SessionEvent>,
}

impl ChannelRecorder {
    /// Create a recorder and the receiving end for a consumer task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventRecorder for ChannelRecorder {
    fn record(&self, event: SessionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(ev) => ("channel full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("receiver closed", ev),
            };
            warn!(
                event = %event.kind,
                session_id = %event.session_id,
                reason,
                "Dropping session event"
            );
        }
    }
}

/// Recorder that forwards every event to each child, in order.
#[derive(Clone, Default)]
pub struct CompositeRecorder {
    recorders: Vec<Arc<dyn EventRecorder>>,
}

impl CompositeRecorder {
    /// Build from optional children; absent ones are dropped here once.
    pub fn new(recorders: Vec<Option<Arc<dyn EventRecorder>>>) -> Self {
        Self {
            recorders: recorders.into_iter().flatten().collect(),
        }
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    /// Whether there are no children.
    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}

impl EventRecorder for CompositeRecorder {
    fn record(&self, event: SessionEvent) {
        if let Some((last, rest)) = self.recorders.split_last() {
            for recorder in rest {
                recorder.record(event.clone());
            }
            last.record(event);
        }
    }
}
