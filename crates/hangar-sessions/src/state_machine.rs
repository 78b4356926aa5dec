// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session status state machine.
//!
//! ```text
//!                 ┌──────────┐
//!      ┌─────────►│ CREATING │──────────────┐
//!      │          └────┬─────┘              │
//!      │               │ ready              │ readiness failed
//!      │               ▼                    ▼
//!      │          ┌─────────┐          ┌────────┐
//!      │          │ RUNNING │─────────►│ FAILED │
//!      │          └────┬────┘          └────────┘
//!      │     stop/     │     idle
//!      │   terminate   │   timeout
//!      │        ┌──────┴──────┐
//!      │        ▼             ▼
//!      │   ┌─────────┐   ┌─────────┐
//!      └───│ STOPPED │   │ EXPIRED │
//!  restart └─────────┘   └─────────┘
//! ```
//!
//! `expired` and `failed` are terminal. `stopped` is not, because a stopped
//! session can be restarted.

use thiserror::Error;
use tracing::{info, warn};

use crate::models::SessionStatus;

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for session {session_id}: {from} -> {to}")]
pub struct TransitionError {
    /// Session the transition was attempted on.
    pub session_id: String,
    /// Current status.
    pub from: SessionStatus,
    /// Requested status.
    pub to: SessionStatus,
}

/// Statuses reachable from `from`.
pub fn allowed_transitions(from: SessionStatus) -> &'static [SessionStatus] {
    use SessionStatus::*;
    match from {
        Creating => &[Running, Failed],
        Running => &[Stopped, Expired, Failed],
        Stopped => &[Creating],
        Expired | Failed => &[],
    }
}

/// Whether `from -> to` is a legal transition.
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Whether no further transition is possible from `status`.
pub fn is_terminal_state(status: SessionStatus) -> bool {
    allowed_transitions(status).is_empty()
}

/// Validate a transition and write the audit line.
pub fn validate_and_log_transition(
    session_id: &str,
    from: SessionStatus,
    to: SessionStatus,
    reason: &str,
) -> Result<(), TransitionError> {
    if !can_transition(from, to) {
        warn!(
            session_id = %session_id,
            from = %from,
            to = %to,
            reason = %reason,
            "Rejected session state transition"
        );
        return Err(TransitionError {
            session_id: session_id.to_string(),
            from,
            to,
        });
    }

    info!(
        session_id = %session_id,
        from = %from,
        to = %to,
        reason = %reason,
        "Session state transition"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    const TABLE: &[(SessionStatus, SessionStatus)] = &[
        (Creating, Running),
        (Creating, Failed),
        (Running, Stopped),
        (Running, Expired),
        (Running, Failed),
        (Stopped, Creating),
    ];

    #[test]
    fn test_can_transition_matches_table_exactly() {
        for from in SessionStatus::ALL {
            for to in SessionStatus::ALL {
                let expected = TABLE.contains(&(from, to));
                assert_eq!(
                    can_transition(from, to),
                    expected,
                    "{} -> {} should be {}",
                    from,
                    to,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(is_terminal_state(Expired));
        assert!(is_terminal_state(Failed));
        assert!(!is_terminal_state(Stopped));
        assert!(!is_terminal_state(Creating));
        assert!(!is_terminal_state(Running));
    }

    #[test]
    fn test_validate_returns_typed_error() {
        let err = validate_and_log_transition("sess-1", Expired, Running, "test").unwrap_err();
        assert_eq!(err.session_id, "sess-1");
        assert_eq!(err.from, Expired);
        assert_eq!(err.to, Running);
        assert_eq!(
            err.to_string(),
            "invalid transition for session sess-1: expired -> running"
        );
    }

    #[test]
    fn test_validate_accepts_restart_path() {
        assert!(validate_and_log_transition("sess-1", Stopped, Creating, "restart").is_ok());
    }
}
