//! Transition service: validates moves through the lifecycle, enforces the
//! install-retry bound, and produces audit log entries (spec.md §4.5).

use crate::node::{Node, NodeStateLog, TriggeredBy};
use crate::state_machine::{InvalidStateTransition, NodeState};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

/// Bound on consecutive install attempts before a node is parked in
/// `install_failed` for good (absent a forced reset).
pub const MAX_INSTALL_ATTEMPTS: u32 = 3;

/// Errors specific to the transition service, layered over
/// `InvalidStateTransition`.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The requested transition is not admissible.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidStateTransition),

    /// `install_failed -> pending` was requested without `force` after the
    /// retry bound was reached.
    #[error("max install attempts ({MAX_INSTALL_ATTEMPTS}) exceeded; use force=true to reset and retry")]
    RetryLimitExceeded,
}

/// Parameters for a single transition request, mirroring
/// `StateTransitionService.transition`'s keyword arguments in the original
/// implementation.
#[derive(Debug, Default)]
pub struct TransitionRequest {
    /// Who is driving this transition.
    pub triggered_by: Option<TriggeredBy>,
    /// Operator user id, when admin-triggered.
    pub user_id: Option<String>,
    /// Free-text comment to attach to the log entry.
    pub comment: Option<String>,
    /// Structured metadata to attach to the log entry.
    pub metadata: Option<serde_json::Value>,
    /// Bypass the retry bound and transition-table check; resets counters.
    pub force: bool,
}

/// Stateless service that mutates a `Node` in place and returns the audit
/// record to be persisted by the caller.
pub struct StateTransitionService;

impl StateTransitionService {
    /// Move `node` to `to_state`, validating the transition and the retry
    /// bound unless `request.force` is set.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::RetryLimitExceeded`] if `install_failed ->
    /// pending` is requested without `force` after the bound is hit, or
    /// [`TransitionError::InvalidTransition`] if the move is not in the
    /// admissible-transitions table and not forced.
    pub fn transition(
        node: &mut Node,
        to_state: NodeState,
        request: TransitionRequest,
    ) -> Result<NodeStateLog, TransitionError> {
        let from_state = node.state;

        if from_state == NodeState::InstallFailed
            && to_state == NodeState::Pending
            && !request.force
            && node.install_attempts >= MAX_INSTALL_ATTEMPTS
        {
            return Err(TransitionError::RetryLimitExceeded);
        }

        if !request.force && !NodeState::can_transition(from_state, to_state) {
            return Err(InvalidStateTransition {
                from: from_state,
                to: to_state,
            }
            .into());
        }

        node.state = to_state;
        node.state_changed_at = Utc::now();

        if request.force || to_state == NodeState::Installed {
            node.install_attempts = 0;
            node.last_install_error = None;
        }

        let mut metadata = request.metadata;
        if request.force {
            let entry = metadata.get_or_insert_with(|| json!({}));
            if let Some(obj) = entry.as_object_mut() {
                obj.insert("forced".to_string(), json!(true));
            }
        }

        let log_entry = NodeStateLog {
            node_id: node.id,
            from_state,
            to_state,
            triggered_by: request.triggered_by.unwrap_or(TriggeredBy::Admin),
            user_id: request.user_id,
            comment: request.comment,
            metadata,
            created_at: node.state_changed_at,
        };

        info!(
            node_id = %node.id,
            mac = node.mac_address.as_deref().unwrap_or("none"),
            from = ?from_state,
            to = ?to_state,
            triggered_by = ?log_entry.triggered_by,
            "node state transition",
        );

        Ok(log_entry)
    }

    /// Record an installation failure report. Increments `install_attempts`
    /// and, once the bound is reached, transitions the node to
    /// `install_failed` with the error captured in the log metadata.
    /// Otherwise the node stays in `installing` and only a warning is
    /// logged — no audit record.
    #[must_use]
    pub fn handle_install_failure(node: &mut Node, error: Option<String>) -> Option<NodeStateLog> {
        node.install_attempts += 1;
        node.last_install_error = error.clone();

        if node.install_attempts >= MAX_INSTALL_ATTEMPTS {
            let metadata = json!({
                "error": error,
                "attempt": node.install_attempts,
            });
            let request = TransitionRequest {
                triggered_by: Some(TriggeredBy::NodeReport),
                metadata: Some(metadata),
                ..Default::default()
            };
            StateTransitionService::transition(node, NodeState::InstallFailed, request).ok()
        } else {
            warn!(
                node_id = %node.id,
                attempt = node.install_attempts,
                max_attempts = MAX_INSTALL_ATTEMPTS,
                error = error.as_deref().unwrap_or(""),
                "install failed, retries remaining",
            );
            None
        }
    }
}
