//! The 12-state node lifecycle and its admissible-transition table
//! (spec.md §4.5).

use serde::{Deserialize, Serialize};

/// A node's position in the PureBoot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// Seen once via PXE/TFTP but not yet assigned a workflow.
    Discovered,
    /// Assigned but not yet installing.
    Pending,
    /// Streaming an OS image or running a deploy environment.
    Installing,
    /// Installation completed successfully.
    Installed,
    /// Installation failed and the retry bound has not been hit (yet), or
    /// has been hit and the node is parked.
    InstallFailed,
    /// In normal service.
    Active,
    /// Scheduled for re-installation.
    Reprovision,
    /// Being taken out of service.
    Deprovisioning,
    /// Moving between sites or hypervisors.
    Migrating,
    /// Opaque transit state: acting as the source of a clone operation.
    ServingSource,
    /// Opaque transit state: being installed from a clone of another node.
    CloningTarget,
    /// Terminal: permanently retired.
    Retired,
}

/// Raised when a transition is attempted that is not in the admissible set
/// and was not forced.
#[derive(Debug, thiserror::Error)]
#[error("invalid state transition: {from:?} -> {to:?}")]
pub struct InvalidStateTransition {
    /// The state the node was in.
    pub from: NodeState,
    /// The state the caller tried to move it to.
    pub to: NodeState,
}

/// The base admissible-transition table, encoded as data rather than
/// conditionals (spec.md §9 design note), plus the admin-override rule that
/// any non-retired state may transition to `Retired`.
const BASE_TRANSITIONS: &[(NodeState, NodeState)] = {
    use NodeState::{
        Active, CloningTarget, Deprovisioning, Discovered, InstallFailed, Installed, Installing,
        Migrating, Pending, Reprovision, Retired, ServingSource,
    };
    &[
        (Discovered, Pending),
        (Discovered, CloningTarget),
        (Pending, Installing),
        (Installing, Installed),
        (Installing, InstallFailed),
        (InstallFailed, Pending),
        (Installed, Active),
        (Installed, Reprovision),
        (Installed, Retired),
        (Active, Reprovision),
        (Active, Deprovisioning),
        (Active, Migrating),
        (Active, ServingSource),
        (Active, CloningTarget),
        (Reprovision, Pending),
        (Deprovisioning, Retired),
        (Migrating, Active),
        (ServingSource, Active),
        (CloningTarget, Installed),
    ]
};

impl NodeState {
    /// True if `self == NodeState::Retired`; a retired node accepts no
    /// further transitions, including admin override.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Retired)
    }

    /// Check whether `from -> to` is in the admissible-transition table, or
    /// is the admin-override retirement rule.
    #[must_use]
    pub fn can_transition(from: NodeState, to: NodeState) -> bool {
        if from.is_terminal() {
            return false;
        }
        if to == NodeState::Retired {
            return true;
        }
        BASE_TRANSITIONS.contains(&(from, to))
    }
}
