//! Core data model: `Node`, its audit log, and in-flight transfer records
//! (spec.md §3).

use crate::state_machine::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Node CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// x86-64, BIOS or UEFI.
    X86_64,
    /// 64-bit ARM, used by recent Raspberry Pi models.
    Aarch64,
    /// Alias accepted from some boot ROMs for 64-bit ARM.
    Arm64,
}

/// How a node's firmware presents itself at boot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    /// Legacy PC BIOS PXE ROM.
    Bios,
    /// UEFI PXE stack.
    Uefi,
    /// Raspberry Pi TFTP-only boot ROM.
    Pi,
}

/// Supported Raspberry Pi hardware models (see `pi::models`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiModel {
    /// Pi 3 Model B.
    Pi3,
    /// Pi 3 Model B+.
    #[serde(rename = "pi3b+")]
    Pi3BPlus,
    /// Compute Module 3.
    Cm3,
    /// Pi 4 Model B.
    Pi4,
    /// Pi 5.
    Pi5,
}

/// The central entity: a bare-metal or single-board node moving through the
/// PureBoot lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Opaque node identifier.
    pub id: Uuid,
    /// Canonical colon-separated lowercase MAC, for x86 nodes.
    pub mac_address: Option<String>,
    /// Eight lowercase hex characters, for Pi nodes.
    pub serial_number: Option<String>,
    /// Node architecture.
    pub architecture: Architecture,
    /// Node boot mode.
    pub boot_mode: BootMode,
    /// Pi hardware model, only meaningful when `boot_mode == BootMode::Pi`.
    pub pi_model: Option<PiModel>,
    /// Assigned workflow, if any.
    pub workflow_id: Option<String>,
    /// Assigned group, if any.
    pub group_id: Option<String>,
    /// Current lifecycle state.
    pub state: NodeState,
    /// Timestamp of the last state change.
    pub state_changed_at: DateTime<Utc>,
    /// Consecutive failed install attempts since the last reset.
    pub install_attempts: u32,
    /// Error message from the most recent install failure.
    pub last_install_error: Option<String>,
    /// Last observed IP address.
    pub ip_address: Option<String>,
    /// Last observed hostname.
    pub hostname: Option<String>,
    /// Last time this node was seen by any boot or report handler.
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Build a freshly discovered node, as produced by auto-registration.
    #[must_use]
    pub fn new_discovered(
        architecture: Architecture,
        boot_mode: BootMode,
        mac_address: Option<String>,
        serial_number: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mac_address,
            serial_number,
            architecture,
            boot_mode,
            pi_model: None,
            workflow_id: None,
            group_id: None,
            state: NodeState::Discovered,
            state_changed_at: now,
            install_attempts: 0,
            last_install_error: None,
            ip_address: None,
            hostname: None,
            last_seen_at: Some(now),
        }
    }
}

/// Who initiated a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    /// An operator via the admin surface.
    Admin,
    /// The controller itself (e.g. install-failure handling).
    System,
    /// A report from the node's own deploy environment.
    NodeReport,
}

/// One append-only audit record for a node state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStateLog {
    /// Node this record belongs to.
    pub node_id: Uuid,
    /// State before the transition.
    pub from_state: NodeState,
    /// State after the transition.
    pub to_state: NodeState,
    /// Who triggered the transition.
    pub triggered_by: TriggeredBy,
    /// Operator user id, when `triggered_by == Admin`.
    pub user_id: Option<String>,
    /// Free-text operator comment.
    pub comment: Option<String>,
    /// Structured metadata (e.g. `{"error": ..., "attempt": ...}`).
    pub metadata: Option<serde_json::Value>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

/// An in-flight egress stream tracked by the bandwidth throttler. In-memory
/// only; never persisted (spec.md §3).
#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    /// Unique id for this stream.
    pub transfer_id: Uuid,
    /// Path of the file being streamed.
    pub file_path: String,
    /// Total size of the artifact, in bytes.
    pub total_bytes: u64,
    /// Bytes delivered so far; monotonically non-decreasing.
    pub bytes_transferred: u64,
    /// When the stream began.
    pub started_at: DateTime<Utc>,
    /// Priority recomputed on every progress update.
    pub priority: f64,
}

impl ActiveTransfer {
    /// Create a freshly registered transfer at zero progress.
    #[must_use]
    pub fn new(file_path: impl Into<String>, total_bytes: u64) -> Self {
        let mut transfer = Self {
            transfer_id: Uuid::new_v4(),
            file_path: file_path.into(),
            total_bytes,
            bytes_transferred: 0,
            started_at: Utc::now(),
            priority: 0.0,
        };
        transfer.priority = transfer.compute_priority();
        transfer
    }

    /// Fraction of the transfer completed, in `[0, 1]`. Zero when
    /// `total_bytes` is zero.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_transferred as f64 / self.total_bytes as f64
        }
    }

    /// Recompute this transfer's priority per spec.md §4.7 and cache it.
    pub fn refresh_priority(&mut self) {
        self.priority = self.compute_priority();
    }

    fn compute_priority(&self) -> f64 {
        const SMALL_FILE_THRESHOLD: f64 = 10.0 * 1024.0 * 1024.0;
        const NEAR_COMPLETION_THRESHOLD: f64 = 0.8;

        let mut priority = 1.0;

        let total = self.total_bytes as f64;
        if total < SMALL_FILE_THRESHOLD {
            priority += 1.0 - total / SMALL_FILE_THRESHOLD;
        }

        let progress = self.progress();
        if progress > NEAR_COMPLETION_THRESHOLD {
            priority += (progress - NEAR_COMPLETION_THRESHOLD) / (1.0 - NEAR_COMPLETION_THRESHOLD);
        }

        priority
    }
}
