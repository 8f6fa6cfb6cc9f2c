//! Priority-weighted bandwidth throttler (spec.md §4.7).
//!
//! The transfer table is the only mutable shared structure; it lives behind
//! a single `tokio::sync::Mutex`, per spec.md §4.7/§5 and the "arena-style
//! transfer table" design note (spec.md §9).

use crate::node::ActiveTransfer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Floor on the per-transfer byte allocation: 1 Mbps.
pub const MIN_BANDWIDTH_BYTES_PER_SEC: f64 = 125_000.0;

/// Cooperative pause between allocation slices in [`ThrottledStream`].
pub const PACING_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Table {
    transfers: HashMap<Uuid, ActiveTransfer>,
}

/// A fair-share byte budget shared across concurrent egress streams.
#[derive(Debug, Clone)]
pub struct BandwidthThrottler {
    total_bandwidth_bytes_per_sec: f64,
    table: Arc<Mutex<Table>>,
}

impl BandwidthThrottler {
    /// Build a throttler capped at `total_bandwidth_bytes_per_sec` summed
    /// across all registered transfers.
    #[must_use]
    pub fn new(total_bandwidth_bytes_per_sec: f64) -> Self {
        Self {
            total_bandwidth_bytes_per_sec,
            table: Arc::new(Mutex::new(Table::default())),
        }
    }

    /// Register a new transfer and return its id.
    pub async fn register(&self, file_path: impl Into<String>, total_bytes: u64) -> Uuid {
        let transfer = ActiveTransfer::new(file_path, total_bytes);
        let id = transfer.transfer_id;
        self.table.lock().await.transfers.insert(id, transfer);
        id
    }

    /// Remove a transfer from the table. Safe to call more than once; a
    /// missing id is a no-op. This is the sole correctness obligation under
    /// cancellation (spec.md §9).
    pub async fn unregister(&self, transfer_id: Uuid) {
        self.table.lock().await.transfers.remove(&transfer_id);
    }

    /// Number of currently registered transfers. Lock-free reads are
    /// permitted to observe a stale view per spec.md §4.7; this
    /// implementation still takes the lock since `tokio::sync::Mutex` has
    /// no atomic peek, but callers must not rely on it being instantaneous
    /// with concurrent mutation.
    pub async fn active_transfer_count(&self) -> usize {
        self.table.lock().await.transfers.len()
    }

    /// Record progress and recompute priority for a registered transfer.
    pub async fn record_progress(&self, transfer_id: Uuid, bytes_transferred: u64) {
        let mut table = self.table.lock().await;
        if let Some(transfer) = table.transfers.get_mut(&transfer_id) {
            transfer.bytes_transferred = bytes_transferred;
            transfer.refresh_priority();
        }
    }

    /// Compute the number of bytes `transfer_id` may send over the next
    /// `delta` interval, per the share-of-priority allocation in spec.md
    /// §4.7. Returns 0 if the transfer is not registered.
    pub async fn get_allowed_bytes(&self, transfer_id: Uuid, delta: Duration) -> u64 {
        let table = self.table.lock().await;
        let Some(transfer) = table.transfers.get(&transfer_id) else {
            return 0;
        };

        let total_priority: f64 = table.transfers.values().map(|t| t.priority).sum();
        if total_priority <= 0.0 {
            return 0;
        }

        let share = transfer.priority / total_priority;
        let dt_secs = delta.as_secs_f64();

        let allowed = (self.total_bandwidth_bytes_per_sec * dt_secs * share).floor();
        let floor = (MIN_BANDWIDTH_BYTES_PER_SEC * dt_secs).floor();
        let allowed = allowed.max(floor);

        let remaining = transfer.total_bytes.saturating_sub(transfer.bytes_transferred);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "allocation is bounded above by remaining bytes, which fits u64"
        )]
        let allowed_u64 = allowed.max(0.0) as u64;
        allowed_u64.min(remaining)
    }
}

/// RAII guard ensuring a transfer is unregistered on every exit path
/// (success, error, or cancellation) — the Rust counterpart to the original
/// generator's `finally:` block (spec.md §9).
#[derive(Debug)]
pub struct TransferGuard {
    throttler: BandwidthThrottler,
    transfer_id: Uuid,
}

impl TransferGuard {
    /// Register a new transfer and return a guard that unregisters it on
    /// drop.
    pub async fn register(
        throttler: &BandwidthThrottler,
        file_path: impl Into<String>,
        total_bytes: u64,
    ) -> Self {
        let transfer_id = throttler.register(file_path, total_bytes).await;
        Self {
            throttler: throttler.clone(),
            transfer_id,
        }
    }

    /// The id of the guarded transfer.
    #[must_use]
    pub fn transfer_id(&self) -> Uuid {
        self.transfer_id
    }

    /// Request an allocation for the next `delta` interval.
    pub async fn allowed_bytes(&self, delta: Duration) -> u64 {
        self.throttler.get_allowed_bytes(self.transfer_id, delta).await
    }

    /// Record delivered bytes.
    pub async fn record_progress(&self, bytes_transferred: u64) {
        self.throttler.record_progress(self.transfer_id, bytes_transferred).await;
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        let throttler = self.throttler.clone();
        let transfer_id = self.transfer_id;
        tokio::spawn(async move {
            throttler.unregister(transfer_id).await;
        });
    }
}

/// Stream up to `min(buffer_len, allowed, chunk_size)` bytes per slice from
/// a byte source, pacing by [`PACING_INTERVAL`] between slices, until
/// `total_bytes` have been delivered.
pub async fn throttled_copy<S, E>(
    throttler: &BandwidthThrottler,
    file_path: impl Into<String>,
    total_bytes: u64,
    chunk_size: usize,
    mut source: S,
    mut sink: impl FnMut(&[u8]) -> Result<(), E>,
) -> Result<(), E>
where
    S: FnMut(usize) -> Option<Vec<u8>>,
{
    let guard = TransferGuard::register(throttler, file_path, total_bytes).await;
    let mut delivered: u64 = 0;

    while delivered < total_bytes {
        let allowed = guard.allowed_bytes(PACING_INTERVAL).await;
        if allowed == 0 {
            tokio::time::sleep(PACING_INTERVAL).await;
            continue;
        }
        #[allow(
            clippy::cast_possible_truncation,
            reason = "chunk_size is caller-bounded and allowed is capped by remaining bytes"
        )]
        let take = (allowed as usize).min(chunk_size);
        let Some(buf) = source(take) else {
            break;
        };
        if buf.is_empty() {
            break;
        }
        sink(&buf)?;
        delivered += buf.len() as u64;
        guard.record_progress(delivered).await;
        tokio::time::sleep(PACING_INTERVAL).await;
    }

    Ok(())
}
