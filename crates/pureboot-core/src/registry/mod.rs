//! Node registry capability trait and an in-memory implementation.
//!
//! Grounded on `netbox-client`'s `NetBoxClientTrait`/`MockNetBoxClient`
//! pattern: a `Send + Sync` async trait abstracts persistence so that
//! dispatch and the HTTP surface never depend on a concrete backend, and an
//! `Arc<Mutex<HashMap<...>>>`-backed mock doubles as a perfectly real
//! in-process registry (spec.md §3, §5).

mod in_memory;

pub use in_memory::InMemoryNodeRegistry;

use crate::node::Node;
use crate::PureBootError;
use uuid::Uuid;

/// Persistence boundary for `Node` records and their audit logs.
///
/// All methods are `async` so a future networked backend (e.g. a SQL store
/// behind a connection pool) can implement this trait without changing any
/// caller.
#[async_trait::async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Insert a newly discovered node. Returns [`PureBootError::Conflict`]
    /// if a node with the same MAC or serial already exists.
    async fn create(&self, node: Node) -> Result<Node, PureBootError>;

    /// Fetch a node by id.
    async fn get(&self, id: Uuid) -> Result<Node, PureBootError>;

    /// Find a node by its canonical MAC address, if registered.
    async fn find_by_mac(&self, mac: &str) -> Result<Option<Node>, PureBootError>;

    /// Find a node by its Pi serial number, if registered.
    async fn find_by_serial(&self, serial: &str) -> Result<Option<Node>, PureBootError>;

    /// Replace a node's stored state wholesale (used after a state
    /// transition has already been applied in memory).
    async fn update(&self, node: Node) -> Result<Node, PureBootError>;

    /// List every registered node.
    async fn list(&self) -> Result<Vec<Node>, PureBootError>;

    /// Append a state-transition audit record.
    async fn append_log(&self, log: crate::node::NodeStateLog) -> Result<(), PureBootError>;

    /// Fetch the audit log for one node, oldest first.
    async fn logs_for(&self, node_id: Uuid) -> Result<Vec<crate::node::NodeStateLog>, PureBootError>;
}
