//! In-memory [`NodeRegistry`] backed by `Arc<Mutex<HashMap<...>>>`, in the
//! shape of `netbox-client`'s `MockNetBoxClient`. Suitable both as a test
//! double and as the default production backend for single-controller
//! deployments (spec.md has no persistence requirement beyond durability of
//! the audit log across a process lifetime).

use super::NodeRegistry;
use crate::node::{Node, NodeStateLog};
use crate::PureBootError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Store {
    nodes: HashMap<Uuid, Node>,
    by_mac: HashMap<String, Uuid>,
    by_serial: HashMap<String, Uuid>,
    logs: HashMap<Uuid, Vec<NodeStateLog>>,
}

/// An in-memory node registry. Cheaply `Clone`: all state lives behind an
/// `Arc`, so clones share the same store.
#[derive(Clone, Default)]
pub struct InMemoryNodeRegistry {
    store: std::sync::Arc<Mutex<Store>>,
}

impl InMemoryNodeRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRegistry for InMemoryNodeRegistry {
    async fn create(&self, node: Node) -> Result<Node, PureBootError> {
        let mut store = self.store.lock().expect("registry lock poisoned");

        if let Some(mac) = &node.mac_address {
            if store.by_mac.contains_key(mac) {
                return Err(PureBootError::Conflict(format!("node with MAC {mac} already exists")));
            }
        }
        if let Some(serial) = &node.serial_number {
            if store.by_serial.contains_key(serial) {
                return Err(PureBootError::Conflict(format!("node with serial {serial} already exists")));
            }
        }

        if let Some(mac) = &node.mac_address {
            store.by_mac.insert(mac.clone(), node.id);
        }
        if let Some(serial) = &node.serial_number {
            store.by_serial.insert(serial.clone(), node.id);
        }
        store.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn get(&self, id: Uuid) -> Result<Node, PureBootError> {
        let store = self.store.lock().expect("registry lock poisoned");
        store
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| PureBootError::NotFound(format!("node {id} not found")))
    }

    async fn find_by_mac(&self, mac: &str) -> Result<Option<Node>, PureBootError> {
        let store = self.store.lock().expect("registry lock poisoned");
        Ok(store.by_mac.get(mac).and_then(|id| store.nodes.get(id)).cloned())
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Node>, PureBootError> {
        let store = self.store.lock().expect("registry lock poisoned");
        Ok(store.by_serial.get(serial).and_then(|id| store.nodes.get(id)).cloned())
    }

    async fn update(&self, node: Node) -> Result<Node, PureBootError> {
        let mut store = self.store.lock().expect("registry lock poisoned");
        if !store.nodes.contains_key(&node.id) {
            return Err(PureBootError::NotFound(format!("node {} not found", node.id)));
        }
        if let Some(mac) = &node.mac_address {
            store.by_mac.insert(mac.clone(), node.id);
        }
        if let Some(serial) = &node.serial_number {
            store.by_serial.insert(serial.clone(), node.id);
        }
        store.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn list(&self) -> Result<Vec<Node>, PureBootError> {
        let store = self.store.lock().expect("registry lock poisoned");
        Ok(store.nodes.values().cloned().collect())
    }

    async fn append_log(&self, log: NodeStateLog) -> Result<(), PureBootError> {
        let mut store = self.store.lock().expect("registry lock poisoned");
        store.logs.entry(log.node_id).or_default().push(log);
        Ok(())
    }

    async fn logs_for(&self, node_id: Uuid) -> Result<Vec<NodeStateLog>, PureBootError> {
        let store = self.store.lock().expect("registry lock poisoned");
        Ok(store.logs.get(&node_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Architecture, BootMode};

    fn sample(mac: &str) -> Node {
        Node::new_discovered(Architecture::X86_64, BootMode::Uefi, Some(mac.to_string()), None)
    }

    #[tokio::test]
    async fn create_then_find_by_mac_round_trips() {
        let registry = InMemoryNodeRegistry::new();
        let node = registry.create(sample("aa:bb:cc:dd:ee:ff")).await.expect("create");

        let found = registry.find_by_mac("aa:bb:cc:dd:ee:ff").await.expect("find").expect("present");
        assert_eq!(found.id, node.id);
    }

    #[tokio::test]
    async fn duplicate_mac_is_rejected() {
        let registry = InMemoryNodeRegistry::new();
        registry.create(sample("aa:bb:cc:dd:ee:ff")).await.expect("first create");

        let err = registry.create(sample("aa:bb:cc:dd:ee:ff")).await.unwrap_err();
        assert!(matches!(err, PureBootError::Conflict(_)));
    }

    #[tokio::test]
    async fn get_missing_node_is_not_found() {
        let registry = InMemoryNodeRegistry::new();
        let err = registry.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PureBootError::NotFound(_)));
    }

    #[tokio::test]
    async fn logs_accumulate_per_node_in_order() {
        let registry = InMemoryNodeRegistry::new();
        let node = registry.create(sample("aa:bb:cc:dd:ee:ff")).await.expect("create");

        for to_state in ["pending", "installing"] {
            registry
                .append_log(NodeStateLog {
                    node_id: node.id,
                    from_state: crate::state_machine::NodeState::Discovered,
                    to_state: crate::state_machine::NodeState::Pending,
                    triggered_by: crate::node::TriggeredBy::System,
                    user_id: None,
                    comment: Some(to_state.to_string()),
                    metadata: None,
                    created_at: chrono::Utc::now(),
                })
                .await
                .expect("append log");
        }

        let logs = registry.logs_for(node.id).await.expect("logs");
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].comment.as_deref(), Some("pending"));
        assert_eq!(logs[1].comment.as_deref(), Some("installing"));
    }
}
