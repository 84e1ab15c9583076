//! Mock node client for unit testing.
//!
//! Stores nodes in memory with the same optimistic-concurrency behavior as
//! the apiserver: every stored node carries a resource version, and a
//! replace whose version is stale fails with a conflict. Tests can also
//! inject artificial conflicts to exercise retry paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;

use crate::error::ClientError;
use crate::node_client::NodeClient;

/// In-memory node store for tests.
///
/// Nodes are kept in a `BTreeMap`, so `list_nodes` returns them in a stable
/// name order, matching the deterministic list order the reconciler relies
/// on.
#[derive(Clone, Default)]
pub struct MockNodeClient {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    injected_conflicts: Arc<Mutex<u32>>,
}

impl MockNodeClient {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a node, assigning it a fresh resource version.
    pub fn insert(&self, mut node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        node.metadata.resource_version = Some("1".to_string());
        self.nodes.lock().unwrap().insert(name, node);
    }

    /// Make the next `count` replace attempts fail with a conflict without
    /// applying the write.
    pub fn fail_next_replaces(&self, count: u32) {
        *self.injected_conflicts.lock().unwrap() = count;
    }

    /// Snapshot a stored node for assertions.
    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(name).cloned()
    }

    /// Apply an out-of-band edit, the way the per-node agent would.
    ///
    /// Bumps the resource version so an operator write derived from an
    /// earlier read conflicts, as it would against the real store.
    pub fn mutate(&self, name: &str, mutate: impl FnOnce(&mut Node)) {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(node) = nodes.get_mut(name) {
            mutate(node);
            node.metadata.resource_version = Some(bump(&node.metadata.resource_version));
        }
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        Ok(self.nodes.lock().unwrap().values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(name.to_string()))
    }

    async fn replace_node(&self, node: &Node) -> Result<Node, ClientError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClientError::NotFound("node without a name".to_string()))?;

        {
            let mut injected = self.injected_conflicts.lock().unwrap();
            if *injected > 0 {
                *injected -= 1;
                return Err(ClientError::Conflict(name.to_string()));
            }
        }

        let mut nodes = self.nodes.lock().unwrap();
        let stored = nodes
            .get(name)
            .ok_or_else(|| ClientError::NotFound(name.to_string()))?;

        if stored.metadata.resource_version != node.metadata.resource_version {
            return Err(ClientError::Conflict(name.to_string()));
        }

        let mut updated = node.clone();
        updated.metadata.resource_version = Some(bump(&stored.metadata.resource_version));
        nodes.insert(name.to_string(), updated.clone());

        Ok(updated)
    }
}

fn bump(version: &Option<String>) -> String {
    let current: u64 = version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    (current + 1).to_string()
}
