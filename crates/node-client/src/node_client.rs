//! The node access trait.
//!
//! Abstracting the node surface of the cluster API lets unit tests drive the
//! reconciler against `MockNodeClient` without a running apiserver.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;

use crate::error::ClientError;

/// Node list/get/replace operations against the cluster's object store.
///
/// `replace_node` is optimistic: the write carries the resource version of
/// the read it was derived from, and a stale version fails with
/// [`ClientError::Conflict`]. Callers that need reliable edits go through
/// [`crate::update_node_retry`] instead of calling `replace_node` directly.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// List every node in the cluster, in the store's stable list order.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError>;

    /// Fetch a single node by name.
    async fn get_node(&self, name: &str) -> Result<Node, ClientError>;

    /// Persist a modified node, failing with `Conflict` if it changed since
    /// it was read.
    async fn replace_node(&self, node: &Node) -> Result<Node, ClientError>;
}
