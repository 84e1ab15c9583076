//! Cluster node access for the update operator.
//!
//! Everything the operator persists lives on `Node` objects, so this crate
//! wraps the node surface of the cluster API behind the [`NodeClient`] trait:
//! - `KubeNodeClient`: the real kube-rs backed implementation
//! - `MockNodeClient`: an in-memory store for unit tests
//! - `update_node_retry`: read-modify-write with conflict retry, the only
//!   sanctioned way to edit a node

mod client;
mod error;
mod mock;
mod node_client;
mod retry;

pub use client::KubeNodeClient;
pub use error::ClientError;
pub use mock::MockNodeClient;
pub use node_client::NodeClient;
pub use retry::{update_node_retry, ConflictBackoff};
