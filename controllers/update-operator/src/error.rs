//! Operator-specific error types.

use node_client::ClientError;
use thiserror::Error;

/// Errors that can occur in the update operator.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Node store error
    #[error("node client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The leader-election lease could not be retained
    #[error("leadership lost: {0}")]
    LeadershipLost(String),

    /// More than one managed agent workload exists
    #[error("expected at most one managed agent workload, found {0}")]
    ConflictingAgentWorkloads(usize),

    /// The agent workload's version annotation is missing or unparseable
    #[error("invalid agent workload version: {0}")]
    InvalidAgentVersion(String),
}
