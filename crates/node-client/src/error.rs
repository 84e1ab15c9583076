//! Node client errors.

use thiserror::Error;

/// Errors surfaced by node list/get/replace operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Kubernetes API error other than the classified ones below
    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    /// Node does not exist
    #[error("node not found: {0}")]
    NotFound(String),

    /// Optimistic write lost the race; the caller must re-read and retry
    #[error("conflicting write on node {0}")]
    Conflict(String),
}

impl ClientError {
    /// True for errors that a fresh read-modify-write attempt can resolve.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }
}
