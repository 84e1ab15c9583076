//! Event publication.
//!
//! Significant protocol transitions (reboot approvals, completions,
//! leadership changes) are published as cluster events so operators can see
//! the coordinator's decisions next to the objects they affect. Publication
//! is best-effort: failures are logged and never abort reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Sink for human-readable cluster events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, reference: ObjectReference, type_: EventType, reason: &str, note: &str);
}

/// Publishes events through the cluster's event API under a fixed source
/// component.
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, component: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: component.to_string(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, reference: ObjectReference, type_: EventType, reason: &str, note: &str) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference);
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note.to_string()),
            action: reason.to_string(),
            secondary: None,
        };

        if let Err(err) = recorder.publish(event).await {
            warn!(error = %err, reason, "failed to publish event");
        }
    }
}

/// Sink that drops everything; used by unit tests.
#[cfg(test)]
#[derive(Default)]
pub struct NoopEventSink;

#[cfg(test)]
#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(
        &self,
        _reference: ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: &str,
    ) {
    }
}

/// Object reference for events attached to a node.
pub fn node_reference(node: &Node) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Node".to_string()),
        name: node.metadata.name.clone(),
        uid: node.metadata.uid.clone(),
        ..Default::default()
    }
}
