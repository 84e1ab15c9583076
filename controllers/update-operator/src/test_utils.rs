//! Test helpers for building nodes in specific protocol states.

use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;

use crate::events::EventSink;

/// A bare node with empty annotation and label maps.
pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(Default::default()),
            labels: Some(Default::default()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A node carrying the given annotations and labels.
pub fn node_with(name: &str, annotations: &[(&str, &str)], labels: &[(&str, &str)]) -> Node {
    let mut node = node(name);

    for (key, value) in annotations {
        node.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
    }
    for (key, value) in labels {
        node.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
    }

    node
}

pub fn annotation(node: &Node, key: &str) -> Option<String> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|set| set.get(key))
        .cloned()
}

pub fn has_label(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .map(|set| set.contains_key(key))
        .unwrap_or(false)
}

/// Event sink that records `(object name, reason)` pairs for assertions.
#[derive(Default)]
pub struct RecordingEventSink {
    pub published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(
        &self,
        reference: ObjectReference,
        _type_: EventType,
        reason: &str,
        _note: &str,
    ) {
        self.published
            .lock()
            .unwrap()
            .push((reference.name.unwrap_or_default(), reason.to_string()));
    }
}
