//! Helper functions for editing node metadata inside mutator transforms.
//!
//! The annotation and label maps on a node are optional; these helpers
//! create them on demand and tolerate their absence on delete.

use k8s_openapi::api::core::v1::Node;

pub fn set_annotation(node: &mut Node, key: &str, value: &str) {
    node.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

pub fn remove_annotation(node: &mut Node, key: &str) {
    if let Some(annotations) = node.metadata.annotations.as_mut() {
        annotations.remove(key);
    }
}

pub fn set_label(node: &mut Node, key: &str, value: &str) {
    node.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

pub fn remove_label(node: &mut Node, key: &str) {
    if let Some(labels) = node.metadata.labels.as_mut() {
        labels.remove(key);
    }
}

/// Node name for logging and mutator lookups; nodes always carry one.
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}
