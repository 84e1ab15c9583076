//! Pure predicates classifying nodes by their reboot-protocol markers.
//!
//! Each predicate is a conjunction of annotation/label equality checks on a
//! single node. They read state only; all writes go through the node
//! mutator.

use k8s_openapi::api::core::v1::Node;

use crate::constants::{annotations, labels, FALSE, TRUE};

fn annotation<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|set| set.get(key))
        .map(String::as_str)
}

fn label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|set| set.get(key))
        .map(String::as_str)
}

/// True when the annotation is present with exactly `value`.
pub fn annotation_is(node: &Node, key: &str, value: &str) -> bool {
    annotation(node, key) == Some(value)
}

/// Node has asked to reboot and nothing is holding it back.
///
/// This is the annotation half of the candidate check; callers that admit
/// nodes additionally require the before-reboot label to be absent.
pub fn wants_reboot(node: &Node) -> bool {
    annotation_is(node, annotations::REBOOT_NEEDED, TRUE)
        && !annotation_is(node, annotations::REBOOT_PAUSED, TRUE)
        && !annotation_is(node, annotations::REBOOT_OK, TRUE)
        && !annotation_is(node, annotations::REBOOT_IN_PROGRESS, TRUE)
}

/// Node has been granted a reboot and has not yet reported completion.
pub fn still_rebooting(node: &Node) -> bool {
    annotation_is(node, annotations::REBOOT_OK, TRUE)
        && annotation_is(node, annotations::REBOOT_NEEDED, TRUE)
}

/// Node's agent has reported a completed reboot that the operator has not
/// yet acknowledged.
///
/// The operator grants the reboot by setting `reboot-ok=true`; the agent
/// reports completion by setting `reboot-needed` and `reboot-in-progress`
/// back to `"false"`.
pub fn just_rebooted(node: &Node) -> bool {
    annotation_is(node, annotations::REBOOT_OK, TRUE)
        && annotation_is(node, annotations::REBOOT_NEEDED, FALSE)
        && annotation_is(node, annotations::REBOOT_IN_PROGRESS, FALSE)
}

/// Node is in the pre-reboot check phase.
pub fn has_before_reboot_label(node: &Node) -> bool {
    label(node, labels::BEFORE_REBOOT) == Some(TRUE)
}

/// Node is in the post-reboot check phase.
pub fn has_after_reboot_label(node: &Node) -> bool {
    label(node, labels::AFTER_REBOOT) == Some(TRUE)
}

/// Node has opted in (or been opted in) to running the update agent.
pub fn has_agent_enabled_label(node: &Node) -> bool {
    label(node, labels::AGENT_ENABLED).is_some()
}

/// Every listed annotation is present with the value `"true"`.
///
/// An empty list is vacuously satisfied.
pub fn has_all_annotations_true(node: &Node, keys: &[String]) -> bool {
    keys.iter().all(|key| annotation_is(node, key, TRUE))
}

/// OS-image sniff for the legacy auto-labeler: does this node report a
/// Container Linux derivative?
pub fn is_container_linux(node: &Node) -> bool {
    let os_image = node
        .status
        .as_ref()
        .and_then(|status| status.node_info.as_ref())
        .map(|info| info.os_image.as_str())
        .unwrap_or_default();

    os_image.starts_with("Container Linux") || os_image.starts_with("Flatcar Container Linux")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::node_with;

    #[test]
    fn test_wants_reboot() {
        let plain = node_with("a", &[(annotations::REBOOT_NEEDED, TRUE)], &[]);
        assert!(wants_reboot(&plain));

        let paused = node_with(
            "a",
            &[
                (annotations::REBOOT_NEEDED, TRUE),
                (annotations::REBOOT_PAUSED, TRUE),
            ],
            &[],
        );
        assert!(!wants_reboot(&paused));

        let granted = node_with(
            "a",
            &[
                (annotations::REBOOT_NEEDED, TRUE),
                (annotations::REBOOT_OK, TRUE),
            ],
            &[],
        );
        assert!(!wants_reboot(&granted));

        let rebooting = node_with(
            "a",
            &[
                (annotations::REBOOT_NEEDED, TRUE),
                (annotations::REBOOT_IN_PROGRESS, TRUE),
            ],
            &[],
        );
        assert!(!wants_reboot(&rebooting));

        let idle = node_with("a", &[], &[]);
        assert!(!wants_reboot(&idle));
    }

    #[test]
    fn test_just_rebooted_requires_explicit_false() {
        let done = node_with(
            "a",
            &[
                (annotations::REBOOT_OK, TRUE),
                (annotations::REBOOT_NEEDED, FALSE),
                (annotations::REBOOT_IN_PROGRESS, FALSE),
            ],
            &[],
        );
        assert!(just_rebooted(&done));

        // A node that never ran the agent has no completion markers at all.
        let unmarked = node_with("a", &[(annotations::REBOOT_OK, TRUE)], &[]);
        assert!(!just_rebooted(&unmarked));
    }

    #[test]
    fn test_still_rebooting() {
        let node = node_with(
            "a",
            &[
                (annotations::REBOOT_OK, TRUE),
                (annotations::REBOOT_NEEDED, TRUE),
            ],
            &[],
        );
        assert!(still_rebooting(&node));
        assert!(!just_rebooted(&node));
    }

    #[test]
    fn test_has_all_annotations_true() {
        let node = node_with("a", &[("gate-one", TRUE), ("gate-two", "running")], &[]);

        assert!(has_all_annotations_true(&node, &[]));
        assert!(has_all_annotations_true(&node, &["gate-one".to_string()]));
        assert!(!has_all_annotations_true(
            &node,
            &["gate-one".to_string(), "gate-two".to_string()]
        ));
        assert!(!has_all_annotations_true(&node, &["missing".to_string()]));
    }

    #[test]
    fn test_phase_labels() {
        let before = node_with("a", &[], &[(labels::BEFORE_REBOOT, TRUE)]);
        assert!(has_before_reboot_label(&before));
        assert!(!has_after_reboot_label(&before));

        let after = node_with("a", &[], &[(labels::AFTER_REBOOT, TRUE)]);
        assert!(has_after_reboot_label(&after));
        assert!(!has_before_reboot_label(&after));
    }
}
