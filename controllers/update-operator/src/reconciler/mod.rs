//! The reboot coordination state machine.
//!
//! One pass walks the full node list through five ordered phases:
//!
//! 1. cleanup: release pre-reboot slots on nodes that changed their mind
//! 2. finish post-reboot checks: acknowledge completed reboots
//! 3. start post-reboot checks: label freshly rebooted nodes
//! 4. finish pre-reboot checks: grant the reboot
//! 5. start pre-reboot checks: admit new candidates up to capacity
//!
//! The order matters: cleanup and the completion phases run before
//! admission so that capacity freed in this pass is available in this pass.
//! Every edit goes through the conflict-retrying mutator, so a pass that
//! fails midway leaves the cluster in a legal intermediate state and the
//! next tick retries from scratch.


use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::events::EventType;
use node_client::{update_node_retry, NodeClient};
use tracing::{debug, info, warn};

use crate::constants::{annotations, labels, FALSE, TRUE};
use crate::error::OperatorError;
use crate::events::{node_reference, EventSink};
use crate::reboot_window::RebootWindow;
use crate::reconcile_helpers::{node_name, remove_annotation, remove_label, set_annotation, set_label};
use crate::selectors;

/// Upper bound on nodes in any in-flight reboot phase at once.
pub const MAX_REBOOTING_NODES: usize = 1;

/// Coordinates per-node reboot lifecycles across the fleet.
pub struct Reconciler {
    nodes: Arc<dyn NodeClient>,
    events: Arc<dyn EventSink>,
    before_reboot_annotations: Vec<String>,
    after_reboot_annotations: Vec<String>,
    reboot_window: Option<RebootWindow>,
}

impl Reconciler {
    pub fn new(
        nodes: Arc<dyn NodeClient>,
        events: Arc<dyn EventSink>,
        before_reboot_annotations: Vec<String>,
        after_reboot_annotations: Vec<String>,
        reboot_window: Option<RebootWindow>,
    ) -> Self {
        Self {
            nodes,
            events,
            before_reboot_annotations,
            after_reboot_annotations,
            reboot_window,
        }
    }

    /// Run one full reconciliation pass.
    pub async fn run_once(&self) -> Result<(), OperatorError> {
        debug!("starting reconciliation pass");

        self.cleanup_state().await?;
        self.finish_after_reboot_checks().await?;
        self.mark_rebooted_nodes().await?;
        self.finish_before_reboot_checks().await?;
        self.mark_rebootable_nodes().await?;

        Ok(())
    }

    /// Phase 1: nodes labelled for pre-reboot checks must still want the
    /// reboot. A pause annotation or a withdrawn request would otherwise
    /// wedge a capacity slot, so the label and any half-finished check
    /// annotations are stripped.
    async fn cleanup_state(&self) -> Result<(), OperatorError> {
        let nodes = self.nodes.list_nodes().await?;

        for node in &nodes {
            if !selectors::has_before_reboot_label(node) || selectors::wants_reboot(node) {
                continue;
            }

            let name = node_name(node);
            warn!(
                node = name,
                "node no longer wants to reboot, releasing its pre-reboot slot"
            );

            update_node_retry(self.nodes.as_ref(), name, |n| {
                // Re-check on the fresh read; the agent may have re-asserted
                // the request while we were deciding.
                if !selectors::has_before_reboot_label(n) || selectors::wants_reboot(n) {
                    return;
                }

                remove_label(n, labels::BEFORE_REBOOT);
                for key in &self.before_reboot_annotations {
                    remove_annotation(n, key);
                }
            })
            .await?;
        }

        Ok(())
    }

    /// Phase 2: a node whose post-reboot gates are all `"true"` is done.
    /// Drop the label, clear the gate annotations and revoke the reboot
    /// permission, returning the node to idle.
    async fn finish_after_reboot_checks(&self) -> Result<(), OperatorError> {
        let nodes = self.nodes.list_nodes().await?;

        for node in nodes.iter().filter(|n| selectors::has_after_reboot_label(n)) {
            if !selectors::has_all_annotations_true(node, &self.after_reboot_annotations) {
                continue;
            }

            let name = node_name(node);
            info!(node = name, "post-reboot checks passed, reboot complete");

            update_node_retry(self.nodes.as_ref(), name, |n| {
                remove_label(n, labels::AFTER_REBOOT);
                for key in &self.after_reboot_annotations {
                    remove_annotation(n, key);
                }
                set_annotation(n, annotations::REBOOT_OK, FALSE);
            })
            .await?;

            self.events
                .publish(
                    node_reference(node),
                    EventType::Normal,
                    "RebootCompleted",
                    "post-reboot checks passed, node returned to service",
                )
                .await;
        }

        Ok(())
    }

    /// Phase 3: nodes whose agent reported a finished reboot enter the
    /// post-reboot check phase. Stale gate annotations are cleared first so
    /// the checks must be freshly asserted for this reboot.
    async fn mark_rebooted_nodes(&self) -> Result<(), OperatorError> {
        let nodes = self.nodes.list_nodes().await?;

        let rebooted: Vec<&Node> = nodes
            .iter()
            .filter(|n| selectors::just_rebooted(n) && !selectors::has_after_reboot_label(n))
            .collect();

        if !rebooted.is_empty() {
            info!(count = rebooted.len(), "found freshly rebooted nodes");
        }

        for node in rebooted {
            let name = node_name(node);
            debug!(node = name, "starting post-reboot checks");

            update_node_retry(self.nodes.as_ref(), name, |n| {
                for key in &self.after_reboot_annotations {
                    remove_annotation(n, key);
                }
                set_label(n, labels::AFTER_REBOOT, TRUE);
            })
            .await?;

            if !self.after_reboot_annotations.is_empty() {
                info!(
                    node = name,
                    gates = ?self.after_reboot_annotations,
                    "waiting for post-reboot gates"
                );
            }
        }

        Ok(())
    }

    /// Phase 4: a node whose pre-reboot gates are all `"true"` gets the
    /// reboot permission. The label comes off in the same write that sets
    /// `reboot-ok=true`, so the agent can never observe the grant while the
    /// node still counts as pre-checking.
    async fn finish_before_reboot_checks(&self) -> Result<(), OperatorError> {
        let nodes = self.nodes.list_nodes().await?;

        for node in nodes.iter().filter(|n| selectors::has_before_reboot_label(n)) {
            if !selectors::has_all_annotations_true(node, &self.before_reboot_annotations) {
                continue;
            }

            let name = node_name(node);
            if selectors::annotation_is(node, annotations::REBOOT_OK, TRUE) {
                // Shouldn't happen under the protocol; the write below is
                // idempotent either way.
                debug!(node = name, "reboot was already approved, refreshing markers");
            }

            info!(node = name, "pre-reboot checks passed, approving reboot");

            update_node_retry(self.nodes.as_ref(), name, |n| {
                remove_label(n, labels::BEFORE_REBOOT);
                for key in &self.before_reboot_annotations {
                    remove_annotation(n, key);
                }
                set_annotation(n, annotations::REBOOT_OK, TRUE);
            })
            .await?;

            self.events
                .publish(
                    node_reference(node),
                    EventType::Normal,
                    "RebootApproved",
                    "pre-reboot checks passed, node may reboot",
                )
                .await;
        }

        Ok(())
    }

    /// Phase 5: admit new candidates. Skipped entirely outside the reboot
    /// window; otherwise the first candidates in list order are labelled for
    /// pre-reboot checks, up to the remaining capacity.
    async fn mark_rebootable_nodes(&self) -> Result<(), OperatorError> {
        if let Some(window) = &self.reboot_window {
            if !window.contains(Utc::now()) {
                debug!("outside the reboot window, not admitting new reboots");
                return Ok(());
            }
        }

        let nodes = self.nodes.list_nodes().await?;
        let capacity = remaining_capacity(&nodes);

        if capacity == 0 {
            for name in in_flight_nodes(&nodes) {
                info!(node = name, "waiting for node to finish rebooting");
            }
            return Ok(());
        }

        let candidates: Vec<&Node> = nodes
            .iter()
            .filter(|n| selectors::wants_reboot(n) && !selectors::has_before_reboot_label(n))
            .collect();

        if candidates.is_empty() {
            return Ok(());
        }

        info!(
            candidates = candidates.len(),
            admitting = capacity.min(candidates.len()),
            "nodes want to reboot"
        );

        for node in candidates.into_iter().take(capacity) {
            let name = node_name(node);
            info!(node = name, "admitting node into the pre-reboot phase");

            update_node_retry(self.nodes.as_ref(), name, |n| {
                // Leftover gate annotations from an earlier cycle must not
                // satisfy this one.
                for key in &self.before_reboot_annotations {
                    remove_annotation(n, key);
                }
                set_label(n, labels::BEFORE_REBOOT, TRUE);
            })
            .await?;

            if !self.before_reboot_annotations.is_empty() {
                info!(
                    node = name,
                    gates = ?self.before_reboot_annotations,
                    "waiting for pre-reboot gates"
                );
            }
        }

        Ok(())
    }
}

/// Names of nodes occupying a reboot slot, each counted once even when it
/// matches several in-flight criteria.
fn in_flight_nodes(nodes: &[Node]) -> BTreeSet<&str> {
    nodes
        .iter()
        .filter(|n| {
            selectors::still_rebooting(n)
                || selectors::has_before_reboot_label(n)
                || selectors::has_after_reboot_label(n)
        })
        .map(|n| node_name(n))
        .collect()
}

/// How many more nodes may enter the reboot pipeline right now.
fn remaining_capacity(nodes: &[Node]) -> usize {
    MAX_REBOOTING_NODES.saturating_sub(in_flight_nodes(nodes).len())
}
