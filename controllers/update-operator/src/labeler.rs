//! Legacy auto-labeler.
//!
//! Opts Container Linux nodes into running the update agent by setting the
//! agent-enabled label the daemonset node-selects on. Clusters created
//! before the label existed, and autoscaling groups that add unlabelled
//! nodes later, rely on this. The task runs alongside the reconcile loop
//! and touches only the enablement label.

use std::sync::Arc;

use node_client::{update_node_retry, NodeClient};
use tracing::{debug, info, warn};

use crate::constants::{labels, RECONCILIATION_PERIOD, TRUE};
use crate::reconcile_helpers::{node_name, set_label};
use crate::selectors;

/// Run labeling passes forever on the reconciliation period.
pub async fn run(nodes: Arc<dyn NodeClient>) {
    debug!("starting Container Linux node auto-labeler");

    let mut ticker = tokio::time::interval(RECONCILIATION_PERIOD);

    loop {
        ticker.tick().await;

        if let Err(err) = label_nodes(nodes.as_ref()).await {
            warn!(error = %err, "auto-label pass failed");
        }
    }
}

async fn label_nodes(nodes: &dyn NodeClient) -> Result<(), node_client::ClientError> {
    let list = nodes.list_nodes().await?;

    let unlabelled = list
        .iter()
        .filter(|n| selectors::is_container_linux(n) && !selectors::has_agent_enabled_label(n));

    for node in unlabelled {
        let name = node_name(node);
        info!(node = name, "labeling node to run the update agent");

        // A failed node doesn't block labeling the rest.
        if let Err(err) = update_node_retry(nodes, name, |n| {
            set_label(n, labels::AGENT_ENABLED, TRUE);
        })
        .await
        {
            warn!(node = name, error = %err, "failed to label node");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeStatus, NodeSystemInfo};
    use node_client::MockNodeClient;

    use crate::test_utils::{has_label, node};

    fn node_with_os(name: &str, os_image: &str) -> k8s_openapi::api::core::v1::Node {
        let mut node = node(name);
        node.status = Some(NodeStatus {
            node_info: Some(NodeSystemInfo {
                os_image: os_image.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        node
    }

    #[tokio::test]
    async fn test_labels_only_container_linux_nodes() {
        let client = MockNodeClient::new();
        client.insert(node_with_os("cl-node", "Flatcar Container Linux by Kinvolk 3510.2.1"));
        client.insert(node_with_os("other-node", "Ubuntu 22.04.3 LTS"));

        label_nodes(&client).await.unwrap();

        assert!(has_label(
            &client.node("cl-node").unwrap(),
            labels::AGENT_ENABLED
        ));
        assert!(!has_label(
            &client.node("other-node").unwrap(),
            labels::AGENT_ENABLED
        ));
    }

    #[tokio::test]
    async fn test_existing_label_is_left_alone() {
        let client = MockNodeClient::new();
        let mut opted_out = node_with_os("cl-node", "Container Linux by CoreOS 2512.3.0");
        opted_out
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(labels::AGENT_ENABLED.to_string(), "false".to_string());
        client.insert(opted_out);

        label_nodes(&client).await.unwrap();

        let stored = client.node("cl-node").unwrap();
        assert_eq!(
            stored
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(labels::AGENT_ENABLED))
                .map(String::as_str),
            Some("false")
        );
    }
}
