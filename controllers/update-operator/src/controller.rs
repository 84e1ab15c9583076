//! Operator wiring.
//!
//! Builds the clients, campaigns for leadership, then drives the
//! reconciler on a fixed period until a stop signal arrives or leadership
//! is lost. Losing leadership is fatal by design: the process exits
//! non-zero and the supervisor restarts it to re-contest the lock.

use std::env;
use std::sync::Arc;

use kube::Client;
use node_client::{KubeNodeClient, NodeClient};
use tokio::sync::watch;
use tracing::{error, info};

use crate::agent_workload::AgentWorkload;
use crate::config::Config;
use crate::constants::{
    EVENT_SOURCE, LEADER_ELECTION_EVENT_SOURCE, RECONCILIATION_PERIOD,
};
use crate::error::OperatorError;
use crate::events::KubeEventSink;
use crate::labeler;
use crate::leader::LeaderElector;
use crate::reconciler::Reconciler;

/// Main controller for reboot coordination.
pub struct Controller {
    reconciler: Reconciler,
    leader: Arc<LeaderElector>,
    agent_workload: Option<AgentWorkload>,
    auto_label: bool,
    nodes: Arc<dyn NodeClient>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, OperatorError> {
        info!("initializing update operator");

        let client = Client::try_default().await?;

        let identity = env::var("HOSTNAME").map_err(|_| {
            OperatorError::InvalidConfig(
                "unable to determine leader-election identity: HOSTNAME is not set".to_string(),
            )
        })?;

        let nodes: Arc<dyn NodeClient> = Arc::new(KubeNodeClient::new(client.clone()));

        let reconciler = Reconciler::new(
            nodes.clone(),
            Arc::new(KubeEventSink::new(client.clone(), EVENT_SOURCE)),
            config.before_reboot_annotations.clone(),
            config.after_reboot_annotations.clone(),
            config.reboot_window()?,
        );

        let leader = Arc::new(LeaderElector::new(
            client.clone(),
            &config.namespace,
            identity,
            Arc::new(KubeEventSink::new(
                client.clone(),
                LEADER_ELECTION_EVENT_SOURCE,
            )),
        ));

        let agent_workload = if config.manage_agent && !config.agent_image_repo.is_empty() {
            Some(AgentWorkload::new(
                client,
                &config.namespace,
                config.agent_image_repo.clone(),
            ))
        } else {
            None
        };

        Ok(Self {
            reconciler,
            leader,
            agent_workload,
            auto_label: config.auto_label_container_linux,
            nodes,
        })
    }

    /// Runs the controller until the stop signal fires or leadership is
    /// lost.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<(), OperatorError> {
        self.leader.acquire().await?;
        let mut leadership = self.leader.clone().spawn_renewer();

        if self.auto_label {
            tokio::spawn(labeler::run(self.nodes.clone()));
        }

        // The agent fleet must exist before reboots are coordinated for it.
        if let Some(agent_workload) = &self.agent_workload {
            agent_workload.ensure().await?;
        }

        info!("starting reconciliation loop");
        let mut ticker = tokio::time::interval(RECONCILIATION_PERIOD);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // A pass in progress always runs to completion; the
                    // other branches are only observed between ticks.
                    if let Err(err) = self.reconciler.run_once().await {
                        error!(error = %err, "reconciliation pass failed");
                    }
                }
                lost = &mut leadership => {
                    let err = lost.unwrap_or_else(|join_err| {
                        OperatorError::LeadershipLost(format!(
                            "lease renewal task failed: {join_err}"
                        ))
                    });
                    error!(error = %err, "exiting so a standby replica can take over");
                    return Err(err);
                }
                _ = stop.changed() => {
                    info!("stop signal received, shutting down");
                    return Ok(());
                }
            }
        }
    }
}
