//! Update operator
//!
//! Controller half of the two-sided reboot coordinator for clusters whose
//! nodes run an auto-updating OS. Per-node agents announce staged updates
//! through node annotations; this operator serializes the resulting
//! reboots: at most a bounded number of nodes reboot at a time, only inside
//! the configured reboot window, and only once the operator-configured
//! pre- and post-reboot health gates are satisfied.

mod agent_workload;
mod config;
mod constants;
mod controller;
mod error;
mod events;
mod labeler;
mod leader;
mod reboot_window;
mod reconcile_helpers;
mod reconciler;
mod selectors;
#[cfg(test)]
mod test_utils;

use tracing::info;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::OperatorError;

#[tokio::main]
async fn main() -> Result<(), OperatorError> {
    tracing_subscriber::fmt::init();

    info!(version = constants::VERSION, "starting update operator");

    let config = Config::from_env()?;
    info!(
        namespace = %config.namespace,
        before_reboot_gates = config.before_reboot_annotations.len(),
        after_reboot_gates = config.after_reboot_annotations.len(),
        "configuration loaded"
    );

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        // Handle CTRL^C / SIGINT as gracefully as we can.
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    let controller = Controller::new(config).await?;
    controller.run(stop_rx).await
}
