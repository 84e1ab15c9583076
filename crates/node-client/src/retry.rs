//! Conflict-retrying node mutation.
//!
//! Every node edit the operator makes goes through [`update_node_retry`]:
//! read the node, apply the caller's transform, attempt to persist, and on a
//! conflicting write re-read and re-apply. Transforms must therefore be
//! idempotent with respect to re-execution on a fresh read.

use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use rand::Rng;
use tracing::debug;

use crate::error::ClientError;
use crate::node_client::NodeClient;

/// Number of persist attempts before giving up on a contended node.
const RETRY_STEPS: u32 = 5;
/// Base delay between attempts.
const RETRY_BASE: Duration = Duration::from_millis(10);
/// Growth factor per attempt (constant delay for node contention).
const RETRY_FACTOR: f64 = 1.0;
/// Fraction of the delay randomized to spread out competing writers.
const RETRY_JITTER: f64 = 0.1;

/// Delay sequence for conflicting node writes: flat at the base delay with
/// a small random spread.
#[derive(Debug, Clone)]
pub struct ConflictBackoff {
    current: Duration,
    factor: f64,
    jitter: f64,
}

impl ConflictBackoff {
    fn new(base: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            current: base,
            factor,
            jitter,
        }
    }

    /// The next delay to sleep, jittered, advancing the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = base.mul_f64(self.factor);

        let spread = self.jitter * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);

        base.mul_f64(1.0 + spread)
    }
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self::new(RETRY_BASE, RETRY_FACTOR, RETRY_JITTER)
    }
}

/// Re-read `name`, apply `mutate`, and persist, retrying conflicts.
///
/// Exactly one persisted version of the node incorporates the transform, or
/// an error is returned: non-conflict errors immediately, and conflict
/// exhaustion as the last conflict seen.
pub async fn update_node_retry<F>(
    client: &dyn NodeClient,
    name: &str,
    mutate: F,
) -> Result<Node, ClientError>
where
    F: Fn(&mut Node) + Send + Sync,
{
    let mut backoff = ConflictBackoff::default();
    let mut last_conflict = None;

    for attempt in 0..RETRY_STEPS {
        if attempt > 0 {
            tokio::time::sleep(backoff.next_delay()).await;
        }

        let mut node = client.get_node(name).await?;
        mutate(&mut node);

        match client.replace_node(&node).await {
            Ok(updated) => return Ok(updated),
            Err(err @ ClientError::Conflict(_)) => {
                debug!(node = name, attempt, "conflicting node write, retrying");
                last_conflict = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_conflict.unwrap_or_else(|| ClientError::Conflict(name.to_string())))
}
