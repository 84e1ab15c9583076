//! The annotation/label protocol shared with the per-node agents, plus the
//! operator's fixed tunables.

use std::time::Duration;

/// Operator version, also stamped on the managed agent workload.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Annotation keys on node objects.
///
/// Ownership is split by convention: the operator writes `REBOOT_OK`, the
/// agent writes `REBOOT_NEEDED` and `REBOOT_IN_PROGRESS`, and a human
/// operator may set `REBOOT_PAUSED` to hold a node back.
pub mod annotations {
    pub const REBOOT_OK: &str = "update-operator.io/reboot-ok";
    pub const REBOOT_NEEDED: &str = "update-operator.io/reboot-needed";
    pub const REBOOT_IN_PROGRESS: &str = "update-operator.io/reboot-in-progress";
    pub const REBOOT_PAUSED: &str = "update-operator.io/reboot-paused";
    /// Version stamp on the managed agent workload (not on nodes).
    pub const AGENT_VERSION: &str = "update-operator.io/agent-version";
}

/// Label keys owned by the operator.
pub mod labels {
    /// Node is running its pre-reboot checks.
    pub const BEFORE_REBOOT: &str = "update-operator.io/before-reboot";
    /// Node is running its post-reboot checks.
    pub const AFTER_REBOOT: &str = "update-operator.io/after-reboot";
    /// Node should run the update agent (set by the legacy auto-labeler).
    pub const AGENT_ENABLED: &str = "update-operator.io/agent-enabled";
}

pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

/// Event source component for reconciliation events.
pub const EVENT_SOURCE: &str = "update-operator";
/// Event source component for leader-election events.
pub const LEADER_ELECTION_EVENT_SOURCE: &str = "update-operator-leader-election";

/// Name of the leader-election lock object.
pub const LEADER_ELECTION_LOCK_NAME: &str = "update-operator-lock";

/// How often the reconciliation loop runs a full pass.
pub const RECONCILIATION_PERIOD: Duration = Duration::from_secs(30);

/// Leader-election lease validity.
pub const LEASE_DURATION: Duration = Duration::from_secs(90);
/// Renewal must succeed within this long or leadership is considered lost
/// (two thirds of the lease).
pub const RENEW_DEADLINE: Duration = Duration::from_secs(60);
/// Interval between acquisition/renewal attempts (one third of the lease).
pub const RETRY_PERIOD: Duration = Duration::from_secs(30);

/// Well-known name of the managed agent workload.
pub const AGENT_DAEMONSET_NAME: &str = "update-agent-ds";
/// `app` label value agents are expected to carry.
pub const AGENT_APP_NAME: &str = "update-agent";
/// `managed-by` label value marking objects this operator owns.
pub const MANAGED_BY: &str = "update-operator";
