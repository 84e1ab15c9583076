//! Lease-based leader election.
//!
//! Concurrent reconcilers could double-admit reboots, so exactly one
//! replica may run the control loop. Replicas race for a named `Lease`
//! object in the operator namespace; the holder renews it on a fixed
//! period, and a standby takes over once the lease expires. Losing the
//! lease is fatal: the caller is expected to exit the process so a restart
//! re-contests the lock.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::runtime::events::EventType;
use kube::Client;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::{LEADER_ELECTION_LOCK_NAME, LEASE_DURATION, RENEW_DEADLINE, RETRY_PERIOD};
use crate::error::OperatorError;
use crate::events::EventSink;

pub struct LeaderElector {
    api: Api<Lease>,
    namespace: String,
    identity: String,
    events: Arc<dyn EventSink>,
}

impl LeaderElector {
    pub fn new(
        client: Client,
        namespace: &str,
        identity: String,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity,
            events,
        }
    }

    /// Block until this replica holds the lock.
    pub async fn acquire(&self) -> Result<(), OperatorError> {
        info!(
            identity = %self.identity,
            lock = LEADER_ELECTION_LOCK_NAME,
            "campaigning for leadership"
        );

        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "became leader");
                    self.publish(
                        EventType::Normal,
                        "LeaderElected",
                        &format!("{} became leader", self.identity),
                    )
                    .await;

                    return Ok(());
                }
                Ok(false) => debug!("lock is held by another replica, waiting"),
                Err(err) => warn!(error = %err, "leader election attempt failed"),
            }

            tokio::time::sleep(RETRY_PERIOD).await;
        }
    }

    /// One acquisition attempt. `Ok(false)` means another replica holds a
    /// live lease (or won a creation race) and we should retry later.
    async fn try_acquire(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let existing = match self.api.get_opt(LEADER_ELECTION_LOCK_NAME).await? {
            Some(lease) => lease,
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(LEADER_ELECTION_LOCK_NAME.to_string()),
                        ..Default::default()
                    },
                    spec: Some(self.lease_spec(now, now, 0)),
                };

                return match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
                    Err(err) => Err(err),
                };
            }
        };

        let spec = existing.spec.clone().unwrap_or_default();

        if spec.holder_identity.as_deref() == Some(self.identity.as_str()) {
            // Ours already (e.g. a fast restart inside the lease); refresh it.
            return self.replace_spec(existing, self.renewed_spec(&spec, now)).await;
        }

        if !lease_expired(&spec, now) {
            return Ok(false);
        }

        let transitions = spec.lease_transitions.unwrap_or(0) + 1;
        warn!(
            previous = spec.holder_identity.as_deref().unwrap_or("<none>"),
            "taking over an expired leadership lease"
        );

        self.replace_spec(existing, self.lease_spec(now, now, transitions))
            .await
    }

    async fn replace_spec(&self, mut lease: Lease, spec: LeaseSpec) -> Result<bool, kube::Error> {
        lease.spec = Some(spec);

        match self
            .api
            .replace(LEADER_ELECTION_LOCK_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn lease_spec(&self, acquired: DateTime<Utc>, renewed: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            acquire_time: Some(MicroTime(acquired)),
            renew_time: Some(MicroTime(renewed)),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    fn renewed_spec(&self, spec: &LeaseSpec, renewed: DateTime<Utc>) -> LeaseSpec {
        LeaseSpec {
            renew_time: Some(MicroTime(renewed)),
            ..spec.clone()
        }
    }

    /// Renew the lease until leadership is lost.
    ///
    /// The task resolves only on loss: when the lock's holder identity is no
    /// longer ours, or when renewal has kept failing past the renew
    /// deadline. The returned error is meant to terminate the process.
    pub fn spawn_renewer(self: Arc<Self>) -> JoinHandle<OperatorError> {
        tokio::spawn(async move {
            let mut last_renewed = Instant::now();

            loop {
                tokio::time::sleep(RETRY_PERIOD).await;

                match self.renew().await {
                    Ok(()) => {
                        last_renewed = Instant::now();
                        debug!("leadership lease renewed");
                    }
                    Err(err @ OperatorError::LeadershipLost(_)) => {
                        self.announce_loss(&err).await;
                        return err;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to renew leadership lease");

                        if last_renewed.elapsed() >= RENEW_DEADLINE {
                            let err = OperatorError::LeadershipLost(format!(
                                "no successful renewal within {}s",
                                RENEW_DEADLINE.as_secs()
                            ));
                            self.announce_loss(&err).await;
                            return err;
                        }
                    }
                }
            }
        })
    }

    async fn renew(&self) -> Result<(), OperatorError> {
        let mut lease = self.api.get(LEADER_ELECTION_LOCK_NAME).await?;
        let spec = lease.spec.clone().unwrap_or_default();

        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return Err(OperatorError::LeadershipLost(format!(
                "lock is now held by {}",
                spec.holder_identity.as_deref().unwrap_or("<none>")
            )));
        }

        lease.spec = Some(self.renewed_spec(&spec, Utc::now()));
        self.api
            .replace(LEADER_ELECTION_LOCK_NAME, &PostParams::default(), &lease)
            .await?;

        Ok(())
    }

    async fn announce_loss(&self, err: &OperatorError) {
        error!(error = %err, "leadership lost");
        self.publish(EventType::Warning, "LeaderLost", &err.to_string())
            .await;
    }

    async fn publish(&self, type_: EventType, reason: &str, note: &str) {
        let reference = ObjectReference {
            api_version: Some("coordination.k8s.io/v1".to_string()),
            kind: Some("Lease".to_string()),
            name: Some(LEADER_ELECTION_LOCK_NAME.to_string()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        };

        self.events.publish(reference, type_, reason, note).await;
    }
}

/// A lease is expired once its last renewal (or acquisition) is more than
/// its advertised duration in the past. A lease with no timestamps at all
/// is up for grabs.
fn lease_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let last = spec
        .renew_time
        .as_ref()
        .map(|t| t.0)
        .or_else(|| spec.acquire_time.as_ref().map(|t| t.0));

    let duration = spec
        .lease_duration_seconds
        .map(i64::from)
        .unwrap_or(LEASE_DURATION.as_secs() as i64);

    match last {
        Some(timestamp) => timestamp + ChronoDuration::seconds(duration) <= now,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some("other".to_string()),
            renew_time: Some(MicroTime(Utc::now() - ChronoDuration::seconds(renewed_secs_ago))),
            lease_duration_seconds: Some(duration),
            ..Default::default()
        }
    }

    #[test]
    fn test_live_lease_is_not_expired() {
        assert!(!lease_expired(&spec(30, 90), Utc::now()));
    }

    #[test]
    fn test_stale_lease_is_expired() {
        assert!(lease_expired(&spec(120, 90), Utc::now()));
    }

    #[test]
    fn test_empty_lease_is_expired() {
        assert!(lease_expired(&LeaseSpec::default(), Utc::now()));
    }

    #[test]
    fn test_acquire_time_counts_without_renewals() {
        let spec = LeaseSpec {
            holder_identity: Some("other".to_string()),
            acquire_time: Some(MicroTime(Utc::now() - ChronoDuration::seconds(10))),
            lease_duration_seconds: Some(90),
            ..Default::default()
        };

        assert!(!lease_expired(&spec, Utc::now()));
    }
}
