//! Version-gated management of the per-node agent workload.
//!
//! Legacy path, enabled by configuration: at startup the operator ensures
//! that exactly one agent DaemonSet it manages exists in its namespace and
//! that the workload is at least as new as the operator itself. Rolling the
//! workload is a delete-and-recreate; the versioned pod selector keeps a
//! replaced generation from adopting the previous one's pods.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::Client;
use semver::Version;
use tracing::info;

use crate::constants::{
    annotations, AGENT_APP_NAME, AGENT_DAEMONSET_NAME, MANAGED_BY, VERSION,
};
use crate::error::OperatorError;

pub struct AgentWorkload {
    api: Api<DaemonSet>,
    image_repo: String,
}

impl AgentWorkload {
    pub fn new(client: Client, namespace: &str, image_repo: String) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            image_repo,
        }
    }

    /// Ensure the managed agent workload exists and is current.
    pub async fn ensure(&self) -> Result<(), OperatorError> {
        let operator_version = Version::parse(VERSION)
            .map_err(|err| OperatorError::InvalidAgentVersion(format!("{VERSION:?}: {err}")))?;

        let selector = managed_labels()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");

        let existing = self
            .api
            .list(&ListParams::default().labels(&selector))
            .await?
            .items;

        match existing.as_slice() {
            [] => {
                info!(name = AGENT_DAEMONSET_NAME, "creating agent workload");
                self.create().await
            }
            [workload] => {
                if !workload_is_stale(workload, &operator_version)? {
                    return Ok(());
                }

                info!(
                    name = AGENT_DAEMONSET_NAME,
                    operator_version = VERSION,
                    "agent workload is outdated, replacing it"
                );

                let cascade = DeleteParams {
                    propagation_policy: Some(PropagationPolicy::Foreground),
                    ..Default::default()
                };
                let name = workload.metadata.name.as_deref().unwrap_or(AGENT_DAEMONSET_NAME);
                self.api.delete(name, &cascade).await?;

                self.create().await
            }
            many => Err(OperatorError::ConflictingAgentWorkloads(many.len())),
        }
    }

    async fn create(&self) -> Result<(), OperatorError> {
        self.api
            .create(&PostParams::default(), &agent_daemonset(&self.image_repo))
            .await?;

        Ok(())
    }
}

/// True when the workload's version annotation parses as a semantic version
/// strictly older than the operator's. A missing or unparseable annotation
/// is a hard error.
fn workload_is_stale(workload: &DaemonSet, operator_version: &Version) -> Result<bool, OperatorError> {
    let raw = workload
        .metadata
        .annotations
        .as_ref()
        .and_then(|set| set.get(annotations::AGENT_VERSION))
        .ok_or_else(|| {
            OperatorError::InvalidAgentVersion(
                "managed workload has no version annotation".to_string(),
            )
        })?;

    let workload_version = Version::parse(raw)
        .map_err(|err| OperatorError::InvalidAgentVersion(format!("{raw:?}: {err}")))?;

    Ok(workload_version < *operator_version)
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("managed-by".to_string(), MANAGED_BY.to_string()),
        ("app".to_string(), AGENT_APP_NAME.to_string()),
    ])
}

fn version_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([(annotations::AGENT_VERSION.to_string(), VERSION.to_string())])
}

/// The agent daemonset: one pod per node, told which node it owns and which
/// namespace to coordinate through via the downward API.
fn agent_daemonset(image_repo: &str) -> DaemonSet {
    // The agent's version participates in the selector so each generation
    // only matches its own pods.
    let mut versioned_selector = managed_labels();
    versioned_selector.insert(annotations::AGENT_VERSION.to_string(), VERSION.to_string());

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(AGENT_DAEMONSET_NAME.to_string()),
            labels: Some(managed_labels()),
            annotations: Some(version_annotations()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(versioned_selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(AGENT_APP_NAME.to_string()),
                    labels: Some(versioned_selector),
                    annotations: Some(version_annotations()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    // Control-plane nodes update too.
                    tolerations: Some(vec![Toleration {
                        key: Some("node-role.kubernetes.io/control-plane".to_string()),
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
                    containers: vec![Container {
                        name: AGENT_APP_NAME.to_string(),
                        image: Some(format!("{image_repo}:v{VERSION}")),
                        command: Some(vec!["/bin/update-agent".to_string()]),
                        env: Some(vec![
                            field_ref_env("UPDATE_AGENT_NODE", "spec.nodeName"),
                            field_ref_env("POD_NAMESPACE", "metadata.namespace"),
                        ]),
                        volume_mounts: Some(vec![
                            VolumeMount {
                                name: "var-run-dbus".to_string(),
                                mount_path: "/var/run/dbus".to_string(),
                                ..Default::default()
                            },
                            VolumeMount {
                                name: "etc-os-release".to_string(),
                                mount_path: "/etc/os-release".to_string(),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![
                        host_path_volume("var-run-dbus", "/var/run/dbus"),
                        host_path_volume("etc-os-release", "/etc/os-release"),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(version_annotation: Option<&str>) -> DaemonSet {
        let mut workload = DaemonSet {
            metadata: ObjectMeta {
                name: Some(AGENT_DAEMONSET_NAME.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(version) = version_annotation {
            workload.metadata.annotations = Some(BTreeMap::from([(
                annotations::AGENT_VERSION.to_string(),
                version.to_string(),
            )]));
        }

        workload
    }

    #[test]
    fn test_missing_version_annotation_is_an_error() {
        let current = Version::parse("1.2.3").unwrap();
        assert!(matches!(
            workload_is_stale(&workload(None), &current),
            Err(OperatorError::InvalidAgentVersion(_))
        ));
    }

    #[test]
    fn test_unparseable_version_annotation_is_an_error() {
        let current = Version::parse("1.2.3").unwrap();
        assert!(matches!(
            workload_is_stale(&workload(Some("latest")), &current),
            Err(OperatorError::InvalidAgentVersion(_))
        ));
    }

    #[test]
    fn test_only_strictly_older_workloads_are_stale() {
        let current = Version::parse("1.2.3").unwrap();

        assert!(workload_is_stale(&workload(Some("1.2.2")), &current).unwrap());
        assert!(!workload_is_stale(&workload(Some("1.2.3")), &current).unwrap());
        // Newer agents are assumed backwards compatible.
        assert!(!workload_is_stale(&workload(Some("2.0.0")), &current).unwrap());
    }

    #[test]
    fn test_daemonset_advertises_node_and_namespace() {
        let workload = agent_daemonset("registry.example.com/update-agent");

        let pod = workload.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        let names: Vec<_> = env.iter().map(|var| var.name.as_str()).collect();

        assert!(names.contains(&"UPDATE_AGENT_NODE"));
        assert!(names.contains(&"POD_NAMESPACE"));
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some(format!("registry.example.com/update-agent:v{VERSION}").as_str())
        );
    }
}
