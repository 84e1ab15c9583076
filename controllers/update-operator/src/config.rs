//! Operator configuration.
//!
//! All options come from environment variables so the deployment manifest
//! stays the single source of truth. Anything invalid is fatal before
//! leader election starts.

use std::env;

use crate::error::OperatorError;
use crate::reboot_window::RebootWindow;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Namespace the operator runs in; locks and the agent workload are
    /// created here.
    pub namespace: String,
    /// Annotation keys that must all be `"true"` before a reboot is granted.
    pub before_reboot_annotations: Vec<String>,
    /// Annotation keys that must all be `"true"` before a reboot is
    /// considered finished.
    pub after_reboot_annotations: Vec<String>,
    /// Recurring admission window; both empty means always open.
    pub reboot_window_start: String,
    pub reboot_window_length: String,
    /// Label Container Linux nodes so the agent daemonset schedules on them.
    pub auto_label_container_linux: bool,
    /// Manage the agent workload from inside the operator (legacy path).
    pub manage_agent: bool,
    pub agent_image_repo: String,
}

impl Config {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self, OperatorError> {
        let namespace = env::var("POD_NAMESPACE").ok().filter(|v| !v.is_empty()).ok_or_else(|| {
            OperatorError::InvalidConfig(
                "unable to determine operator namespace: please ensure the POD_NAMESPACE \
                 environment variable is set"
                    .to_string(),
            )
        })?;

        let config = Self {
            namespace,
            before_reboot_annotations: csv_list(&env_or_default("BEFORE_REBOOT_ANNOTATIONS")),
            after_reboot_annotations: csv_list(&env_or_default("AFTER_REBOOT_ANNOTATIONS")),
            reboot_window_start: env_or_default("REBOOT_WINDOW_START"),
            reboot_window_length: env_or_default("REBOOT_WINDOW_LENGTH"),
            auto_label_container_linux: env_flag("AUTO_LABEL_CONTAINER_LINUX"),
            manage_agent: env_flag("MANAGE_AGENT"),
            agent_image_repo: env_or_default("AGENT_IMAGE_REPO"),
        };

        // Surface a bad window now rather than on the first admission.
        config.reboot_window()?;

        Ok(config)
    }

    /// The parsed admission window, or `None` when always open.
    pub fn reboot_window(&self) -> Result<Option<RebootWindow>, OperatorError> {
        match (
            self.reboot_window_start.is_empty(),
            self.reboot_window_length.is_empty(),
        ) {
            (true, true) => Ok(None),
            (false, false) => {
                RebootWindow::parse(&self.reboot_window_start, &self.reboot_window_length).map(Some)
            }
            _ => Err(OperatorError::InvalidConfig(
                "reboot window start and length must be configured together".to_string(),
            )),
        }
    }
}

fn env_or_default(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|value| value == "true").unwrap_or(false)
}

fn csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_list() {
        assert!(csv_list("").is_empty());
        assert_eq!(csv_list("one"), vec!["one"]);
        assert_eq!(
            csv_list("one, two ,,three"),
            vec!["one", "two", "three"]
        );
    }

    #[test]
    fn test_window_requires_both_halves() {
        let config = Config {
            reboot_window_start: "23:00".to_string(),
            ..Default::default()
        };
        assert!(config.reboot_window().is_err());

        let config = Config {
            reboot_window_length: "1h".to_string(),
            ..Default::default()
        };
        assert!(config.reboot_window().is_err());

        let config = Config::default();
        assert!(config.reboot_window().unwrap().is_none());

        let config = Config {
            reboot_window_start: "Thu 23:00".to_string(),
            reboot_window_length: "1h".to_string(),
            ..Default::default()
        };
        assert!(config.reboot_window().unwrap().is_some());
    }
}
