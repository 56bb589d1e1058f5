//! appgrid.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub controller: ControllerConfig,
    pub pods: PodTemplateConfig,
    pub state: StateConfig,
    /// AppService manifests applied to the store at startup.
    pub manifests: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub workers: usize,
    pub resync_interval: String,
    pub retry_base: String,
    pub retry_max: String,
    pub reap_interval: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_interval: "30s".to_string(),
            retry_base: "5ms".to_string(),
            retry_max: "1000s".to_string(),
            reap_interval: "1s".to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.resync_interval)
    }

    pub fn retry_base(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.retry_base)
    }

    pub fn retry_max(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.retry_max)
    }

    pub fn reap_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.reap_interval)
    }
}

/// Shape of the pods the controller creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodTemplateConfig {
    /// Label key bound to the AppService name for pod discovery.
    pub label_key: String,
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub deletion_grace_period_seconds: u64,
}

impl Default for PodTemplateConfig {
    fn default() -> Self {
        Self {
            label_key: "app".to_string(),
            container_name: "busybox".to_string(),
            image: "busybox".to_string(),
            command: vec!["sleep".to_string(), "3600".to_string()],
            deletion_grace_period_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/appgrid"),
        }
    }
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        // Relative manifest paths are resolved against the config file.
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.with_manifests_relative_to(base))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: OperatorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.workers == 0 {
            return Err(ConfigError::Invalid("controller.workers must be at least 1".into()));
        }
        self.controller.resync_interval()?;
        self.controller.reap_interval()?;
        if self.controller.retry_base()? > self.controller.retry_max()? {
            return Err(ConfigError::Invalid(
                "controller.retry_base must not exceed controller.retry_max".into(),
            ));
        }
        if self.pods.label_key.is_empty() {
            return Err(ConfigError::Invalid("pods.label_key must not be empty".into()));
        }
        if self.pods.image.is_empty() {
            return Err(ConfigError::Invalid("pods.image must not be empty".into()));
        }
        Ok(())
    }

    fn with_manifests_relative_to(mut self, base: &Path) -> Self {
        self.manifests = self
            .manifests
            .into_iter()
            .map(|p| if p.is_relative() { base.join(p) } else { p })
            .collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = OperatorConfig::from_toml_str("").unwrap();
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.resync_interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.controller.retry_base().unwrap(), Duration::from_millis(5));
        assert_eq!(config.controller.retry_max().unwrap(), Duration::from_secs(1000));
        assert_eq!(config.pods.label_key, "app");
        assert_eq!(config.pods.deletion_grace_period_seconds, 5);
        assert_eq!(config.pods.command, vec!["sleep", "3600"]);
        assert!(config.manifests.is_empty());
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
manifests = ["apps/web.toml"]

[controller]
workers = 4
resync_interval = "1m"

[pods]
image = "nginx:1.27"
command = []
"#;
        let config = OperatorConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.controller.workers, 4);
        assert_eq!(config.controller.resync_interval().unwrap(), Duration::from_secs(60));
        assert_eq!(config.controller.reap_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(config.pods.image, "nginx:1.27");
        assert!(config.pods.command.is_empty());
        assert_eq!(config.pods.container_name, "busybox");
        assert_eq!(config.manifests, vec![PathBuf::from("apps/web.toml")]);
    }

    #[test]
    fn rejects_bad_values() {
        let err = OperatorConfig::from_toml_str("[controller]\nworkers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err =
            OperatorConfig::from_toml_str("[controller]\nresync_interval = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(_)));

        let err = OperatorConfig::from_toml_str(
            "[controller]\nretry_base = \"10s\"\nretry_max = \"1s\"",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn from_file_resolves_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appgrid.toml");
        std::fs::write(&path, "manifests = [\"web.json\", \"/abs/api.json\"]\n").unwrap();

        let config = OperatorConfig::from_file(&path).unwrap();
        assert_eq!(config.manifests[0], dir.path().join("web.json"));
        assert_eq!(config.manifests[1], PathBuf::from("/abs/api.json"));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = OperatorConfig::from_file(Path::new("/nonexistent/appgrid.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
