//! Daemon configuration
//!
//! Loaded from a YAML file (default `~/.devlab/config.yaml`). Every section
//! and every field is optional; anything left out takes the default below.
//!
//! ```yaml
//! scheduler:
//!   allocation_ratio: 2
//!   algorithm: weight
//! lifecycle:
//!   enabled: true
//! provisioner:
//!   endpoint: 10.0.0.5:9134
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::node::{NODE_PORT_RANGE_MAX, NODE_PORT_RANGE_MIN};
use crate::registry::SubnetPool;
use crate::scheduler::{Strategy, DEFAULT_ALLOCATION_RATIO};

/// Lease value meaning "never expires": one year
pub const FOREVER_SECS: i64 = 365 * 24 * 3600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Default config file location: ~/.devlab/config.yaml
pub fn default_config_path() -> PathBuf {
    devlab_home().join("config.yaml")
}

/// Default state file location: ~/.devlab/state.json
pub fn default_state_path() -> PathBuf {
    devlab_home().join("state.json")
}

fn devlab_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devlab")
}

/// Expand `~` and `$VAR` in a user supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub workflow: WorkflowConfig,
    pub lifecycle: LifecycleConfig,
    pub supervisor: SupervisorConfig,
    pub network: NetworkConfig,
    pub node: NodeConfig,
    pub provisioner: ProvisionerConfig,
    pub notification: NotificationConfig,
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Oversubscription multiplier applied to node capacity
    pub allocation_ratio: u32,
    pub algorithm: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            allocation_ratio: DEFAULT_ALLOCATION_RATIO as u32,
            algorithm: Strategy::Weight.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Live-status polls before giving up on a new VM
    pub vm_status_retry: u32,
    pub vm_status_interval_secs: u64,
    /// Attempts at installing VM addons
    pub addon_retry: u32,
    /// Delay before re-reading VM status after a power action
    pub post_action_sync_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            vm_status_retry: 50,
            vm_status_interval_secs: 6,
            addon_retry: 3,
            post_action_sync_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// Leases at or above this never age
    pub forever_secs: i64,
    /// Owners are warned while the remaining lease is below this
    pub warning_threshold_secs: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 3600,
            forever_secs: FOREVER_SECS,
            warning_threshold_secs: 6 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// Load average limit as a fraction of the node's cores
    pub limit_cpu: f64,
    pub minimum_mem_mb: i64,
    pub limit_disk_percent: i64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 180,
            limit_cpu: 0.8,
            minimum_mem_mb: 2048,
            limit_disk_percent: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub check_interval_secs: u64,
    /// Only `hostgw` pushes routes
    pub network_type: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            network_type: "hostgw".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub subnet_range: String,
    pub port_range_min: u16,
    pub port_range_max: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            subnet_range: "192.168.0.0/16".to_string(),
            port_range_min: NODE_PORT_RANGE_MIN,
            port_range_max: NODE_PORT_RANGE_MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub protocol: String,
    /// `host:port`
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            endpoint: "127.0.0.1:9134".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub queue_size: usize,
    /// Appended to account names lacking a contact, as `name@domain`
    pub domain: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_size: crate::notify::DEFAULT_QUEUE_SIZE,
            domain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub path: String,
    pub sync_period_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_state_path().to_string_lossy().into_owned(),
            sync_period_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}

impl Config {
    /// Parse and validate config from a YAML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (expand_path(p), true),
            None => (default_config_path(), false),
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.allocation_ratio == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.allocation_ratio must be at least 1".to_string(),
            ));
        }
        self.strategy()?;
        if self.node.port_range_min >= self.node.port_range_max {
            return Err(ConfigError::Invalid(format!(
                "node.port_range_min ({}) must be below node.port_range_max ({})",
                self.node.port_range_min, self.node.port_range_max
            )));
        }
        SubnetPool::from_range(&self.node.subnet_range)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        for (section, secs) in [
            ("lifecycle", self.lifecycle.check_interval_secs),
            ("supervisor", self.supervisor.check_interval_secs),
            ("network", self.network.check_interval_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.check_interval_secs must be at least 1",
                    section
                )));
            }
        }
        Ok(())
    }

    pub fn strategy(&self) -> Result<Strategy, ConfigError> {
        self.scheduler
            .algorithm
            .parse()
            .map_err(ConfigError::Invalid)
    }

    pub fn port_range(&self) -> (u16, u16) {
        (self.node.port_range_min, self.node.port_range_max)
    }

    pub fn state_path(&self) -> PathBuf {
        expand_path(&self.persistence.path)
    }
}

impl LifecycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl SupervisorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl NetworkConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.allocation_ratio, 2);
        assert_eq!(config.workflow.vm_status_retry, 50);
        assert_eq!(config.lifecycle.forever_secs, 31_536_000);
        assert_eq!(config.lifecycle.warning_threshold_secs, 21_600);
        assert!(!config.lifecycle.enabled);
        assert!(config.supervisor.enabled);
        assert_eq!(config.port_range(), (20000, 25000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::parse(
            r#"
scheduler:
  algorithm: random
lifecycle:
  enabled: true
"#,
        )
        .unwrap();

        assert_eq!(config.strategy().unwrap(), Strategy::Random);
        assert_eq!(config.scheduler.allocation_ratio, 2);
        assert!(config.lifecycle.enabled);
        assert_eq!(config.lifecycle.check_interval_secs, 3600);
        assert_eq!(config.provisioner.endpoint, "127.0.0.1:9134");
    }

    #[test]
    fn test_validation_failures() {
        assert!(matches!(
            Config::parse("scheduler:\n  allocation_ratio: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("scheduler:\n  algorithm: bestfit\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("node:\n  port_range_min: 30000\n  port_range_max: 30000\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("node:\n  subnet_range: nonsense\n"),
            Err(ConfigError::Invalid(_))
        ));
        for section in ["lifecycle", "supervisor", "network"] {
            let yaml = format!("{}:\n  check_interval_secs: 0\n", section);
            match Config::parse(&yaml) {
                Err(ConfigError::Invalid(msg)) => assert!(msg.starts_with(section)),
                other => panic!("{} interval 0 accepted: {:?}", section, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            Config::parse("scheduler: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"server:\n  port: 9999\n").unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        assert!(matches!(
            Config::load(Some("/nonexistent/devlab.yaml")),
            Err(ConfigError::Io(_))
        ));
    }
}
