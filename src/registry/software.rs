//! Containerized software resource

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Software kinds the provisioner knows how to run
pub const CATALOGUE: &[SoftwareKind] = &[
    SoftwareKind::Jenkins,
    SoftwareKind::Mysql,
    SoftwareKind::Postgres,
    SoftwareKind::Mongodb,
    SoftwareKind::Redis,
    SoftwareKind::Influxdb,
    SoftwareKind::Prometheus,
    SoftwareKind::Grafana,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftwareKind {
    Jenkins,
    Mysql,
    Postgres,
    Mongodb,
    Redis,
    Influxdb,
    Prometheus,
    Grafana,
}

impl SoftwareKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoftwareKind::Jenkins => "jenkins",
            SoftwareKind::Mysql => "mysql",
            SoftwareKind::Postgres => "postgres",
            SoftwareKind::Mongodb => "mongodb",
            SoftwareKind::Redis => "redis",
            SoftwareKind::Influxdb => "influxdb",
            SoftwareKind::Prometheus => "prometheus",
            SoftwareKind::Grafana => "grafana",
        }
    }

    /// Runtime backend used to host this kind
    pub fn backend(&self) -> &'static str {
        "container"
    }
}

impl FromStr for SoftwareKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATALOGUE
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unsupported software '{}'", s))
    }
}

impl fmt::Display for SoftwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SoftwareStatus {
    #[default]
    Init,
    Scheduled,
    Installing,
    InstallFailed,
    Running,
    Stopped,
    Deleting,
    NotFound,
    Error,
    Unknown,
}

impl SoftwareStatus {
    /// Map a provisioner container status onto a software status
    ///
    /// An empty string means the provisioner had nothing to report.
    pub fn from_container(status: &str) -> Option<Self> {
        let status = match status.to_ascii_lowercase().as_str() {
            "" => return None,
            "running" => SoftwareStatus::Running,
            "stopped" | "exited" => SoftwareStatus::Stopped,
            "deleted" => SoftwareStatus::NotFound,
            "unknown" => SoftwareStatus::Unknown,
            _ => SoftwareStatus::Error,
        };
        Some(status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftwareSpec {
    pub name: String,
    pub account: String,
    pub kind: SoftwareKind,
    pub backend: String,
    pub version: String,
    pub cpu: i64,
    /// MB
    pub memory: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoftwareState {
    pub status: SoftwareStatus,
    #[serde(rename = "lastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub address: String,
    /// Container port/protocol -> node address
    #[serde(rename = "portMapping", default)]
    pub port_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftwareRecord {
    #[serde(flatten)]
    pub spec: SoftwareSpec,
    pub state: SoftwareState,
}

#[derive(Debug)]
pub struct Software {
    spec: SoftwareSpec,
    state: RwLock<SoftwareState>,
    action: Mutex<()>,
}

impl Software {
    pub fn new(spec: SoftwareSpec) -> Self {
        Self {
            spec,
            state: RwLock::new(SoftwareState::default()),
            action: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &SoftwareSpec {
        &self.spec
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.action.lock().await
    }

    pub async fn state(&self) -> SoftwareState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> SoftwareStatus {
        self.state.read().await.status
    }

    pub async fn set_status(&self, status: SoftwareStatus) {
        self.state.write().await.status = status;
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut SoftwareState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    pub async fn to_record(&self) -> SoftwareRecord {
        SoftwareRecord {
            spec: self.spec.clone(),
            state: self.state().await,
        }
    }

    pub fn from_record(record: SoftwareRecord) -> Self {
        Self {
            spec: record.spec,
            state: RwLock::new(record.state),
            action: Mutex::new(()),
        }
    }
}
