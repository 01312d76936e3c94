//! Kubernetes cluster resource
//!
//! A cluster is backed by exactly one host VM that runs the control and data
//! plane bootstrap. Every status change is appended to `conditions` so the
//! path a cluster took is visible after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Default number of controller nodes
pub const DEFAULT_CONTROLLERS: u32 = 1;

/// Default number of worker nodes
pub const DEFAULT_WORKERS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum K8sStatus {
    #[default]
    Init,
    BootingVm,
    BootVmFailed,
    Installing,
    InstallFailed,
    Running,
    Deleting,
}

/// One observed status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sCondition {
    pub status: K8sStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sSpec {
    pub name: String,
    pub account: String,
    pub version: String,
    pub controllers: u32,
    pub workers: u32,
    /// Lease in seconds; clusters are created with the "forever" lease
    #[serde(default)]
    pub lifetime: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K8sState {
    pub status: K8sStatus,
    #[serde(rename = "lastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Name of the backing VM once launched
    #[serde(rename = "hostVm", default)]
    pub host_vm: Option<String>,
    #[serde(default)]
    pub conditions: Vec<K8sCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sRecord {
    #[serde(flatten)]
    pub spec: K8sSpec,
    pub state: K8sState,
}

#[derive(Debug)]
pub struct K8sCluster {
    spec: K8sSpec,
    state: RwLock<K8sState>,
    action: Mutex<()>,
}

impl K8sCluster {
    pub fn new(spec: K8sSpec) -> Self {
        let state = K8sState {
            conditions: vec![K8sCondition {
                status: K8sStatus::Init,
                at: Utc::now(),
            }],
            ..Default::default()
        };
        Self {
            spec,
            state: RwLock::new(state),
            action: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &K8sSpec {
        &self.spec
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.action.lock().await
    }

    pub async fn state(&self) -> K8sState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> K8sStatus {
        self.state.read().await.status
    }

    pub async fn set_status(&self, status: K8sStatus) {
        let mut state = self.state.write().await;
        state.status = status;
        state.conditions.push(K8sCondition {
            status,
            at: Utc::now(),
        });
    }

    /// Move to a failure status and remember why
    pub async fn fail(&self, status: K8sStatus, err: impl ToString) {
        self.set_status(status).await;
        self.state.write().await.last_error = Some(err.to_string());
    }

    pub async fn set_host_vm(&self, vm: Option<String>) {
        self.state.write().await.host_vm = vm;
    }

    pub async fn host_vm(&self) -> Option<String> {
        self.state.read().await.host_vm.clone()
    }

    /// Statuses in the order they were entered
    pub async fn history(&self) -> Vec<K8sStatus> {
        self.state
            .read()
            .await
            .conditions
            .iter()
            .map(|c| c.status)
            .collect()
    }

    pub async fn to_record(&self) -> K8sRecord {
        K8sRecord {
            spec: self.spec.clone(),
            state: self.state().await,
        }
    }

    pub fn from_record(record: K8sRecord) -> Self {
        Self {
            spec: record.spec,
            state: RwLock::new(record.state),
            action: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> K8sCluster {
        K8sCluster::new(K8sSpec {
            name: "alice-k8s-1".to_string(),
            account: "alice".to_string(),
            version: "1.29".to_string(),
            controllers: DEFAULT_CONTROLLERS,
            workers: DEFAULT_WORKERS,
            lifetime: 31_536_000,
        })
    }

    #[tokio::test]
    async fn test_history_records_transitions() {
        let cluster = cluster();
        cluster.set_status(K8sStatus::BootingVm).await;
        cluster.fail(K8sStatus::BootVmFailed, "no ip").await;

        assert_eq!(
            cluster.history().await,
            vec![K8sStatus::Init, K8sStatus::BootingVm, K8sStatus::BootVmFailed]
        );
        assert_eq!(cluster.state().await.last_error.as_deref(), Some("no ip"));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&K8sStatus::BootVmFailed).unwrap(),
            "\"bootVmFailed\""
        );
    }
}
