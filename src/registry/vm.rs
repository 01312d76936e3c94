//! Virtual machine resource

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::resources::Resources;

/// VM lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    #[default]
    Init,
    Scheduled,
    Creating,
    Running,
    Stopped,
    Unknown,
    Error,
    Deleting,
    Deleted,
}

impl VmStatus {
    /// Map a provisioner status string onto a VM status
    pub fn from_live(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "running" => VmStatus::Running,
            "shutoff" | "stopped" | "shut off" => VmStatus::Stopped,
            _ => VmStatus::Unknown,
        }
    }

    /// Deleting or already gone
    pub fn is_terminating(&self) -> bool {
        matches!(self, VmStatus::Deleting | VmStatus::Deleted)
    }
}

/// A NAT rule target for one exposed VM port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    #[serde(rename = "nodePort")]
    pub node_port: u16,
    pub protocol: String,
}

/// Fields fixed at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub account: String,
    pub hostname: String,
    #[serde(flatten)]
    pub resources: Resources,
    #[serde(rename = "rootPass")]
    pub root_password: String,
    #[serde(rename = "vncPass")]
    pub vnc_password: String,
    /// Guest OS image, e.g. `centos7`
    #[serde(rename = "type", default)]
    pub os_type: String,
    #[serde(default)]
    pub addons: Vec<String>,
}

/// Fields mutated by the VM pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmState {
    pub status: VmStatus,
    #[serde(rename = "lastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(rename = "vncPort", default)]
    pub vnc_port: String,
    /// VM port -> node NAT port
    #[serde(rename = "portMap", default)]
    pub ports: BTreeMap<u16, PortMapping>,
    /// Node capacity is still held for this VM
    #[serde(rename = "reserved", default)]
    pub capacity_reserved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    #[serde(flatten)]
    pub spec: VmSpec,
    pub state: VmState,
    /// Remaining lease in seconds
    pub lifetime: i64,
}

/// A virtual machine owned by an account
///
/// `action` serializes pipeline steps on this VM and may be held across
/// provisioner calls. `state` is only ever held for short reads and writes,
/// so readers never queue behind a slow provisioner.
#[derive(Debug)]
pub struct VirtualMachine {
    spec: VmSpec,
    state: RwLock<VmState>,
    lifetime: AtomicI64,
    action: Mutex<()>,
}

impl VirtualMachine {
    pub fn new(spec: VmSpec, lifetime_secs: i64) -> Self {
        Self {
            spec,
            state: RwLock::new(VmState::default()),
            lifetime: AtomicI64::new(lifetime_secs),
            action: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &VmSpec {
        &self.spec
    }

    pub fn resources(&self) -> Resources {
        self.spec.resources
    }

    /// Serialize actions on this VM
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.action.lock().await
    }

    pub async fn state(&self) -> VmState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> VmStatus {
        self.state.read().await.status
    }

    pub async fn set_status(&self, status: VmStatus) {
        self.state.write().await.status = status;
    }

    /// Record a failure without leaving the current status
    pub async fn set_error(&self, err: impl ToString) {
        self.state.write().await.last_error = Some(err.to_string());
    }

    /// Mark the VM failed with a diagnostic message
    pub async fn fail(&self, err: impl ToString) {
        let mut state = self.state.write().await;
        state.status = VmStatus::Error;
        state.last_error = Some(err.to_string());
    }

    /// Apply a closure to the mutable state
    pub async fn update<R>(&self, f: impl FnOnce(&mut VmState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    pub fn lifetime(&self) -> i64 {
        self.lifetime.load(Ordering::SeqCst)
    }

    /// Add `delta` seconds to the remaining lease, returning the new value
    pub fn extend_lifetime(&self, delta: i64) -> i64 {
        self.lifetime.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub async fn to_record(&self) -> VmRecord {
        VmRecord {
            spec: self.spec.clone(),
            state: self.state().await,
            lifetime: self.lifetime(),
        }
    }

    pub fn from_record(record: VmRecord) -> Self {
        Self {
            spec: record.spec,
            state: RwLock::new(record.state),
            lifetime: AtomicI64::new(record.lifetime),
            action: Mutex::new(()),
        }
    }
}
