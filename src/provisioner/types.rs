//! Wire types exchanged with the provisioner service
//!
//! Field names follow the provisioner's JSON contract, which mixes
//! `camelCase`, `PascalCase` and `snake_case` depending on the endpoint.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Actions
// ============================================================================

/// Power and lifecycle actions on a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAction {
    Start,
    Shutdown,
    Reboot,
    Delete,
}

impl VmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmAction::Start => "start",
            VmAction::Shutdown => "shutdown",
            VmAction::Reboot => "reboot",
            VmAction::Delete => "delete",
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired presence of a DNAT rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Delete,
    Get,
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Delete => "delete",
            ContainerAction::Get => "get",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Host-level requests
// ============================================================================

/// SSH access to a host, in the `Ip`/`Pass`/`User` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAccess {
    #[serde(rename = "Ip")]
    pub ip: String,
    #[serde(rename = "Pass")]
    pub password: String,
    #[serde(rename = "User")]
    pub user: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallHostRequest {
    #[serde(flatten)]
    pub host: HostAccess,
    #[serde(rename = "Role")]
    pub role: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Subnet")]
    pub subnet: String,
}

/// Capacity reported after a successful install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub disk: i64,
    #[serde(rename = "type", default)]
    pub os_type: String,
}

/// Live resource usage of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostUsage {
    #[serde(default)]
    pub cpu_load: f64,
    /// MB
    #[serde(default)]
    pub memory_avail: i64,
    /// e.g. `"42%"`
    #[serde(default)]
    pub disk_usage: String,
    /// Non-zero when the host's workload engine is unhealthy
    #[serde(default)]
    pub engine_status: i64,
}

impl HostUsage {
    /// Leading integer of `disk_usage`, 0 when unparsable
    pub fn disk_percent(&self) -> i64 {
        let digits: String = self
            .disk_usage
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub subnet: String,
    pub via: String,
}

/// Full route table pushed to every host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteUpdate {
    /// `[ip, user, password]` per host
    #[serde(rename = "Hosts")]
    pub hosts: Vec<[String; 3]>,
    #[serde(rename = "Routes")]
    pub routes: Vec<Route>,
    #[serde(rename = "Action")]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnatRule {
    pub dport: String,
    pub destination: String,
    pub state: RuleState,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnatRequest {
    pub rules: Vec<DnatRule>,
    #[serde(flatten)]
    pub host: HostAccess,
}

// ============================================================================
// VM requests
// ============================================================================

/// Host access in the `hostIp`/`hostPass`/`hostUser` form used by `/vm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmHost {
    #[serde(rename = "hostIp")]
    pub ip: String,
    #[serde(rename = "hostPass")]
    pub password: String,
    #[serde(rename = "hostUser")]
    pub user: String,
}

impl From<&HostAccess> for VmHost {
    fn from(host: &HostAccess) -> Self {
        Self {
            ip: host.ip.clone(),
            password: host.password.clone(),
            user: host.user.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    pub vm_name: String,
    pub vm_hostname: String,
    pub vm_action: String,
    pub vm_memory: i64,
    pub vm_vcpus: i64,
    pub vm_disk: i64,
    pub vm_type: String,
    pub vnc_pass: String,
    pub root_pass: String,
    #[serde(flatten)]
    pub host: VmHost,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmActionRequest {
    pub vm_name: String,
    pub vm_action: VmAction,
    #[serde(flatten)]
    pub host: VmHost,
}

/// Query for `GET /vm`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmQuery {
    pub vm_name: String,
    #[serde(flatten)]
    pub host: VmHost,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmLiveStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// CIDR form, e.g. `10.1.0.5/24`
    #[serde(default)]
    pub address: String,
    #[serde(rename = "vncPort", default)]
    pub vnc_port: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonRequest {
    pub vm_name: String,
    pub address: String,
    pub root_pass: String,
    pub addons: Vec<String>,
}

// ============================================================================
// K8s and container requests
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct K8sInstallRequest {
    #[serde(flatten)]
    pub host: HostAccess,
    #[serde(rename = "Controller")]
    pub controllers: u32,
    #[serde(rename = "Worker")]
    pub workers: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerRequest {
    #[serde(flatten)]
    pub host: HostAccess,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Software")]
    pub software: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Cpu")]
    pub cpu: i64,
    /// e.g. `"512m"`
    #[serde(rename = "Memory")]
    pub memory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerActionRequest {
    #[serde(flatten)]
    pub host: HostAccess,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Software")]
    pub software: String,
    #[serde(rename = "Action")]
    pub action: ContainerAction,
}

/// Container state as reported by the provisioner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub address: String,
    /// e.g. `"50000/tcp -> 0.0.0.0:49187"`
    #[serde(default)]
    pub port_mapping: Vec<String>,
    #[serde(default)]
    pub additional_infor: BTreeMap<String, String>,
}
