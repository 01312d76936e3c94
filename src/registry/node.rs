//! Node resource - a compute host registered to run VMs or containers
//!
//! A Node:
//! - Is admitted by an add request, then installed by the provisioner
//! - Reports static capacity once installed
//! - Tracks reserved capacity in atomic counters
//! - Hands out NAT ports from a fixed range
//!
//! Three independent lock domains live on a node: the `used` counters
//! (atomics), the status/state locks, and the port-map lock. None of them is
//! ever held while acquiring another.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::resources::{Dimension, ResourceCounters, Resources};

/// Default first port handed out for NAT
pub const NODE_PORT_RANGE_MIN: u16 = 20000;

/// Default last port handed out for NAT
pub const NODE_PORT_RANGE_MAX: u16 = 25000;

/// What kind of workload a node hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Hosts virtual machines
    Compute,
    /// Hosts containers
    Container,
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute" => Ok(NodeRole::Compute),
            "container" => Ok(NodeRole::Container),
            other => Err(format!("unknown node role '{}'", other)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Compute => write!(f, "compute"),
            NodeRole::Container => write!(f, "container"),
        }
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    /// Registered, install not started
    #[default]
    Init,
    /// Provisioner install in progress
    Installing,
    /// Installed, waiting for the first health check
    Installed,
    /// Provisioner install failed
    InstallFailed,
    /// Healthy and schedulable
    Ready,
    /// Healthy but over its load/memory/disk limits
    Overload,
    /// Health check failed
    Unhealth,
}

impl NodeStatus {
    /// Whether the node made it past installation
    pub fn is_installed(&self) -> bool {
        !matches!(
            self,
            NodeStatus::Init | NodeStatus::Installing | NodeStatus::InstallFailed
        )
    }
}

/// Administrative state, independent of status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Eligible for scheduling
    #[default]
    Enable,
    /// Excluded from scheduling
    Disable,
}

/// Login credentials for a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Immutable identity of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub credentials: Credentials,
    pub role: NodeRole,
    pub address: String,
    pub subnet: String,
}

/// A registered node
#[derive(Debug)]
pub struct Node {
    spec: NodeSpec,
    os_type: RwLock<String>,
    capacity: ResourceCounters,
    used: ResourceCounters,
    status: RwLock<NodeStatus>,
    state: RwLock<NodeState>,
    ports: Mutex<BTreeMap<u16, String>>,
    port_range: (u16, u16),
}

/// Point-in-time copy of the fields the scheduler and API need
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub role: NodeRole,
    pub address: String,
    pub subnet: String,
    #[serde(rename = "os")]
    pub os_type: String,
    pub status: NodeStatus,
    pub state: NodeState,
    pub capacity: Resources,
    pub used: Resources,
}

/// Serializable form of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(flatten)]
    pub spec: NodeSpec,
    #[serde(rename = "os", default)]
    pub os_type: String,
    pub capacity: Resources,
    pub used: Resources,
    pub status: NodeStatus,
    pub state: NodeState,
    #[serde(rename = "portMap", default)]
    pub ports: BTreeMap<u16, String>,
}

impl Node {
    /// Create a node in `init` status with the default port range
    pub fn new(spec: NodeSpec) -> Self {
        Self::with_port_range(spec, NODE_PORT_RANGE_MIN, NODE_PORT_RANGE_MAX)
    }

    pub fn with_port_range(spec: NodeSpec, min: u16, max: u16) -> Self {
        Self {
            spec,
            os_type: RwLock::new(String::new()),
            capacity: ResourceCounters::default(),
            used: ResourceCounters::default(),
            status: RwLock::new(NodeStatus::Init),
            state: RwLock::new(NodeState::Enable),
            ports: Mutex::new(BTreeMap::new()),
            port_range: (min, max),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn role(&self) -> NodeRole {
        self.spec.role
    }

    pub fn address(&self) -> &str {
        &self.spec.address
    }

    pub fn subnet(&self) -> &str {
        &self.spec.subnet
    }

    pub fn credentials(&self) -> &Credentials {
        &self.spec.credentials
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Record capacity reported by the install step
    pub async fn set_capacity(&self, capacity: Resources, os_type: impl Into<String>) {
        self.capacity.set(capacity);
        *self.os_type.write().await = os_type.into();
    }

    pub fn capacity(&self) -> Resources {
        self.capacity.snapshot()
    }

    pub async fn os_type(&self) -> String {
        self.os_type.read().await.clone()
    }

    /// Adjust reserved capacity on one dimension, returning the new value
    pub fn change_used(&self, dim: Dimension, delta: i64) -> i64 {
        self.used.change(dim, delta)
    }

    pub fn get_used(&self, dim: Dimension) -> i64 {
        self.used.get(dim)
    }

    pub fn reserve(&self, resources: &Resources) {
        self.used.add(resources);
    }

    pub fn release(&self, resources: &Resources) {
        self.used.subtract(resources);
    }

    pub fn used(&self) -> Resources {
        self.used.snapshot()
    }

    // =========================================================================
    // Status / state
    // =========================================================================

    pub async fn status(&self) -> NodeStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: NodeStatus) {
        *self.status.write().await = status;
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: NodeState) {
        *self.state.write().await = state;
    }

    // =========================================================================
    // NAT ports
    // =========================================================================

    /// Reserve the lowest free port in the node's range for `destination`
    ///
    /// Returns `None` once the range is exhausted.
    pub async fn reserve_port(&self, destination: impl Into<String>) -> Option<u16> {
        let mut ports = self.ports.lock().await;
        let (min, max) = self.port_range;
        let port = (min..=max).find(|p| !ports.contains_key(p))?;
        ports.insert(port, destination.into());
        Some(port)
    }

    /// Return a port to the pool
    pub async fn release_port(&self, port: u16) -> Option<String> {
        self.ports.lock().await.remove(&port)
    }

    pub async fn port_map(&self) -> BTreeMap<u16, String> {
        self.ports.lock().await.clone()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.spec.name.clone(),
            role: self.spec.role,
            address: self.spec.address.clone(),
            subnet: self.spec.subnet.clone(),
            os_type: self.os_type().await,
            status: self.status().await,
            state: self.state().await,
            capacity: self.capacity(),
            used: self.used(),
        }
    }

    pub async fn to_record(&self) -> NodeRecord {
        NodeRecord {
            spec: self.spec.clone(),
            os_type: self.os_type().await,
            capacity: self.capacity(),
            used: self.used(),
            status: self.status().await,
            state: self.state().await,
            ports: self.port_map().await,
        }
    }

    pub fn from_record(record: NodeRecord, min: u16, max: u16) -> Self {
        Self {
            spec: record.spec,
            os_type: RwLock::new(record.os_type),
            capacity: ResourceCounters::from_resources(record.capacity),
            used: ResourceCounters::from_resources(record.used),
            status: RwLock::new(record.status),
            state: RwLock::new(record.state),
            ports: Mutex::new(record.ports),
            port_range: (min, max),
        }
    }
}

impl NodeSnapshot {
    /// Ready, enabled and of the wanted role
    pub fn is_eligible(&self, role: NodeRole) -> bool {
        self.role == role && self.state == NodeState::Enable && self.status == NodeStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            credentials: Credentials {
                user: "root".to_string(),
                password: "secret".to_string(),
            },
            role: NodeRole::Compute,
            address: "10.0.0.1".to_string(),
            subnet: "192.168.0.0/24".to_string(),
        }
    }

    #[tokio::test]
    async fn test_new_node_defaults() {
        let node = Node::new(spec("node-1"));

        assert_eq!(node.name(), "node-1");
        assert_eq!(node.status().await, NodeStatus::Init);
        assert_eq!(node.state().await, NodeState::Enable);
        assert_eq!(node.used(), Resources::default());
    }

    #[tokio::test]
    async fn test_reserve_port_skips_taken_ports() {
        let node = Node::with_port_range(spec("node-1"), 20000, 20002);

        let a = node.reserve_port("1.1.1.1:22").await;
        let b = node.reserve_port("1.1.1.2:22").await;
        assert_eq!(a, Some(20000));
        assert_eq!(b, Some(20001));

        let ports = node.port_map().await;
        assert_eq!(ports.get(&20000).map(String::as_str), Some("1.1.1.1:22"));
    }

    #[tokio::test]
    async fn test_reserve_port_exhausted() {
        let node = Node::with_port_range(spec("node-1"), 20000, 20001);

        assert!(node.reserve_port("a").await.is_some());
        assert!(node.reserve_port("b").await.is_some());
        assert_eq!(node.reserve_port("c").await, None);
    }

    #[tokio::test]
    async fn test_released_port_is_assignable_again() {
        let node = Node::with_port_range(spec("node-1"), 20000, 20001);

        let first = node.reserve_port("a").await.unwrap();
        node.reserve_port("b").await.unwrap();
        assert_eq!(node.release_port(first).await.as_deref(), Some("a"));

        assert_eq!(node.reserve_port("c").await, Some(first));
    }

    #[tokio::test]
    async fn test_reserve_port_concurrent_callers_get_distinct_ports() {
        let node = std::sync::Arc::new(Node::with_port_range(spec("node-1"), 20000, 20100));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let n = node.clone();
                tokio::spawn(async move { n.reserve_port(format!("dest-{}", i)).await })
            })
            .collect();

        let mut ports = Vec::new();
        for h in handles {
            ports.push(h.await.unwrap().unwrap());
        }
        ports.sort();
        ports.dedup();
        assert_eq!(ports.len(), 50);
    }

    #[tokio::test]
    async fn test_record_roundtrip_keeps_used_and_ports() {
        let node = Node::new(spec("node-1"));
        node.set_capacity(Resources::new(8, 16384, 200), "centos").await;
        node.reserve(&Resources::new(2, 2048, 30));
        node.reserve_port("10.0.0.5:22").await;
        node.set_status(NodeStatus::Ready).await;

        let restored = Node::from_record(
            node.to_record().await,
            NODE_PORT_RANGE_MIN,
            NODE_PORT_RANGE_MAX,
        );

        assert_eq!(restored.used(), Resources::new(2, 2048, 30));
        assert_eq!(restored.capacity(), Resources::new(8, 16384, 200));
        assert_eq!(restored.status().await, NodeStatus::Ready);
        assert_eq!(restored.port_map().await.len(), 1);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("compute".parse::<NodeRole>(), Ok(NodeRole::Compute));
        assert_eq!("container".parse::<NodeRole>(), Ok(NodeRole::Container));
        assert!("gpu".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_is_installed() {
        assert!(!NodeStatus::Init.is_installed());
        assert!(!NodeStatus::InstallFailed.is_installed());
        assert!(NodeStatus::Installed.is_installed());
        assert!(NodeStatus::Unhealth.is_installed());
    }
}
