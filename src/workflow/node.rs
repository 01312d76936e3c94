//! Node admission and node actions

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{host_access, Engine, WorkflowError};
use crate::provisioner::InstallHostRequest;
use crate::registry::{
    Credentials, Dimension, Node, NodeRole, NodeSpec, NodeState, NodeStatus, Resources,
};

/// Request to register and install a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRequest {
    pub name: String,
    pub user: String,
    pub password: String,
    pub ip: String,
    /// `compute` or `container`
    pub role: String,
}

impl NodeRequest {
    fn validate(&self) -> Result<NodeRole, WorkflowError> {
        for (field, value) in [
            ("name", &self.name),
            ("user", &self.user),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                return Err(WorkflowError::Validation(format!("{} is required", field)));
            }
        }
        if IpAddr::from_str(self.ip.trim()).is_err() {
            return Err(WorkflowError::Validation(format!(
                "'{}' is not an IP address",
                self.ip
            )));
        }
        NodeRole::from_str(&self.role).map_err(WorkflowError::Validation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    Remove,
    Reboot,
    Enable,
    Disable,
}

impl FromStr for NodeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remove" => Ok(NodeAction::Remove),
            "reboot" => Ok(NodeAction::Reboot),
            "enable" => Ok(NodeAction::Enable),
            "disable" => Ok(NodeAction::Disable),
            other => Err(format!("unknown node action '{}'", other)),
        }
    }
}

impl Engine {
    /// Register a node and start installing it
    ///
    /// The node is visible in `init` status as soon as this returns. Install
    /// outcome lands on the node's status.
    pub async fn add_node(self: &Arc<Self>, request: NodeRequest) -> Result<Arc<Node>, WorkflowError> {
        let role = request.validate()?;

        let node = {
            let _admission = self.admission.lock().await;
            if self.registry.contains_node(&request.name) {
                return Err(WorkflowError::Conflict(format!(
                    "node '{}' already registered",
                    request.name
                )));
            }
            let subnet = self
                .subnets
                .allocate(&self.registry.used_subnets())
                .ok_or_else(|| WorkflowError::NoCapacity("subnet pool exhausted".to_string()))?;

            let (min, max) = self.settings.port_range;
            self.registry.add_node(Node::with_port_range(
                NodeSpec {
                    name: request.name.clone(),
                    credentials: Credentials {
                        user: request.user.clone(),
                        password: request.password.clone(),
                    },
                    role,
                    address: request.ip.trim().to_string(),
                    subnet,
                },
                min,
                max,
            ))?
        };
        self.saver.notify();
        info!(node = %node.name(), %role, subnet = %node.subnet(), "Node registered");

        let engine = self.clone();
        let installing = node.clone();
        self.tasks.spawn("install_node", move |_cancel| async move {
            engine.install_node(&installing).await;
        });

        Ok(node)
    }

    async fn install_node(&self, node: &Node) {
        node.set_status(NodeStatus::Installing).await;
        self.saver.notify();

        let request = InstallHostRequest {
            host: host_access(node),
            role: node.role().to_string(),
            action: "install".to_string(),
            subnet: node.subnet().to_string(),
        };
        match self.provisioner.install_host(&request).await {
            Ok(info) => {
                node.set_capacity(Resources::new(info.cpu, info.memory, info.disk), info.os_type)
                    .await;
                node.set_status(NodeStatus::Installed).await;
                info!(
                    node = %node.name(),
                    cpu = info.cpu,
                    memory = info.memory,
                    disk = info.disk,
                    "Node installed"
                );
            }
            Err(e) => {
                error!(node = %node.name(), "Node install failed: {}", e);
                node.set_status(NodeStatus::InstallFailed).await;
            }
        }
        self.saver.notify();
    }

    pub async fn action_node(&self, name: &str, action: NodeAction) -> Result<(), WorkflowError> {
        let _task = self.tasks.guard();
        let node = self
            .registry
            .node(name)
            .ok_or_else(|| WorkflowError::NotFound(format!("node '{}'", name)))?;

        info!(node = %name, ?action, "Node action");
        match action {
            NodeAction::Remove => {
                let _placement = self.scheduler.lock().await;
                if node.get_used(Dimension::Cpu) > 0 {
                    return Err(WorkflowError::Conflict(format!(
                        "node '{}' still hosts workloads",
                        name
                    )));
                }
                self.registry.remove_node(name)?;
            }
            NodeAction::Reboot => self.provisioner.reboot_host(&host_access(&node)).await?,
            NodeAction::Enable => node.set_state(NodeState::Enable).await,
            NodeAction::Disable => node.set_state(NodeState::Disable).await,
        }
        self.saver.notify();
        Ok(())
    }
}
