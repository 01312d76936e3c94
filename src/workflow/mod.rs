//! Workflow engine
//!
//! Drives VMs, nodes, Kubernetes clusters and software through their
//! lifecycles. Each create call validates its request, registers placeholder
//! entities synchronously, then hands the slow part (scheduling, provisioner
//! calls, polling) to a background task. Errors after that hand-off are only
//! visible on the entity itself (`status` / `last_error`) and through account
//! notifications.
//!
//! Lock order, outermost first:
//!
//! 1. engine admission lock (node add only)
//! 2. account create lock
//! 3. entity action lock (VM, cluster, software)
//! 4. scheduler lock
//! 5. node port lock
//!
//! Entity state locks and node status locks are leaves and are never held
//! across an await on anything else.

pub mod account;
pub mod k8s;
pub mod node;
pub mod software;
pub mod tasks;
#[cfg(test)]
pub(crate) mod testing;
pub mod vm;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::notify::Notifier;
use crate::persistence::SaveSignal;
use crate::provisioner::{HostAccess, Provisioner, ProvisionerError};
use crate::registry::{Node, Registry, RegistryError, SubnetPool};
use crate::scheduler::Scheduler;

pub use k8s::K8sRequest;
pub use node::{NodeAction, NodeRequest};
pub use software::{read_container_status, SoftwareRequest};
pub use tasks::{TaskGuard, TaskTracker};
pub use vm::{flavor, VmRequest};

pub use crate::provisioner::{ContainerAction, VmAction};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No capacity: {0}")]
    NoCapacity(String),

    #[error(transparent)]
    Provisioner(#[from] ProvisionerError),
}

impl From<RegistryError> for WorkflowError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NodeNotFound(_) | RegistryError::AccountNotFound(_) => {
                WorkflowError::NotFound(err.to_string())
            }
            RegistryError::InvalidSubnetRange(_) => WorkflowError::Validation(err.to_string()),
            RegistryError::NodeExists(_)
            | RegistryError::AccountExists(_)
            | RegistryError::AccountNotEmpty(_) => WorkflowError::Conflict(err.to_string()),
        }
    }
}

/// Engine tunables, resolved from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub vm_status_retry: u32,
    pub vm_status_interval: Duration,
    pub addon_retry: u32,
    pub post_action_sync: Duration,
    /// Lease assigned to VMs that must never expire
    pub forever_secs: i64,
    pub port_range: (u16, u16),
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vm_status_retry: config.workflow.vm_status_retry.max(1),
            vm_status_interval: Duration::from_secs(config.workflow.vm_status_interval_secs),
            addon_retry: config.workflow.addon_retry.max(1),
            post_action_sync: Duration::from_secs(config.workflow.post_action_sync_secs),
            forever_secs: config.lifecycle.forever_secs,
            port_range: config.port_range(),
        }
    }
}

pub struct Engine {
    registry: Arc<Registry>,
    scheduler: Scheduler,
    provisioner: Arc<dyn Provisioner>,
    notifier: Notifier,
    saver: SaveSignal,
    settings: EngineSettings,
    subnets: SubnetPool,
    /// Serializes subnet allocation with node registration
    admission: Mutex<()>,
    tasks: TaskTracker,
}

impl Engine {
    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        provisioner: Arc<dyn Provisioner>,
        notifier: Notifier,
        saver: SaveSignal,
    ) -> Result<Arc<Self>, WorkflowError> {
        let strategy = config
            .strategy()
            .map_err(|e| WorkflowError::Validation(e.to_string()))?;
        let subnets = SubnetPool::from_range(&config.node.subnet_range)?;

        Ok(Arc::new(Self {
            registry,
            scheduler: Scheduler::new(i64::from(config.scheduler.allocation_ratio), strategy),
            provisioner,
            notifier,
            saver,
            settings: EngineSettings::from_config(config),
            subnets,
            admission: Mutex::new(()),
            tasks: TaskTracker::new(),
        }))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn saver(&self) -> &SaveSignal {
        &self.saver
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Background tasks and synchronous actions currently in flight
    pub fn outstanding_tasks(&self) -> i64 {
        self.tasks.outstanding()
    }
}

/// SSH access to a node in provisioner form
pub(crate) fn host_access(node: &Node) -> HostAccess {
    let credentials = node.credentials();
    HostAccess {
        ip: node.address().to_string(),
        password: credentials.password.clone(),
        user: credentials.user.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_map_onto_taxonomy() {
        assert!(matches!(
            WorkflowError::from(RegistryError::NodeNotFound("n".into())),
            WorkflowError::NotFound(_)
        ));
        assert!(matches!(
            WorkflowError::from(RegistryError::AccountNotEmpty("a".into())),
            WorkflowError::Conflict(_)
        ));
        assert!(matches!(
            WorkflowError::from(RegistryError::InvalidSubnetRange("x".into())),
            WorkflowError::Validation(_)
        ));
    }

    #[test]
    fn test_engine_rejects_bad_subnet_range() {
        let mut config = Config::default();
        config.node.subnet_range = "bogus".to_string();
        let (notifier, _rx) = Notifier::new(8);
        let (saver, _save_rx) = SaveSignal::new();

        let result = Engine::new(
            &config,
            Arc::new(Registry::new()),
            Arc::new(crate::provisioner::mock::MockProvisioner::new()),
            notifier,
            saver,
        );
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }
}
