//! Containerized software on container nodes

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{host_access, Engine, WorkflowError};
use crate::provisioner::{ContainerAction, ContainerActionRequest, ContainerRequest, ContainerStatus};
use crate::registry::software::SoftwareState;
use crate::registry::{Account, NodeRole, Resources, Software, SoftwareKind, SoftwareSpec, SoftwareStatus};

const CPU_RANGE: (i64, i64) = (1, 20);
const MEMORY_RANGE_MB: (i64, i64) = (10, 65536);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareRequest {
    /// Catalogue name, e.g. `redis`
    #[serde(rename = "software")]
    pub kind: String,
    pub version: String,
    pub cpu: i64,
    /// MB
    pub memory: i64,
}

impl SoftwareRequest {
    fn validate(&self) -> Result<SoftwareKind, WorkflowError> {
        let kind = SoftwareKind::from_str(&self.kind).map_err(WorkflowError::Validation)?;
        if self.version.trim().is_empty() {
            return Err(WorkflowError::Validation("version is required".to_string()));
        }
        if self.cpu < CPU_RANGE.0 || self.cpu > CPU_RANGE.1 {
            return Err(WorkflowError::Validation(format!(
                "cpu must be between {} and {}",
                CPU_RANGE.0, CPU_RANGE.1
            )));
        }
        if self.memory < MEMORY_RANGE_MB.0 || self.memory > MEMORY_RANGE_MB.1 {
            return Err(WorkflowError::Validation(format!(
                "memory must be between {} and {} MB",
                MEMORY_RANGE_MB.0, MEMORY_RANGE_MB.1
            )));
        }
        Ok(kind)
    }
}

/// Fold a provisioner container report into software state
///
/// Port mappings like `6379/tcp -> 0.0.0.0:49187` are rewritten against the
/// node address as `6379/tcp -> <node_ip>:49187`. Malformed entries are
/// skipped.
pub fn read_container_status(state: &mut SoftwareState, node_ip: &str, report: &ContainerStatus) {
    if let Some(status) = SoftwareStatus::from_container(&report.status) {
        state.status = status;
    }
    state.address = report.address.clone();

    state.port_mapping.clear();
    for entry in &report.port_mapping {
        let Some((container, host)) = entry.split_once("->") else {
            debug!(entry = %entry, "Skipping malformed port mapping");
            continue;
        };
        let Some((_, port)) = host.trim().rsplit_once(':') else {
            debug!(entry = %entry, "Skipping malformed port mapping");
            continue;
        };
        state
            .port_mapping
            .insert(container.trim().to_string(), format!("{}:{}", node_ip, port));
    }
    state.extra = report.additional_infor.clone();
}

impl Engine {
    pub async fn create_software(
        self: &Arc<Self>,
        account: &Arc<Account>,
        request: SoftwareRequest,
    ) -> Result<Arc<Software>, WorkflowError> {
        let kind = request.validate()?;

        let software = {
            let _create = account.lock_create().await;
            let index = account.last_software_index().await + 1;
            let software = Arc::new(Software::new(SoftwareSpec {
                name: format!("{}-{}-{}", account.name(), kind, index),
                account: account.name().to_string(),
                kind,
                backend: kind.backend().to_string(),
                version: request.version.trim().to_string(),
                cpu: request.cpu,
                memory: request.memory,
            }));
            account.push_software(software.clone()).await;
            software
        };
        self.saver.notify();
        info!(software = %software.name(), "Software creation starting");

        let engine = self.clone();
        let account = account.clone();
        let installing = software.clone();
        self.tasks.spawn("create_software", move |_cancel| async move {
            engine.install_software(&account, &installing).await;
        });

        Ok(software)
    }

    async fn install_software(&self, account: &Account, software: &Software) {
        let _guard = software.lock().await;
        if software.status().await != SoftwareStatus::Init {
            return;
        }

        let spec = software.spec();
        let request = Resources::new(spec.cpu, spec.memory, 0);
        let Some(node) = self
            .scheduler
            .schedule_and_reserve(&self.registry, NodeRole::Container, request)
            .await
        else {
            warn!(software = %software.name(), "No eligible container node");
            software
                .update(|s| s.last_error = Some("no eligible node for placement".to_string()))
                .await;
            self.saver.notify();
            return;
        };

        let node_name = node.name().to_string();
        software
            .update(move |s| {
                s.node = Some(node_name);
                s.status = SoftwareStatus::Scheduled;
            })
            .await;
        software.set_status(SoftwareStatus::Installing).await;
        self.saver.notify();

        let request = ContainerRequest {
            host: host_access(&node),
            name: spec.name.clone(),
            software: spec.kind.to_string(),
            version: spec.version.clone(),
            cpu: spec.cpu,
            memory: format!("{}m", spec.memory),
        };
        match self.provisioner.create_container(&request).await {
            Ok(report) => {
                software
                    .update(|s| read_container_status(s, node.address(), &report))
                    .await;
                info!(software = %software.name(), node = %node.name(), "Software created");
                self.notifier
                    .notify_account(
                        account,
                        format!("Your software {} is created", software.name()),
                    )
                    .await;
            }
            Err(e) => {
                error!(software = %software.name(), "Software install failed: {}", e);
                software
                    .update(|s| {
                        s.status = SoftwareStatus::InstallFailed;
                        s.last_error = Some(e.to_string());
                    })
                    .await;
                self.notifier
                    .notify_account(
                        account,
                        format!("Your software {} failed to install: {}", software.name(), e),
                    )
                    .await;
            }
        }
        self.saver.notify();
    }

    pub async fn action_software(
        &self,
        account: &Account,
        name: &str,
        action: ContainerAction,
    ) -> Result<(), WorkflowError> {
        let _task = self.tasks.guard();
        let software = account
            .software(name)
            .await
            .ok_or_else(|| WorkflowError::NotFound(format!("software '{}'", name)))?;

        let _guard = software.lock().await;
        let result = self.action_software_locked(account, &software, action).await;
        self.saver.notify();
        result
    }

    async fn action_software_locked(
        &self,
        account: &Account,
        software: &Software,
        action: ContainerAction,
    ) -> Result<(), WorkflowError> {
        let state = software.state().await;
        let Some(node_name) = state.node else {
            if action == ContainerAction::Delete {
                account.remove_software(software.name()).await;
                info!(software = %software.name(), "Removed unscheduled software");
                return Ok(());
            }
            return Err(WorkflowError::Conflict(format!(
                "software '{}' is not scheduled",
                software.name()
            )));
        };
        let node = self
            .registry
            .node(&node_name)
            .ok_or_else(|| WorkflowError::NotFound(format!("node '{}'", node_name)))?;

        let spec = software.spec();
        info!(software = %software.name(), %action, "Software action");
        let request = ContainerActionRequest {
            host: host_access(&node),
            name: spec.name.clone(),
            software: spec.kind.to_string(),
            action,
        };
        let report = match self.provisioner.action_container(&request).await {
            Ok(report) => report,
            Err(e) => {
                error!(software = %software.name(), %action, "Software action failed: {}", e);
                software
                    .update(|s| {
                        s.status = SoftwareStatus::Error;
                        s.last_error = Some(e.to_string());
                    })
                    .await;
                self.notifier
                    .notify_account(
                        account,
                        format!("Your software {} {} failed: {}", software.name(), action, e),
                    )
                    .await;
                return Err(e.into());
            }
        };

        match action {
            ContainerAction::Start | ContainerAction::Restart | ContainerAction::Get => {
                software
                    .update(|s| read_container_status(s, node.address(), &report))
                    .await;
            }
            ContainerAction::Stop => {
                software
                    .update(|s| {
                        s.status = SoftwareStatus::Stopped;
                        s.address.clear();
                        s.port_mapping.clear();
                    })
                    .await;
            }
            ContainerAction::Delete => {
                software.set_status(SoftwareStatus::Deleting).await;
                node.release(&Resources::new(spec.cpu, spec.memory, 0));
                account.remove_software(software.name()).await;
                info!(software = %software.name(), "Software deleted");
            }
        }
        Ok(())
    }
}
