//! Kubernetes cluster bootstrap
//!
//! A cluster gets one host VM with a forever lease. Once the VM is reachable
//! over SSH the provisioner installs the cluster on it. A cluster that fails
//! to boot its VM never leaves the VM behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::vm::{parse_vm_ip, VmRequest};
use super::{Engine, WorkflowError};
use crate::provisioner::{HostAccess, K8sInstallRequest};
use crate::registry::k8s::{DEFAULT_CONTROLLERS, DEFAULT_WORKERS};
use crate::registry::{Account, K8sCluster, K8sSpec, K8sStatus, VirtualMachine};

const MAX_CONTROLLERS: u32 = 5;
const MAX_WORKERS: u32 = 100;

/// OS image for cluster host VMs
const HOST_VM_TYPE: &str = "centos7";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sRequest {
    pub version: String,
    pub controllers: Option<u32>,
    pub workers: Option<u32>,
}

impl K8sRequest {
    fn validate(&self) -> Result<(u32, u32), WorkflowError> {
        if self.version.trim().is_empty() {
            return Err(WorkflowError::Validation("version is required".to_string()));
        }
        let controllers = self.controllers.unwrap_or(DEFAULT_CONTROLLERS);
        let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
        if controllers == 0 || controllers > MAX_CONTROLLERS {
            return Err(WorkflowError::Validation(format!(
                "controllers must be between 1 and {}",
                MAX_CONTROLLERS
            )));
        }
        if workers == 0 || workers > MAX_WORKERS {
            return Err(WorkflowError::Validation(format!(
                "workers must be between 1 and {}",
                MAX_WORKERS
            )));
        }
        Ok((controllers, workers))
    }
}

/// Host VM size for a cluster with `workers` workers
fn host_flavor(workers: u32) -> &'static str {
    match workers {
        0..=1 => "small",
        2..=3 => "middle",
        _ => "large",
    }
}

impl Engine {
    pub async fn create_k8s(
        self: &Arc<Self>,
        account: &Arc<Account>,
        request: K8sRequest,
    ) -> Result<Arc<K8sCluster>, WorkflowError> {
        let (controllers, workers) = request.validate()?;

        let cluster = {
            let _create = account.lock_create().await;
            let index = account.last_k8s_index().await + 1;
            let cluster = Arc::new(K8sCluster::new(K8sSpec {
                name: format!("{}-k8s-{}", account.name(), index),
                account: account.name().to_string(),
                version: request.version.trim().to_string(),
                controllers,
                workers,
                lifetime: self.settings.forever_secs,
            }));
            account.push_k8s(cluster.clone()).await;
            cluster
        };
        self.saver.notify();
        info!(cluster = %cluster.name(), controllers, workers, "Cluster creation starting");

        let engine = self.clone();
        let account = account.clone();
        let bootstrapping = cluster.clone();
        self.tasks.spawn("create_k8s", move |cancel| async move {
            engine.bootstrap_k8s(&account, &bootstrapping, cancel).await;
        });

        Ok(cluster)
    }

    async fn bootstrap_k8s(
        self: &Arc<Self>,
        account: &Arc<Account>,
        cluster: &K8sCluster,
        cancel: CancellationToken,
    ) {
        let _guard = cluster.lock().await;
        if cluster.status().await != K8sStatus::Init {
            return;
        }

        // Step 1: host VM
        cluster.set_status(K8sStatus::BootingVm).await;
        self.saver.notify();

        let spec = cluster.spec();
        let request = VmRequest {
            hostname: spec.name.clone(),
            os_type: HOST_VM_TYPE.to_string(),
            flavor: Some(host_flavor(spec.workers).to_string()),
            number: 1,
            duration_days: 1,
            ..Default::default()
        };
        let launched = self
            .launch_vms(account, request, self.settings.forever_secs)
            .await;
        let (vm, handle) = match launched {
            Ok((mut vms, handle)) if !vms.is_empty() => (vms.remove(0), handle),
            Ok(_) => {
                self.k8s_boot_failed(account, cluster, None, "no host VM created")
                    .await;
                return;
            }
            Err(e) => {
                self.k8s_boot_failed(account, cluster, None, e).await;
                return;
            }
        };
        cluster.set_host_vm(Some(vm.name().to_string())).await;

        let Some(ip) = self.wait_for_host_ip(&vm, handle, &cancel).await else {
            let reason = vm
                .state()
                .await
                .last_error
                .unwrap_or_else(|| "host VM never got an address".to_string());
            self.k8s_boot_failed(account, cluster, Some(vm.as_ref()), reason)
                .await;
            return;
        };

        // Step 2: install
        cluster.set_status(K8sStatus::Installing).await;
        self.saver.notify();
        info!(cluster = %cluster.name(), %ip, "Installing cluster");

        let install = K8sInstallRequest {
            host: HostAccess {
                ip,
                password: vm.spec().root_password.clone(),
                user: "root".to_string(),
            },
            controllers: spec.controllers,
            workers: spec.workers,
        };
        match self.provisioner.install_k8s(&install).await {
            Ok(()) => {
                cluster.set_status(K8sStatus::Running).await;
                info!(cluster = %cluster.name(), "Cluster running");
                self.notifier
                    .notify_account(
                        account,
                        format!("Your k8s cluster {} is ready", cluster.name()),
                    )
                    .await;
            }
            Err(e) => {
                error!(cluster = %cluster.name(), "Cluster install failed: {}", e);
                cluster.fail(K8sStatus::InstallFailed, &e).await;
                self.notifier
                    .notify_account(
                        account,
                        format!("Your k8s cluster {} failed to install: {}", cluster.name(), e),
                    )
                    .await;
            }
        }
        self.saver.notify();
    }

    /// Wait for the host VM's create task, then read the address it left
    async fn wait_for_host_ip(
        &self,
        vm: &VirtualMachine,
        handle: JoinHandle<()>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = handle => {
                if let Err(e) = result {
                    warn!(vm = %vm.name(), "Host VM task aborted: {}", e);
                }
            }
        }
        let state = vm.state().await;
        if state.ports.is_empty() {
            return None;
        }
        parse_vm_ip(&state.address).map(|ip| ip.to_string())
    }

    async fn k8s_boot_failed(
        &self,
        account: &Account,
        cluster: &K8sCluster,
        vm: Option<&VirtualMachine>,
        err: impl ToString,
    ) {
        let err = err.to_string();
        warn!(cluster = %cluster.name(), "Host VM boot failed: {}", err);
        cluster.fail(K8sStatus::BootVmFailed, &err).await;

        if let Some(vm) = vm {
            let _vm_guard = vm.lock().await;
            if let Err(e) = self.delete_vm_locked(account, vm).await {
                error!(cluster = %cluster.name(), vm = %vm.name(), "Host VM cleanup failed: {}", e);
            }
        }
        self.notifier
            .notify_account(
                account,
                format!("Your k8s cluster {} failed to boot: {}", cluster.name(), err),
            )
            .await;
        self.saver.notify();
    }

    /// Tear down a cluster and its host VM
    pub async fn delete_k8s(&self, account: &Account, name: &str) -> Result<(), WorkflowError> {
        let _task = self.tasks.guard();
        let cluster = account
            .k8s(name)
            .await
            .ok_or_else(|| WorkflowError::NotFound(format!("k8s cluster '{}'", name)))?;

        let _guard = cluster.lock().await;
        cluster.set_status(K8sStatus::Deleting).await;
        info!(cluster = %name, "Deleting cluster");

        if let Some(vm_name) = cluster.host_vm().await {
            if let Some(vm) = account.vm(&vm_name).await {
                let _vm_guard = vm.lock().await;
                if let Err(e) = self.delete_vm_locked(account, &vm).await {
                    cluster.fail(K8sStatus::Deleting, &e).await;
                    self.saver.notify();
                    return Err(e);
                }
            }
        }

        account.remove_k8s(name).await;
        self.saver.notify();
        info!(cluster = %name, "Cluster deleted");
        Ok(())
    }
}
