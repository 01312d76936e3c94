//! VM pipeline: create, power actions, delete, port exposure, lease extension

use std::net::IpAddr;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::tasks::pause;
use super::{host_access, Engine, WorkflowError};
use crate::provisioner::{
    AddonRequest, CreateVmRequest, DnatRequest, DnatRule, RuleState, VmAction, VmActionRequest,
    VmHost, VmLiveStatus, VmQuery,
};
use crate::registry::naming::random_string;
use crate::registry::{
    Account, Node, NodeRole, PortMapping, Resources, VirtualMachine, VmSpec, VmState, VmStatus,
};

/// Most VMs a single request may create
pub const MAX_VMS_PER_REQUEST: u32 = 5;

const PASSWORD_LEN: usize = 8;

/// Named cpu/memory/disk presets
pub fn flavor(name: &str) -> Option<Resources> {
    match name {
        "small" => Some(Resources::new(2, 2048, 30)),
        "middle" => Some(Resources::new(4, 4096, 64)),
        "large" => Some(Resources::new(6, 8192, 80)),
        _ => None,
    }
}

/// Request for one or more identical VMs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VmRequest {
    pub hostname: String,
    /// Generated when empty
    pub root_password: String,
    /// Guest OS image
    #[serde(rename = "type")]
    pub os_type: String,
    /// Overrides `cpu`/`memory`/`disk` when set
    pub flavor: Option<String>,
    pub cpu: i64,
    pub memory: i64,
    pub disk: i64,
    pub number: u32,
    /// Lease length in days
    pub duration_days: i64,
    pub addons: Vec<String>,
}

impl VmRequest {
    /// Per-VM resources after flavor resolution
    pub fn resources(&self) -> Result<Resources, WorkflowError> {
        let resources = match self.flavor.as_deref().filter(|f| !f.is_empty()) {
            Some(name) => flavor(name)
                .ok_or_else(|| WorkflowError::Validation(format!("unknown flavor '{}'", name)))?,
            None => Resources::new(self.cpu, self.memory, self.disk),
        };
        if resources.cpu <= 0 || resources.memory <= 0 || resources.disk <= 0 {
            return Err(WorkflowError::Validation(
                "cpu, memory and disk must all be positive".to_string(),
            ));
        }
        Ok(resources)
    }

    pub fn validate(&self) -> Result<Resources, WorkflowError> {
        if self.os_type.trim().is_empty() {
            return Err(WorkflowError::Validation("VM type is required".to_string()));
        }
        if self.number == 0 || self.number > MAX_VMS_PER_REQUEST {
            return Err(WorkflowError::Validation(format!(
                "number must be between 1 and {}",
                MAX_VMS_PER_REQUEST
            )));
        }
        if self.duration_days <= 0 {
            return Err(WorkflowError::Validation(
                "duration must be at least one day".to_string(),
            ));
        }
        self.resources()
    }
}

/// Address without its prefix length: `10.1.0.5/24` -> `10.1.0.5`
pub(crate) fn vm_ip(address: &str) -> &str {
    address.split('/').next().unwrap_or_default().trim()
}

/// Parsed VM address, if one has been assigned
pub(crate) fn parse_vm_ip(address: &str) -> Option<IpAddr> {
    vm_ip(address).parse().ok()
}

fn vm_host(node: &Node) -> VmHost {
    VmHost::from(&host_access(node))
}

fn apply_live_status(state: &mut VmState, live: &VmLiveStatus) {
    state.status = VmStatus::from_live(&live.status);
    state.address = live.address.clone();
    state.vnc_port = live.vnc_port.clone();
}

impl Engine {
    // =========================================================================
    // Create
    // =========================================================================

    /// Register `number` VM placeholders and start provisioning them
    ///
    /// The returned VMs are already visible on the account in `init` status.
    pub async fn create_vms(
        self: &Arc<Self>,
        account: &Arc<Account>,
        request: VmRequest,
    ) -> Result<Vec<Arc<VirtualMachine>>, WorkflowError> {
        let lifetime = request.duration_days * 24 * 3600;
        let (vms, _handle) = self.launch_vms(account, request, lifetime).await?;
        Ok(vms)
    }

    /// Like `create_vms`, also returning the background task handle
    pub(crate) async fn launch_vms(
        self: &Arc<Self>,
        account: &Arc<Account>,
        request: VmRequest,
        lifetime_secs: i64,
    ) -> Result<(Vec<Arc<VirtualMachine>>, JoinHandle<()>), WorkflowError> {
        let resources = request.validate()?;

        let mut vms = Vec::with_capacity(request.number as usize);
        {
            let _create = account.lock_create().await;
            let last = account.last_vm_index().await;

            for k in 1..=u64::from(request.number) {
                let name = format!("{}-{}", account.name(), last + k);
                let hostname = match request.hostname.trim() {
                    "" => name.clone(),
                    h if request.number > 1 => format!("{}-{}", h, k),
                    h => h.to_string(),
                };
                let root_password = if request.root_password.is_empty() {
                    random_string(PASSWORD_LEN)
                } else {
                    request.root_password.clone()
                };

                let vm = Arc::new(VirtualMachine::new(
                    VmSpec {
                        name,
                        account: account.name().to_string(),
                        hostname,
                        resources,
                        root_password,
                        vnc_password: random_string(PASSWORD_LEN),
                        os_type: request.os_type.clone(),
                        addons: request.addons.clone(),
                    },
                    lifetime_secs,
                ));
                account.push_vm(vm.clone()).await;
                vms.push(vm);
            }
        }
        self.saver.notify();

        info!(
            account = %account.name(),
            count = vms.len(),
            "VM creation starting"
        );

        let engine = self.clone();
        let account = account.clone();
        let group = vms.clone();
        let handle = self.tasks.spawn("create_vms", move |cancel| async move {
            engine.run_vm_group(account, group, resources, cancel).await;
        });

        Ok((vms, handle))
    }

    async fn run_vm_group(
        self: Arc<Self>,
        account: Arc<Account>,
        group: Vec<Arc<VirtualMachine>>,
        per_vm: Resources,
        cancel: CancellationToken,
    ) {
        let (node, scheduled) = {
            // Hold every VM so none can be deleted between reserve and mark
            let mut guards = Vec::with_capacity(group.len());
            for vm in &group {
                guards.push(vm.lock().await);
            }

            let mut pending = Vec::new();
            for vm in &group {
                if vm.status().await == VmStatus::Init {
                    pending.push(vm.clone());
                }
            }
            if pending.is_empty() {
                return;
            }

            let total = per_vm.times(pending.len() as i64);
            let Some(node) = self
                .scheduler
                .schedule_and_reserve(&self.registry, NodeRole::Compute, total)
                .await
            else {
                error!(account = %account.name(), "No eligible node, VM creation aborted");
                for vm in &pending {
                    vm.set_error("no eligible node for placement").await;
                }
                return;
            };

            for vm in &pending {
                let node_name = node.name().to_string();
                vm.update(move |s| {
                    s.node = Some(node_name);
                    s.status = VmStatus::Scheduled;
                    s.capacity_reserved = true;
                })
                .await;
            }
            (node, pending)
        };
        self.saver.notify();

        join_all(
            scheduled
                .into_iter()
                .map(|vm| self.provision_vm(&account, &node, vm, &cancel)),
        )
        .await;

        info!(account = %account.name(), "VM creation done");
    }

    async fn provision_vm(
        &self,
        account: &Account,
        node: &Node,
        vm: Arc<VirtualMachine>,
        cancel: &CancellationToken,
    ) {
        let _guard = vm.lock().await;
        if vm.status().await != VmStatus::Scheduled {
            return;
        }

        // Step 1: instantiate
        info!(vm = %vm.name(), node = %node.name(), "Creating VM");
        vm.set_status(VmStatus::Creating).await;
        let spec = vm.spec();
        let request = CreateVmRequest {
            vm_name: spec.name.clone(),
            vm_hostname: spec.hostname.clone(),
            vm_action: "create".to_string(),
            vm_memory: spec.resources.memory,
            vm_vcpus: spec.resources.cpu,
            vm_disk: spec.resources.disk,
            vm_type: spec.os_type.clone(),
            vnc_pass: spec.vnc_password.clone(),
            root_pass: spec.root_password.clone(),
            host: vm_host(node),
        };
        if let Err(e) = self.provisioner.create_vm(&request).await {
            error!(vm = %vm.name(), "VM instantiation failed: {}", e);
            vm.fail(&e).await;
            self.saver.notify();
            return;
        }
        vm.set_status(VmStatus::Running).await;
        self.saver.notify();

        // Step 2: wait for an address
        let Some(live) = self.poll_live_status(node, &vm, cancel).await else {
            warn!(vm = %vm.name(), "Timed out waiting for VM address");
            vm.set_error("timed out waiting for VM address").await;
            self.saver.notify();
            return;
        };
        self.notifier
            .notify_account(
                account,
                format!(
                    "Your VM {} is running\nroot passwd -> {}, vnc passwd -> {}\nvnc login -> {}:{}",
                    vm.name(),
                    spec.root_password,
                    spec.vnc_password,
                    node.address(),
                    live.vnc_port
                ),
            )
            .await;

        // Step 3: SSH DNAT
        let ip = vm_ip(&live.address).to_string();
        let Some(ssh_port) = node.reserve_port(format!("{}:22", ip)).await else {
            warn!(vm = %vm.name(), node = %node.name(), "No free NAT port for SSH");
            vm.set_error("no free NAT port for SSH").await;
            self.saver.notify();
            return;
        };
        vm.update(|s| {
            s.ports.insert(
                22,
                PortMapping {
                    node_port: ssh_port,
                    protocol: "tcp".to_string(),
                },
            );
        })
        .await;

        let rules = DnatRequest {
            rules: vec![DnatRule {
                dport: ssh_port.to_string(),
                destination: format!("{}:22", ip),
                state: RuleState::Present,
                protocol: "tcp".to_string(),
            }],
            host: host_access(node),
        };
        if let Err(e) = self.provisioner.set_dnat_rules(&rules).await {
            error!(vm = %vm.name(), "SSH DNAT setup failed: {}", e);
            node.release_port(ssh_port).await;
            vm.update(|s| {
                s.ports.remove(&22);
                s.last_error = Some(e.to_string());
            })
            .await;
            self.saver.notify();
            return;
        }
        info!(vm = %vm.name(), ssh_port, "DNAT ready");

        self.notifier
            .notify_account(
                account,
                format!(
                    "Your VM {} is ready to login by ssh {} -p {}",
                    vm.name(),
                    node.address(),
                    ssh_port
                ),
            )
            .await;

        // Step 4: addons
        if !spec.addons.is_empty() {
            self.install_addons(&vm, &ip, cancel).await;
        }
        self.saver.notify();
    }

    async fn poll_live_status(
        &self,
        node: &Node,
        vm: &VirtualMachine,
        cancel: &CancellationToken,
    ) -> Option<VmLiveStatus> {
        let query = VmQuery {
            vm_name: vm.name().to_string(),
            host: vm_host(node),
        };
        for attempt in 1..=self.settings.vm_status_retry {
            match self.provisioner.vm_live_status(&query).await {
                Ok(live) if !live.status.is_empty() && !live.address.is_empty() => {
                    vm.update(|s| apply_live_status(s, &live)).await;
                    return Some(live);
                }
                Ok(_) => debug!(vm = %vm.name(), attempt, "VM has no address yet"),
                Err(e) => debug!(vm = %vm.name(), attempt, "Live status failed: {}", e),
            }
            if attempt < self.settings.vm_status_retry
                && !pause(self.settings.vm_status_interval, cancel).await
            {
                return None;
            }
        }
        None
    }

    async fn install_addons(&self, vm: &VirtualMachine, ip: &str, cancel: &CancellationToken) {
        let spec = vm.spec();
        let request = AddonRequest {
            vm_name: spec.name.clone(),
            address: ip.to_string(),
            root_pass: spec.root_password.clone(),
            addons: spec.addons.clone(),
        };
        for attempt in 1..=self.settings.addon_retry {
            match self.provisioner.install_addons(&request).await {
                Ok(()) => {
                    info!(vm = %vm.name(), addons = ?spec.addons, "Addons installed");
                    return;
                }
                Err(e) => warn!(vm = %vm.name(), attempt, "Addon install failed: {}", e),
            }
            if attempt < self.settings.addon_retry
                && !pause(self.settings.vm_status_interval, cancel).await
            {
                break;
            }
        }
        vm.set_error("addon installation failed").await;
    }

    // =========================================================================
    // Actions
    // =========================================================================

    pub async fn action_vm(
        self: &Arc<Self>,
        account: &Account,
        vm: &Arc<VirtualMachine>,
        action: VmAction,
    ) -> Result<(), WorkflowError> {
        let _task = self.tasks.guard();
        let result = {
            let _guard = vm.lock().await;
            match action {
                VmAction::Delete => self.delete_vm_locked(account, vm).await,
                _ => self.power_vm_locked(vm, action).await,
            }
        };
        self.saver.notify();
        result
    }

    fn vm_node(&self, node: Option<&str>) -> Result<Arc<Node>, WorkflowError> {
        let name = node.ok_or_else(|| WorkflowError::Conflict("VM is not scheduled".to_string()))?;
        self.registry
            .node(name)
            .ok_or_else(|| WorkflowError::NotFound(format!("node '{}'", name)))
    }

    async fn power_vm_locked(
        self: &Arc<Self>,
        vm: &Arc<VirtualMachine>,
        action: VmAction,
    ) -> Result<(), WorkflowError> {
        let state = vm.state().await;
        if state.status.is_terminating() {
            return Err(WorkflowError::Conflict(format!(
                "VM '{}' is deleting or deleted",
                vm.name()
            )));
        }
        let node = self.vm_node(state.node.as_deref())?;

        info!(vm = %vm.name(), %action, "VM action");
        self.provisioner
            .action_vm(&VmActionRequest {
                vm_name: vm.name().to_string(),
                vm_action: action,
                host: vm_host(&node),
            })
            .await?;

        // Refresh status once the action has had time to land
        let engine = self.clone();
        let vm = vm.clone();
        let delay = self.settings.post_action_sync;
        self.tasks.spawn("sync_vm_status", move |cancel| async move {
            if !pause(delay, &cancel).await {
                return;
            }
            let query = VmQuery {
                vm_name: vm.name().to_string(),
                host: vm_host(&node),
            };
            match engine.provisioner.vm_live_status(&query).await {
                Ok(live) => {
                    if !vm.status().await.is_terminating() {
                        vm.update(|s| apply_live_status(s, &live)).await;
                        engine.saver.notify();
                    }
                }
                Err(e) => warn!(vm = %vm.name(), "Status sync after {} failed: {}", action, e),
            }
        });
        Ok(())
    }

    /// Delete a VM whose action lock the caller holds
    pub(crate) async fn delete_vm_locked(
        &self,
        account: &Account,
        vm: &VirtualMachine,
    ) -> Result<(), WorkflowError> {
        let state = vm.state().await;
        if state.status == VmStatus::Deleted {
            return Ok(());
        }

        // Never placed: nothing exists outside the registry
        if state.node.is_none() {
            account.remove_vm(vm.name()).await;
            vm.set_status(VmStatus::Deleted).await;
            info!(vm = %vm.name(), "Removed unscheduled VM");
            return Ok(());
        }

        vm.set_status(VmStatus::Deleting).await;
        let node = match self.vm_node(state.node.as_deref()) {
            Ok(node) => node,
            Err(e) => {
                vm.set_error(&e).await;
                return Err(e);
            }
        };
        let host = host_access(&node);

        info!(vm = %vm.name(), node = %node.name(), "Deleting VM");
        let request = VmActionRequest {
            vm_name: vm.name().to_string(),
            vm_action: VmAction::Delete,
            host: VmHost::from(&host),
        };
        if let Err(e) = self.provisioner.action_vm(&request).await {
            error!(vm = %vm.name(), "Delete failed: {}", e);
            vm.set_error(&e).await;
            return Err(e.into());
        }

        if !state.ports.is_empty() {
            let ip = vm_ip(&state.address);
            let rules = state
                .ports
                .iter()
                .map(|(vm_port, mapping)| DnatRule {
                    dport: mapping.node_port.to_string(),
                    destination: format!("{}:{}", ip, vm_port),
                    state: RuleState::Absent,
                    protocol: mapping.protocol.clone(),
                })
                .collect();
            if let Err(e) = self
                .provisioner
                .set_dnat_rules(&DnatRequest { rules, host })
                .await
            {
                error!(vm = %vm.name(), "Clearing DNAT rules failed: {}", e);
                vm.set_error(&e).await;
                return Err(e.into());
            }
            for mapping in state.ports.values() {
                node.release_port(mapping.node_port).await;
            }
            vm.update(|s| s.ports.clear()).await;
        }

        let reserved = vm
            .update(|s| std::mem::replace(&mut s.capacity_reserved, false))
            .await;
        if reserved {
            node.release(&vm.resources());
            debug!(vm = %vm.name(), node = %node.name(), "Released VM capacity");
        }

        account.remove_vm(vm.name()).await;
        vm.set_status(VmStatus::Deleted).await;
        info!(vm = %vm.name(), "VM deleted");
        Ok(())
    }

    // =========================================================================
    // Ports and lease
    // =========================================================================

    /// Expose `port` of a VM through a node NAT port, returning the node port
    pub async fn expose_port(
        &self,
        vm: &VirtualMachine,
        port: u16,
        protocol: &str,
    ) -> Result<u16, WorkflowError> {
        let _task = self.tasks.guard();
        let _guard = vm.lock().await;

        let state = vm.state().await;
        if state.status.is_terminating() {
            return Err(WorkflowError::Conflict(format!(
                "VM '{}' is deleting or deleted",
                vm.name()
            )));
        }
        if state.ports.contains_key(&port) {
            return Err(WorkflowError::Conflict(format!(
                "port {} already exposed",
                port
            )));
        }
        let node = self.vm_node(state.node.as_deref())?;
        let ip = vm_ip(&state.address);
        if ip.is_empty() {
            return Err(WorkflowError::Conflict(format!(
                "VM '{}' has no address yet",
                vm.name()
            )));
        }

        let destination = format!("{}:{}", ip, port);
        let node_port = node.reserve_port(destination.clone()).await.ok_or_else(|| {
            WorkflowError::NoCapacity(format!("no free NAT port on node '{}'", node.name()))
        })?;
        let protocol = if protocol.is_empty() { "tcp" } else { protocol };
        vm.update(|s| {
            s.ports.insert(
                port,
                PortMapping {
                    node_port,
                    protocol: protocol.to_string(),
                },
            );
        })
        .await;

        let request = DnatRequest {
            rules: vec![DnatRule {
                dport: node_port.to_string(),
                destination,
                state: RuleState::Present,
                protocol: protocol.to_string(),
            }],
            host: host_access(&node),
        };
        let result = self.provisioner.set_dnat_rules(&request).await;
        self.saver.notify();

        match result {
            Ok(()) => {
                info!(vm = %vm.name(), port, node_port, "Port exposed");
                Ok(node_port)
            }
            Err(e) => {
                error!(vm = %vm.name(), port, "Exposing port failed: {}", e);
                node.release_port(node_port).await;
                vm.update(|s| {
                    s.ports.remove(&port);
                    s.last_error = Some(e.to_string());
                })
                .await;
                Err(e.into())
            }
        }
    }

    /// Add `delta_secs` to a VM's lease, returning the new remaining lease
    pub fn extend_vm_lifetime(&self, vm: &VirtualMachine, delta_secs: i64) -> i64 {
        let _task = self.tasks.guard();
        let remaining = vm.extend_lifetime(delta_secs);
        info!(vm = %vm.name(), delta_secs, remaining, "VM lease extended");
        self.saver.notify();
        remaining
    }
}
