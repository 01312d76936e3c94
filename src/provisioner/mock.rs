//! In-memory provisioner for tests
//!
//! Every call is recorded by operation name. Individual operations can be
//! switched to fail, and the canned responses can be replaced.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::*;
use super::{Provisioner, ProvisionerError};

pub struct MockProvisioner {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    host_info: Mutex<HostInfo>,
    live_status: Mutex<VmLiveStatus>,
    usage: Mutex<HostUsage>,
    container: Mutex<ContainerStatus>,
    dnat_requests: Mutex<Vec<DnatRequest>>,
    route_updates: Mutex<Vec<RouteUpdate>>,
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            host_info: Mutex::new(HostInfo {
                cpu: 8,
                memory: 16384,
                disk: 200,
                os_type: "centos".to_string(),
            }),
            live_status: Mutex::new(VmLiveStatus {
                name: String::new(),
                status: "running".to_string(),
                address: "10.1.0.10/24".to_string(),
                vnc_port: "5901".to_string(),
            }),
            usage: Mutex::new(HostUsage {
                cpu_load: 0.5,
                memory_avail: 8192,
                disk_usage: "20%".to_string(),
                engine_status: 0,
            }),
            container: Mutex::new(ContainerStatus {
                status: "running".to_string(),
                address: "172.17.0.2".to_string(),
                port_mapping: vec!["6379/tcp -> 0.0.0.0:49187".to_string()],
                ..Default::default()
            }),
            dnat_requests: Mutex::new(Vec::new()),
            route_updates: Mutex::new(Vec::new()),
        }
    }

    /// Make every call to `op` fail
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    pub fn set_live_status(&self, status: VmLiveStatus) {
        *self.live_status.lock().unwrap() = status;
    }

    pub fn set_usage(&self, usage: HostUsage) {
        *self.usage.lock().unwrap() = usage;
    }

    pub fn set_container(&self, status: ContainerStatus) {
        *self.container.lock().unwrap() = status;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    pub fn dnat_requests(&self) -> Vec<DnatRequest> {
        self.dnat_requests.lock().unwrap().clone()
    }

    pub fn route_updates(&self) -> Vec<RouteUpdate> {
        self.route_updates.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str) -> Result<(), ProvisionerError> {
        self.calls.lock().unwrap().push(op.to_string());
        if self.failing.lock().unwrap().contains(op) {
            return Err(ProvisionerError::Api {
                status: 500,
                message: format!("{} failed", op),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn install_host(&self, _req: &InstallHostRequest) -> Result<HostInfo, ProvisionerError> {
        self.record("install_host")?;
        Ok(self.host_info.lock().unwrap().clone())
    }

    async fn create_vm(&self, _req: &CreateVmRequest) -> Result<(), ProvisionerError> {
        self.record("create_vm")
    }

    async fn action_vm(&self, req: &VmActionRequest) -> Result<(), ProvisionerError> {
        self.record(match req.vm_action {
            VmAction::Start => "start_vm",
            VmAction::Shutdown => "shutdown_vm",
            VmAction::Reboot => "reboot_vm",
            VmAction::Delete => "delete_vm",
        })
    }

    async fn vm_live_status(&self, query: &VmQuery) -> Result<VmLiveStatus, ProvisionerError> {
        self.record("vm_live_status")?;
        let mut status = self.live_status.lock().unwrap().clone();
        status.name = query.vm_name.clone();
        Ok(status)
    }

    async fn set_dnat_rules(&self, req: &DnatRequest) -> Result<(), ProvisionerError> {
        self.dnat_requests.lock().unwrap().push(req.clone());
        self.record("set_dnat_rules")
    }

    async fn install_addons(&self, _req: &AddonRequest) -> Result<(), ProvisionerError> {
        self.record("install_addons")
    }

    async fn install_k8s(&self, _req: &K8sInstallRequest) -> Result<(), ProvisionerError> {
        self.record("install_k8s")
    }

    async fn create_container(
        &self,
        _req: &ContainerRequest,
    ) -> Result<ContainerStatus, ProvisionerError> {
        self.record("create_container")?;
        Ok(self.container.lock().unwrap().clone())
    }

    async fn action_container(
        &self,
        _req: &ContainerActionRequest,
    ) -> Result<ContainerStatus, ProvisionerError> {
        self.record("action_container")?;
        Ok(self.container.lock().unwrap().clone())
    }

    async fn host_usage(&self, _host: &HostAccess) -> Result<HostUsage, ProvisionerError> {
        self.record("host_usage")?;
        Ok(self.usage.lock().unwrap().clone())
    }

    async fn update_routes(&self, req: &RouteUpdate) -> Result<(), ProvisionerError> {
        self.route_updates.lock().unwrap().push(req.clone());
        self.record("update_routes")
    }

    async fn reboot_host(&self, _host: &HostAccess) -> Result<(), ProvisionerError> {
        self.record("reboot_host")
    }
}
