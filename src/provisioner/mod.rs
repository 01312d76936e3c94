//! Remote provisioner client
//!
//! The provisioner is the HTTP service that actually installs hosts, creates
//! VMs and containers, bootstraps Kubernetes and reports live status. The rest
//! of the crate talks to it only through the [`Provisioner`] trait:
//!
//! - [`HttpProvisioner`] is the real reqwest-backed implementation
//! - `mock::MockProvisioner` records calls for unit tests

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{resolve_base_url, HttpProvisioner};
pub use types::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provisioner error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Invalid provisioner base URL: {0}")]
    InvalidBaseUrl(String),
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Install the lab agent on a host and report its capacity
    async fn install_host(&self, req: &InstallHostRequest) -> Result<HostInfo, ProvisionerError>;

    async fn create_vm(&self, req: &CreateVmRequest) -> Result<(), ProvisionerError>;

    async fn action_vm(&self, req: &VmActionRequest) -> Result<(), ProvisionerError>;

    async fn vm_live_status(&self, query: &VmQuery) -> Result<VmLiveStatus, ProvisionerError>;

    /// Apply or remove a batch of DNAT rules on one host
    async fn set_dnat_rules(&self, req: &DnatRequest) -> Result<(), ProvisionerError>;

    async fn install_addons(&self, req: &AddonRequest) -> Result<(), ProvisionerError>;

    async fn install_k8s(&self, req: &K8sInstallRequest) -> Result<(), ProvisionerError>;

    async fn create_container(
        &self,
        req: &ContainerRequest,
    ) -> Result<ContainerStatus, ProvisionerError>;

    async fn action_container(
        &self,
        req: &ContainerActionRequest,
    ) -> Result<ContainerStatus, ProvisionerError>;

    async fn host_usage(&self, host: &HostAccess) -> Result<HostUsage, ProvisionerError>;

    async fn update_routes(&self, req: &RouteUpdate) -> Result<(), ProvisionerError>;

    /// Reboot a host. No provisioner endpoint exists yet, so the default
    /// accepts the request without doing anything.
    async fn reboot_host(&self, _host: &HostAccess) -> Result<(), ProvisionerError> {
        Ok(())
    }
}
