use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::types::*;
use super::{Provisioner, ProvisionerError};

const BASE_URL_PATTERN: &str = r"^https?://[[:ascii:]]+:\d+$";

/// Work out the provisioner base URL
///
/// `DEPLOYER_PROTOCOL`, `DEPLOYER_HOST` and `DEPLOYER_PORT` win when together
/// they form a valid `scheme://host:port`; otherwise `protocol://endpoint` from
/// the config file is used. `env` is the variable lookup, injectable for tests.
pub fn resolve_base_url(
    protocol: &str,
    endpoint: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String, ProvisionerError> {
    let pattern =
        Regex::new(BASE_URL_PATTERN).map_err(|e| ProvisionerError::InvalidBaseUrl(e.to_string()))?;

    let var = |key: &str| env(key).unwrap_or_default();
    let from_env = format!(
        "{}://{}:{}",
        var("DEPLOYER_PROTOCOL"),
        var("DEPLOYER_HOST"),
        var("DEPLOYER_PORT")
    );
    if pattern.is_match(&from_env) {
        info!("Using provisioner URL from environment: {}", from_env);
        return Ok(from_env);
    }

    let from_config = format!("{}://{}", protocol, endpoint);
    if pattern.is_match(&from_config) {
        info!("Using provisioner URL from config: {}", from_config);
        return Ok(from_config);
    }

    Err(ProvisionerError::InvalidBaseUrl(from_config))
}

/// reqwest-backed provisioner client
#[derive(Clone)]
pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvisioner {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProvisionerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisionerError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProvisionerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ProvisionerError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// POST a JSON body, ignoring the response body
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ProvisionerError> {
        debug!(path, "Provisioner POST");
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProvisionerError::Http(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ProvisionerError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(path, "Provisioner POST");
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProvisionerError::Http(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionerError::Parse(e.to_string()))
    }

    async fn get_json<Q, R>(&self, path: &str, query: &Q) -> Result<R, ProvisionerError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(path, "Provisioner GET");
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| ProvisionerError::Http(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProvisionerError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn install_host(&self, req: &InstallHostRequest) -> Result<HostInfo, ProvisionerError> {
        self.post_json("/host", req).await
    }

    async fn create_vm(&self, req: &CreateVmRequest) -> Result<(), ProvisionerError> {
        self.post("/vm", req).await
    }

    async fn action_vm(&self, req: &VmActionRequest) -> Result<(), ProvisionerError> {
        self.post("/vm", req).await
    }

    async fn vm_live_status(&self, query: &VmQuery) -> Result<VmLiveStatus, ProvisionerError> {
        self.get_json("/vm", query).await
    }

    async fn set_dnat_rules(&self, req: &DnatRequest) -> Result<(), ProvisionerError> {
        self.post("/host/dnat", req).await
    }

    async fn install_addons(&self, req: &AddonRequest) -> Result<(), ProvisionerError> {
        self.post("/vm/addons", req).await
    }

    async fn install_k8s(&self, req: &K8sInstallRequest) -> Result<(), ProvisionerError> {
        self.post("/k8s", req).await
    }

    async fn create_container(
        &self,
        req: &ContainerRequest,
    ) -> Result<ContainerStatus, ProvisionerError> {
        self.post_json("/container", req).await
    }

    async fn action_container(
        &self,
        req: &ContainerActionRequest,
    ) -> Result<ContainerStatus, ProvisionerError> {
        self.post_json("/container/action", req).await
    }

    async fn host_usage(&self, host: &HostAccess) -> Result<HostUsage, ProvisionerError> {
        self.get_json("/host", host).await
    }

    async fn update_routes(&self, req: &RouteUpdate) -> Result<(), ProvisionerError> {
        self.post("/hosts", req).await
    }
}
