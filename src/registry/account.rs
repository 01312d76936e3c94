//! Account resource and its owned collections
//!
//! An account owns three independently locked collections. A separate
//! create lock serializes name allocation so two concurrent creates can never
//! pick the same `-N` index.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::k8s::{K8sCluster, K8sRecord};
use super::naming::last_index;
use super::software::{Software, SoftwareRecord};
use super::vm::{VirtualMachine, VmRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Admin,
    #[default]
    Guest,
}

impl FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(AccountRole::Admin),
            "guest" => Ok(AccountRole::Guest),
            other => Err(format!("unknown account role '{}'", other)),
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRole::Admin => write!(f, "admin"),
            AccountRole::Guest => write!(f, "guest"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    pub role: AccountRole,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub vms: Vec<VmRecord>,
    #[serde(default)]
    pub k8s: Vec<K8sRecord>,
    #[serde(default)]
    pub software: Vec<SoftwareRecord>,
}

#[derive(Debug)]
pub struct Account {
    name: String,
    role: RwLock<AccountRole>,
    contact: RwLock<Option<String>>,
    one_time_password: RwLock<Option<String>>,
    create: Mutex<()>,
    vms: RwLock<Vec<Arc<VirtualMachine>>>,
    k8s: RwLock<Vec<Arc<K8sCluster>>>,
    software: RwLock<Vec<Arc<Software>>>,
}

impl Account {
    pub fn new(name: impl Into<String>, role: AccountRole) -> Self {
        Self {
            name: name.into(),
            role: RwLock::new(role),
            contact: RwLock::new(None),
            one_time_password: RwLock::new(None),
            create: Mutex::new(()),
            vms: RwLock::new(Vec::new()),
            k8s: RwLock::new(Vec::new()),
            software: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn role(&self) -> AccountRole {
        *self.role.read().await
    }

    pub async fn set_role(&self, role: AccountRole) {
        *self.role.write().await = role;
    }

    pub async fn contact(&self) -> Option<String> {
        self.contact.read().await.clone()
    }

    pub async fn set_contact(&self, contact: Option<String>) {
        *self.contact.write().await = contact;
    }

    /// Notification target: the explicit contact, else `name@domain`
    pub async fn notification_target(&self, domain: Option<&str>) -> Option<String> {
        if let Some(contact) = self.contact().await {
            return Some(contact);
        }
        domain.map(|d| format!("{}@{}", self.name, d))
    }

    pub async fn one_time_password(&self) -> Option<String> {
        self.one_time_password.read().await.clone()
    }

    pub async fn set_one_time_password(&self, password: Option<String>) {
        *self.one_time_password.write().await = password;
    }

    /// Serialize entity creation on this account
    pub async fn lock_create(&self) -> MutexGuard<'_, ()> {
        self.create.lock().await
    }

    // =========================================================================
    // VMs
    // =========================================================================

    pub async fn vms(&self) -> Vec<Arc<VirtualMachine>> {
        self.vms.read().await.clone()
    }

    pub async fn vm(&self, name: &str) -> Option<Arc<VirtualMachine>> {
        self.vms.read().await.iter().find(|v| v.name() == name).cloned()
    }

    pub async fn push_vm(&self, vm: Arc<VirtualMachine>) {
        self.vms.write().await.push(vm);
    }

    pub async fn remove_vm(&self, name: &str) -> Option<Arc<VirtualMachine>> {
        let mut vms = self.vms.write().await;
        let idx = vms.iter().position(|v| v.name() == name)?;
        Some(vms.remove(idx))
    }

    /// Highest VM index in use
    pub async fn last_vm_index(&self) -> u64 {
        last_index(self.vms.read().await.iter().map(|v| v.name()))
    }

    // =========================================================================
    // K8s clusters
    // =========================================================================

    pub async fn k8s_clusters(&self) -> Vec<Arc<K8sCluster>> {
        self.k8s.read().await.clone()
    }

    pub async fn k8s(&self, name: &str) -> Option<Arc<K8sCluster>> {
        self.k8s.read().await.iter().find(|c| c.name() == name).cloned()
    }

    pub async fn push_k8s(&self, cluster: Arc<K8sCluster>) {
        self.k8s.write().await.push(cluster);
    }

    pub async fn remove_k8s(&self, name: &str) -> Option<Arc<K8sCluster>> {
        let mut clusters = self.k8s.write().await;
        let idx = clusters.iter().position(|c| c.name() == name)?;
        Some(clusters.remove(idx))
    }

    pub async fn last_k8s_index(&self) -> u64 {
        last_index(self.k8s.read().await.iter().map(|c| c.name()))
    }

    // =========================================================================
    // Software
    // =========================================================================

    pub async fn software_list(&self) -> Vec<Arc<Software>> {
        self.software.read().await.clone()
    }

    pub async fn software(&self, name: &str) -> Option<Arc<Software>> {
        self.software
            .read()
            .await
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    pub async fn push_software(&self, software: Arc<Software>) {
        self.software.write().await.push(software);
    }

    pub async fn remove_software(&self, name: &str) -> Option<Arc<Software>> {
        let mut list = self.software.write().await;
        let idx = list.iter().position(|s| s.name() == name)?;
        Some(list.remove(idx))
    }

    pub async fn last_software_index(&self) -> u64 {
        last_index(self.software.read().await.iter().map(|s| s.name()))
    }

    /// Owns no VM, cluster or software
    pub async fn is_empty(&self) -> bool {
        self.vms.read().await.is_empty()
            && self.k8s.read().await.is_empty()
            && self.software.read().await.is_empty()
    }

    pub async fn to_record(&self) -> AccountRecord {
        let mut vms = Vec::new();
        for vm in self.vms().await {
            vms.push(vm.to_record().await);
        }
        let mut k8s = Vec::new();
        for cluster in self.k8s_clusters().await {
            k8s.push(cluster.to_record().await);
        }
        let mut software = Vec::new();
        for s in self.software_list().await {
            software.push(s.to_record().await);
        }

        AccountRecord {
            name: self.name.clone(),
            role: self.role().await,
            contact: self.contact().await,
            vms,
            k8s,
            software,
        }
    }

    pub fn from_record(record: AccountRecord) -> Self {
        let vms = record
            .vms
            .into_iter()
            .map(|r| Arc::new(VirtualMachine::from_record(r)))
            .collect();
        let k8s = record
            .k8s
            .into_iter()
            .map(|r| Arc::new(K8sCluster::from_record(r)))
            .collect();
        let software = record
            .software
            .into_iter()
            .map(|r| Arc::new(Software::from_record(r)))
            .collect();

        Self {
            name: record.name,
            role: RwLock::new(record.role),
            contact: RwLock::new(record.contact),
            one_time_password: RwLock::new(None),
            create: Mutex::new(()),
            vms: RwLock::new(vms),
            k8s: RwLock::new(k8s),
            software: RwLock::new(software),
        }
    }
}
