//! Resource registry
//!
//! In-memory stores for nodes and accounts. Accounts in turn own their VMs,
//! Kubernetes clusters and software. The registry is constructed once and
//! shared by the workflow engine, the controllers and the server.
//!
//! Iteration always clones the `Arc`s out first, so callers may freely
//! re-enter the registry while walking a snapshot.

pub mod account;
pub mod k8s;
pub mod naming;
pub mod node;
pub mod resources;
pub mod software;
pub mod subnet;
pub mod vm;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use account::{Account, AccountRecord, AccountRole};
pub use k8s::{K8sCluster, K8sSpec, K8sStatus};
pub use node::{Credentials, Node, NodeRecord, NodeRole, NodeSnapshot, NodeSpec, NodeState, NodeStatus};
pub use resources::{Dimension, Resources};
pub use software::{Software, SoftwareKind, SoftwareSpec, SoftwareStatus};
pub use subnet::SubnetPool;
pub use vm::{PortMapping, VirtualMachine, VmRecord, VmSpec, VmState, VmStatus};

/// Errors raised by registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Node '{0}' already registered")]
    NodeExists(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Account '{0}' already exists")]
    AccountExists(String),

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("Account '{0}' still owns resources")]
    AccountNotEmpty(String),

    #[error("Invalid subnet range '{0}'")]
    InvalidSubnetRange(String),
}

/// Full serializable registry contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryRecord {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
}

#[derive(Debug, Default)]
pub struct Registry {
    nodes: DashMap<String, Arc<Node>>,
    accounts: DashMap<String, Arc<Account>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Register a node, refusing duplicates
    pub fn add_node(&self, node: Node) -> Result<Arc<Node>, RegistryError> {
        match self.nodes.entry(node.name().to_string()) {
            Entry::Occupied(e) => Err(RegistryError::NodeExists(e.key().clone())),
            Entry::Vacant(e) => {
                let node = Arc::new(node);
                e.insert(node.clone());
                Ok(node)
            }
        }
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).map(|n| n.value().clone())
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn remove_node(&self, name: &str) -> Result<Arc<Node>, RegistryError> {
        self.nodes
            .remove(name)
            .map(|(_, n)| n)
            .ok_or_else(|| RegistryError::NodeNotFound(name.to_string()))
    }

    /// Snapshot of all nodes
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub async fn node_snapshots(&self) -> Vec<NodeSnapshot> {
        let mut snapshots = Vec::new();
        for node in self.nodes() {
            snapshots.push(node.snapshot().await);
        }
        snapshots
    }

    /// Subnets currently claimed by registered nodes
    pub fn used_subnets(&self) -> HashSet<String> {
        self.nodes
            .iter()
            .map(|e| e.value().subnet().to_string())
            .collect()
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Fetch an account, creating a guest account on first use
    pub fn ensure_account(&self, name: &str) -> Arc<Account> {
        self.accounts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Account::new(name, AccountRole::Guest)))
            .value()
            .clone()
    }

    pub fn create_account(
        &self,
        name: &str,
        role: AccountRole,
    ) -> Result<Arc<Account>, RegistryError> {
        match self.accounts.entry(name.to_string()) {
            Entry::Occupied(e) => Err(RegistryError::AccountExists(e.key().clone())),
            Entry::Vacant(e) => {
                let account = Arc::new(Account::new(name, role));
                e.insert(account.clone());
                Ok(account)
            }
        }
    }

    pub fn account(&self, name: &str) -> Option<Arc<Account>> {
        self.accounts.get(name).map(|a| a.value().clone())
    }

    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.iter().map(|e| e.value().clone()).collect()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Remove an account that owns nothing
    pub async fn delete_account(&self, name: &str) -> Result<(), RegistryError> {
        let account = self
            .account(name)
            .ok_or_else(|| RegistryError::AccountNotFound(name.to_string()))?;

        // Holding the create lock keeps new entities out while we check
        let _guard = account.lock_create().await;
        if !account.is_empty().await {
            return Err(RegistryError::AccountNotEmpty(name.to_string()));
        }
        self.accounts.remove(name);
        Ok(())
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub async fn to_record(&self) -> RegistryRecord {
        let mut nodes = Vec::new();
        for node in self.nodes() {
            nodes.push(node.to_record().await);
        }
        nodes.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));

        let mut accounts = Vec::new();
        for account in self.accounts() {
            accounts.push(account.to_record().await);
        }
        accounts.sort_by(|a, b| a.name.cmp(&b.name));

        RegistryRecord { nodes, accounts }
    }

    /// Replace registry contents with a saved snapshot
    pub fn restore(&self, record: RegistryRecord, port_range: (u16, u16)) {
        self.nodes.clear();
        self.accounts.clear();
        for node in record.nodes {
            let node = Node::from_record(node, port_range.0, port_range.1);
            self.nodes.insert(node.name().to_string(), Arc::new(node));
        }
        for account in record.accounts {
            let account = Account::from_record(account);
            self.accounts
                .insert(account.name().to_string(), Arc::new(account));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, subnet: &str) -> Node {
        Node::new(NodeSpec {
            name: name.to_string(),
            credentials: Credentials {
                user: "root".to_string(),
                password: "pw".to_string(),
            },
            role: NodeRole::Compute,
            address: "10.0.0.1".to_string(),
            subnet: subnet.to_string(),
        })
    }

    #[test]
    fn test_add_node_rejects_duplicates() {
        let registry = Registry::new();
        registry.add_node(node("n1", "192.168.0.0/24")).unwrap();

        let err = registry.add_node(node("n1", "192.168.1.0/24")).unwrap_err();
        assert_eq!(err, RegistryError::NodeExists("n1".to_string()));
        assert_eq!(registry.node_count(), 1);
    }

    #[test]
    fn test_used_subnets() {
        let registry = Registry::new();
        registry.add_node(node("n1", "192.168.0.0/24")).unwrap();
        registry.add_node(node("n2", "192.168.1.0/24")).unwrap();

        let used = registry.used_subnets();
        assert!(used.contains("192.168.0.0/24"));
        assert!(used.contains("192.168.1.0/24"));
    }

    #[test]
    fn test_remove_unknown_node() {
        let registry = Registry::new();
        assert!(matches!(
            registry.remove_node("ghost"),
            Err(RegistryError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_ensure_account_is_idempotent() {
        let registry = Registry::new();
        let a = registry.ensure_account("alice");
        let b = registry.ensure_account("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.account_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_account_refused_while_owning_resources() {
        let registry = Registry::new();
        let account = registry.create_account("bob", AccountRole::Guest).unwrap();
        account
            .push_k8s(Arc::new(K8sCluster::new(K8sSpec {
                name: "bob-k8s-1".to_string(),
                account: "bob".to_string(),
                version: "1.29".to_string(),
                controllers: 1,
                workers: 1,
                lifetime: 31_536_000,
            })))
            .await;

        assert_eq!(
            registry.delete_account("bob").await,
            Err(RegistryError::AccountNotEmpty("bob".to_string()))
        );

        account.remove_k8s("bob-k8s-1").await;
        registry.delete_account("bob").await.unwrap();
        assert!(registry.account("bob").is_none());
    }

    #[tokio::test]
    async fn test_record_restore() {
        let registry = Registry::new();
        registry.add_node(node("n1", "192.168.0.0/24")).unwrap();
        registry.ensure_account("alice");

        let record = registry.to_record().await;
        let json = serde_json::to_string(&record).unwrap();

        let restored = Registry::new();
        restored.restore(serde_json::from_str(&json).unwrap(), (20000, 25000));
        assert!(restored.contains_node("n1"));
        assert!(restored.account("alice").is_some());
    }
}
