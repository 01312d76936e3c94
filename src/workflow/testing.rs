//! Shared fixtures for engine and controller tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::notify::{Message, Notifier};
use crate::persistence::SaveSignal;
use crate::provisioner::mock::MockProvisioner;
use crate::registry::{
    Account, Credentials, Node, NodeRole, NodeSpec, NodeStatus, Registry, Resources,
};

use super::Engine;

pub(crate) struct Harness {
    pub engine: Arc<Engine>,
    pub registry: Arc<Registry>,
    pub provisioner: Arc<MockProvisioner>,
    pub config: Config,
    messages: mpsc::Receiver<Message>,
    saves: mpsc::Receiver<()>,
}

/// Config with every wait shortened for tests
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.workflow.vm_status_retry = 3;
    config.workflow.vm_status_interval_secs = 0;
    config.workflow.post_action_sync_secs = 0;
    config.workflow.addon_retry = 2;
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let (notifier, messages) = Notifier::new(64);
        let (saver, saves) = SaveSignal::new();

        let engine = Engine::new(
            &config,
            registry.clone(),
            provisioner.clone(),
            notifier,
            saver,
        )
        .expect("engine");

        Self {
            engine,
            registry,
            provisioner,
            config,
            messages,
            saves,
        }
    }

    /// Register an installed, ready node directly
    pub async fn ready_node(&self, name: &str, role: NodeRole, capacity: Resources) -> Arc<Node> {
        let index = self.registry.node_count();
        let node = self
            .registry
            .add_node(Node::new(NodeSpec {
                name: name.to_string(),
                credentials: Credentials {
                    user: "root".to_string(),
                    password: "secret".to_string(),
                },
                role,
                address: format!("10.0.0.{}", index + 1),
                subnet: format!("192.168.{}.0/24", index),
            }))
            .expect("node");
        node.set_capacity(capacity, "centos").await;
        node.set_status(NodeStatus::Ready).await;
        node
    }

    /// Account with a contact target so notifications are delivered
    pub async fn account(&self, name: &str) -> Arc<Account> {
        let account = self.registry.ensure_account(name);
        account.set_contact(Some(format!("{}@lab", name))).await;
        account
    }

    pub async fn settle(&self) {
        assert!(
            self.engine.tasks().wait_idle(Duration::from_secs(5)).await,
            "workflow tasks did not finish"
        );
    }

    pub fn drain_messages(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = self.messages.try_recv() {
            out.push(m);
        }
        out
    }

    pub fn save_requested(&mut self) -> bool {
        self.saves.try_recv().is_ok()
    }
}
