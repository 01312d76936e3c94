//! Placement of VMs and software onto nodes
//!
//! Selection is a pure function over node snapshots. Reservation happens
//! right after selection under the scheduler's lock, so two concurrent
//! requests can never both pass the capacity filter for the same headroom.
//!
//! With the `weight` strategy, ties are broken in favour of the candidate
//! seen last. Snapshot order follows the registry's map order, so which of
//! two equally weighted nodes wins is not stable across runs.

pub mod scoring;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::registry::{Dimension, Node, NodeRole, NodeSnapshot, Registry, Resources};

pub use scoring::node_weight;

/// Default oversubscription ratio
pub const DEFAULT_ALLOCATION_RATIO: i64 = 2;

/// How to choose among nodes that fit a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Uniform pick among eligible nodes
    Random,
    /// Node with the most free capacity, by aggregate percentage
    #[default]
    Weight,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Strategy::Random),
            "weight" => Ok(Strategy::Weight),
            other => Err(format!("unknown scheduling algorithm '{}'", other)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Random => write!(f, "random"),
            Strategy::Weight => write!(f, "weight"),
        }
    }
}

/// Whether `node` can take `request` on top of what it already holds
pub fn fits(node: &NodeSnapshot, request: &Resources, ratio: i64) -> bool {
    Dimension::ALL
        .iter()
        .all(|&d| node.capacity.get(d) * ratio - node.used.get(d) >= request.get(d))
}

/// Pick a node for `request`, or `None` when nothing qualifies
pub fn select(
    nodes: &[NodeSnapshot],
    role: NodeRole,
    request: &Resources,
    ratio: i64,
    strategy: Strategy,
) -> Option<String> {
    let candidates: Vec<&NodeSnapshot> = nodes
        .iter()
        .filter(|n| n.is_eligible(role) && fits(n, request, ratio))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    let chosen = match strategy {
        Strategy::Random => *candidates.choose(&mut rand::thread_rng())?,
        Strategy::Weight => {
            let mut best: Option<(&NodeSnapshot, f64)> = None;
            for node in candidates {
                let weight = node_weight(node, ratio);
                debug!(node = %node.name, weight, "Scored candidate");
                match best {
                    Some((_, w)) if scoring::compare_weights(weight, w).is_lt() => {}
                    _ => best = Some((node, weight)),
                }
            }
            best?.0
        }
    };

    Some(chosen.name.clone())
}

/// Serializes select-then-reserve across every workload kind
#[derive(Debug)]
pub struct Scheduler {
    ratio: i64,
    strategy: Strategy,
    lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(ratio: i64, strategy: Strategy) -> Self {
        Self {
            ratio,
            strategy,
            lock: Mutex::new(()),
        }
    }

    pub fn ratio(&self) -> i64 {
        self.ratio
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Choose a node and reserve `request` on it
    ///
    /// The returned node already carries the reservation; the caller owns
    /// releasing it.
    pub async fn schedule_and_reserve(
        &self,
        registry: &Registry,
        role: NodeRole,
        request: Resources,
    ) -> Option<Arc<Node>> {
        let _guard = self.lock.lock().await;

        let snapshots = registry.node_snapshots().await;
        let name = select(&snapshots, role, &request, self.ratio, self.strategy)?;
        let node = registry.node(&name)?;
        node.reserve(&request);

        info!(
            node = %name,
            cpu = request.cpu,
            memory = request.memory,
            disk = request.disk,
            "Reserved capacity"
        );
        Some(node)
    }

    /// Hold off placements while the caller checks and changes capacity
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOCATION_RATIO, Strategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Credentials, NodeSpec, NodeState, NodeStatus};

    fn snapshot(name: &str, capacity: Resources, used: Resources) -> NodeSnapshot {
        NodeSnapshot {
            name: name.to_string(),
            role: NodeRole::Compute,
            address: "10.0.0.1".to_string(),
            subnet: "192.168.0.0/24".to_string(),
            os_type: String::new(),
            status: NodeStatus::Ready,
            state: NodeState::Enable,
            capacity,
            used,
        }
    }

    async fn ready_node(registry: &Registry, name: &str, capacity: Resources) {
        let node = registry
            .add_node(Node::new(NodeSpec {
                name: name.to_string(),
                credentials: Credentials {
                    user: "root".to_string(),
                    password: "pw".to_string(),
                },
                role: NodeRole::Compute,
                address: "10.0.0.1".to_string(),
                subnet: format!("192.168.{}.0/24", name.len()),
            }))
            .unwrap();
        node.set_capacity(capacity, "linux").await;
        node.set_status(NodeStatus::Ready).await;
    }

    #[test]
    fn test_filter_excludes_wrong_role_disabled_and_not_ready() {
        let cap = Resources::new(8, 16384, 200);
        let mut wrong_role = snapshot("a", cap, Resources::default());
        wrong_role.role = NodeRole::Container;
        let mut disabled = snapshot("b", cap, Resources::default());
        disabled.state = NodeState::Disable;
        let mut overloaded = snapshot("c", cap, Resources::default());
        overloaded.status = NodeStatus::Overload;

        let nodes = vec![wrong_role, disabled, overloaded];
        let req = Resources::new(1, 1, 1);
        assert_eq!(select(&nodes, NodeRole::Compute, &req, 2, Strategy::Weight), None);
    }

    #[test]
    fn test_filter_applies_ratio() {
        let node = snapshot("a", Resources::new(2, 2048, 30), Resources::new(3, 0, 0));
        // 2*2 - 3 = 1 cpu left
        assert!(fits(&node, &Resources::new(1, 100, 10), 2));
        assert!(!fits(&node, &Resources::new(2, 100, 10), 2));
        assert!(!fits(&node, &Resources::new(1, 100, 10), 1));
    }

    #[test]
    fn test_weight_picks_most_free() {
        let cap = Resources::new(8, 16384, 200);
        let nodes = vec![
            snapshot("busy", cap, Resources::new(6, 8000, 100)),
            snapshot("idle", cap, Resources::default()),
            snapshot("half", cap, Resources::new(4, 4096, 60)),
        ];
        let req = Resources::new(2, 2048, 30);

        for _ in 0..10 {
            assert_eq!(
                select(&nodes, NodeRole::Compute, &req, 2, Strategy::Weight).as_deref(),
                Some("idle")
            );
        }
    }

    #[test]
    fn test_weight_tie_goes_to_last_candidate() {
        let cap = Resources::new(8, 16384, 200);
        let nodes = vec![
            snapshot("first", cap, Resources::default()),
            snapshot("second", cap, Resources::default()),
        ];
        let req = Resources::new(1, 1, 1);
        assert_eq!(
            select(&nodes, NodeRole::Compute, &req, 2, Strategy::Weight).as_deref(),
            Some("second")
        );
    }

    #[test]
    fn test_random_only_returns_eligible() {
        let cap = Resources::new(8, 16384, 200);
        let nodes = vec![
            snapshot("full", cap, Resources::new(16, 32768, 400)),
            snapshot("free", cap, Resources::default()),
        ];
        let req = Resources::new(1, 1, 1);
        for _ in 0..20 {
            assert_eq!(
                select(&nodes, NodeRole::Compute, &req, 2, Strategy::Random).as_deref(),
                Some("free")
            );
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("weight".parse::<Strategy>(), Ok(Strategy::Weight));
        assert_eq!("random".parse::<Strategy>(), Ok(Strategy::Random));
        assert!("bestfit".parse::<Strategy>().is_err());
    }

    #[tokio::test]
    async fn test_schedule_reserves_capacity() {
        let registry = Registry::new();
        ready_node(&registry, "node-1", Resources::new(8, 16384, 200)).await;
        let scheduler = Scheduler::new(2, Strategy::Weight);

        let node = scheduler
            .schedule_and_reserve(&registry, NodeRole::Compute, Resources::new(4, 4096, 60))
            .await
            .unwrap();

        assert_eq!(node.used(), Resources::new(4, 4096, 60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_schedules_never_exceed_capacity() {
        let registry = Arc::new(Registry::new());
        // 4 cpu * ratio 2 = room for exactly 4 requests of 2 cpu
        ready_node(&registry, "node-1", Resources::new(4, 65536, 1000)).await;
        let scheduler = Arc::new(Scheduler::new(2, Strategy::Weight));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler
                        .schedule_and_reserve(
                            &registry,
                            NodeRole::Compute,
                            Resources::new(2, 1024, 10),
                        )
                        .await
                        .is_some()
                })
            })
            .collect();

        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }

        let node = registry.node("node-1").unwrap();
        assert_eq!(granted, 4);
        assert_eq!(node.get_used(Dimension::Cpu), 8);
        assert!(node.get_used(Dimension::Cpu) <= node.capacity().cpu * 2);
    }
}
