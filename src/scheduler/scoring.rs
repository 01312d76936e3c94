//! Node scoring for weighted placement
//!
//! A node's weight is the sum, over cpu, memory and disk, of the percentage
//! of its oversubscribed capacity that is still free. An idle node scores
//! 300, a full one 0. Higher is better.

use std::cmp::Ordering;

use crate::registry::{Dimension, NodeSnapshot};

/// Free percentage of one dimension after applying `ratio`
///
/// A dimension with no capacity contributes nothing.
pub fn free_percent(capacity: i64, used: i64, ratio: i64) -> f64 {
    let total = capacity * ratio;
    if total <= 0 {
        return 0.0;
    }
    (total - used) as f64 / total as f64 * 100.0
}

/// Aggregate free percentage, rounded to 2 decimals
pub fn node_weight(node: &NodeSnapshot, ratio: i64) -> f64 {
    let sum: f64 = Dimension::ALL
        .iter()
        .map(|&d| free_percent(node.capacity.get(d), node.used.get(d), ratio))
        .sum();
    (sum * 100.0).round() / 100.0
}

/// Compare two weights, treating NaN as equal
pub fn compare_weights(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeRole, NodeState, NodeStatus, Resources};

    fn snapshot(capacity: Resources, used: Resources) -> NodeSnapshot {
        NodeSnapshot {
            name: "n".to_string(),
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

    #[test]
    fn test_idle_node_scores_full() {
        let node = snapshot(Resources::new(8, 16384, 200), Resources::default());
        assert_eq!(node_weight(&node, 2), 300.0);
    }

    #[test]
    fn test_partially_used_node() {
        // cpu 4/16 used, mem 4096/32768 used, disk 60/400 used
        let node = snapshot(Resources::new(8, 16384, 200), Resources::new(4, 4096, 60));
        assert_eq!(node_weight(&node, 2), 75.0 + 87.5 + 85.0);
    }

    #[test]
    fn test_zero_capacity_dimension_contributes_nothing() {
        let node = snapshot(Resources::new(4, 0, 100), Resources::default());
        assert_eq!(node_weight(&node, 1), 200.0);
    }

    #[test]
    fn test_weight_is_rounded() {
        let node = snapshot(Resources::new(3, 0, 0), Resources::new(1, 0, 0));
        // 2/3 free = 66.666..
        assert_eq!(node_weight(&node, 1), 66.67);
    }
}
