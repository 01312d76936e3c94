//! Node health supervisor

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::provisioner::HostUsage;
use crate::registry::NodeStatus;
use crate::workflow::{host_access, Engine};

/// Classify a usage report for a node with `cores` CPUs
pub fn classify(usage: &HostUsage, cores: i64, config: &SupervisorConfig) -> NodeStatus {
    let load_limit = cores as f64 * config.limit_cpu;
    let overloaded = usage.cpu_load > load_limit
        || usage.memory_avail < config.minimum_mem_mb
        || usage.disk_percent() > config.limit_disk_percent;

    if overloaded {
        NodeStatus::Overload
    } else if usage.engine_status != 0 {
        NodeStatus::Unhealth
    } else {
        NodeStatus::Ready
    }
}

pub struct HealthSupervisor {
    engine: Arc<Engine>,
    config: SupervisorConfig,
}

impl HealthSupervisor {
    pub fn new(engine: Arc<Engine>, config: SupervisorConfig) -> Self {
        Self { engine, config }
    }

    /// Probe every installed node once
    pub async fn tick(&self) {
        for node in self.engine.registry().nodes() {
            if !node.status().await.is_installed() {
                continue;
            }

            let host = host_access(&node);
            let status = match self.engine.provisioner().host_usage(&host).await {
                Ok(usage) => {
                    let status = classify(&usage, node.capacity().cpu, &self.config);
                    debug!(
                        node = %node.name(),
                        load = usage.cpu_load,
                        mem_avail = usage.memory_avail,
                        disk = %usage.disk_usage,
                        ?status,
                        "Node usage"
                    );
                    status
                }
                Err(e) => {
                    warn!(node = %node.name(), "Usage probe failed: {}", e);
                    NodeStatus::Unhealth
                }
            };

            let previous = node.status().await;
            if previous != status {
                info!(node = %node.name(), from = ?previous, to = ?status, "Node status changed");
            }
            node.set_status(status).await;
        }
        self.engine.saver().notify();
    }
}

pub fn spawn_supervisor(supervisor: HealthSupervisor, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !supervisor.config.enabled {
            info!("Health supervisor disabled");
            return;
        }
        let mut ticker = interval(supervisor.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Health supervisor started, checking every {}s",
            supervisor.config.check_interval_secs
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => supervisor.tick().await,
                _ = cancel.cancelled() => {
                    info!("Health supervisor shutting down");
                    break;
                }
            }
        }
    })
}
