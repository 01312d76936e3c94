//! Node subnet route controller
//!
//! With the `hostgw` network type every node routes each other node's subnet
//! via that node's address. The full table is pushed to all nodes whenever
//! the set of installed subnets changes.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::provisioner::{Route, RouteUpdate};
use crate::workflow::Engine;

const HOST_GATEWAY: &str = "hostgw";

pub struct RouteController {
    engine: Arc<Engine>,
    config: NetworkConfig,
    /// Subnets of the last successful push, sorted
    pushed: Vec<String>,
}

impl RouteController {
    pub fn new(engine: Arc<Engine>, config: NetworkConfig) -> Self {
        Self {
            engine,
            config,
            pushed: Vec::new(),
        }
    }

    /// Push routes if the installed subnet set changed; true when pushed
    pub async fn tick(&mut self) -> bool {
        let mut hosts = Vec::new();
        let mut routes = Vec::new();
        for node in self.engine.registry().nodes() {
            if !node.status().await.is_installed() {
                continue;
            }
            let credentials = node.credentials();
            hosts.push([
                node.address().to_string(),
                credentials.user.clone(),
                credentials.password.clone(),
            ]);
            routes.push(Route {
                subnet: node.subnet().to_string(),
                via: node.address().to_string(),
            });
        }
        routes.sort_by(|a, b| a.subnet.cmp(&b.subnet));

        let subnets: Vec<String> = routes.iter().map(|r| r.subnet.clone()).collect();
        if subnets == self.pushed {
            return false;
        }
        if self.config.network_type != HOST_GATEWAY {
            debug!(network_type = %self.config.network_type, "Route push skipped");
            return false;
        }

        let update = RouteUpdate {
            hosts,
            routes,
            action: "route".to_string(),
        };
        match self.engine.provisioner().update_routes(&update).await {
            Ok(()) => {
                info!(subnets = subnets.len(), "Node routes updated");
                self.pushed = subnets;
                true
            }
            Err(e) => {
                warn!("Route update failed: {}", e);
                false
            }
        }
    }
}

pub fn spawn_route_controller(
    mut controller: RouteController,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(controller.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Route controller started, checking every {}s",
            controller.config.check_interval_secs
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    controller.tick().await;
                }
                _ = cancel.cancelled() => {
                    info!("Route controller shutting down");
                    break;
                }
            }
        }
    })
}
