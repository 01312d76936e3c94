//! VM lease reaper

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::workflow::{Engine, VmAction};

/// Ages every leased VM by one period per tick
pub struct LifecycleReaper {
    engine: Arc<Engine>,
    config: LifecycleConfig,
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapSummary {
    pub warned: usize,
    pub deleted: usize,
}

impl LifecycleReaper {
    pub fn new(engine: Arc<Engine>, config: LifecycleConfig) -> Self {
        Self { engine, config }
    }

    pub async fn tick(&self) -> ReapSummary {
        let period = self.config.check_interval_secs as i64;
        let mut summary = ReapSummary::default();

        for account in self.engine.registry().accounts() {
            for vm in account.vms().await {
                if vm.lifetime() >= self.config.forever_secs {
                    continue;
                }
                let remaining = vm.extend_lifetime(-period);

                if remaining <= 0 {
                    info!(vm = %vm.name(), "Lease expired, deleting VM");
                    match self.engine.action_vm(&account, &vm, VmAction::Delete).await {
                        Ok(()) => summary.deleted += 1,
                        Err(e) => error!(vm = %vm.name(), "Expired VM delete failed: {}", e),
                    }
                } else if remaining < self.config.warning_threshold_secs {
                    let hours = (remaining + 3599) / 3600;
                    debug!(vm = %vm.name(), remaining, "Lease expiring soon");
                    self.engine
                        .notifier()
                        .notify_account(
                            &account,
                            format!(
                                "Your VM {} will be deleted in about {} hour(s)",
                                vm.name(),
                                hours
                            ),
                        )
                        .await;
                    summary.warned += 1;
                }
            }
            self.engine.saver().notify();
        }
        summary
    }
}

/// Run the reaper until `cancel` fires
///
/// The first tick comes one full period after start so a restart never ages
/// leases twice.
pub fn spawn_reaper(reaper: LifecycleReaper, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !reaper.config.enabled {
            info!("Lifecycle reaper disabled");
            return;
        }
        let period = reaper.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Lifecycle reaper started, checking every {}s", period.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = reaper.tick().await;
                    if summary.deleted > 0 || summary.warned > 0 {
                        warn!(deleted = summary.deleted, warned = summary.warned, "Lease check done");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Lifecycle reaper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeRole, Resources, VmStatus};
    use crate::workflow::testing::Harness;
    use crate::workflow::VmRequest;

    const HOUR: i64 = 3600;

    fn one_day_vm() -> VmRequest {
        VmRequest {
            os_type: "centos7".to_string(),
            flavor: Some("small".to_string()),
            number: 1,
            duration_days: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_warns_each_tick_then_deletes() {
        let mut h = Harness::new();
        let node = h
            .ready_node("n1", NodeRole::Compute, Resources::new(8, 16384, 200))
            .await;
        let alice = h.account("alice").await;
        let vm = h.engine.create_vms(&alice, one_day_vm()).await.unwrap().remove(0);
        h.settle().await;
        h.drain_messages();

        // 5 hours left
        vm.extend_lifetime(5 * HOUR - 24 * HOUR);
        let reaper = LifecycleReaper::new(h.engine.clone(), h.config.lifecycle.clone());

        for expected_left in [4, 3, 2, 1] {
            let summary = reaper.tick().await;
            assert_eq!(summary, ReapSummary { warned: 1, deleted: 0 });
            assert_eq!(vm.lifetime(), expected_left * HOUR);
            let messages = h.drain_messages();
            assert_eq!(messages.len(), 1);
            assert!(messages[0].text.contains("will be deleted"));
        }

        let summary = reaper.tick().await;
        assert_eq!(summary, ReapSummary { warned: 0, deleted: 1 });
        assert!(h
            .drain_messages()
            .iter()
            .all(|m| !m.text.contains("will be deleted")));
        assert_eq!(vm.status().await, VmStatus::Deleted);
        assert!(alice.vms().await.is_empty());
        assert_eq!(node.used(), Resources::default());
    }

    #[tokio::test]
    async fn test_long_leases_age_silently() {
        let mut h = Harness::new();
        let alice = h.account("alice").await;
        let vm = h.engine.create_vms(&alice, one_day_vm()).await.unwrap().remove(0);
        h.settle().await;
        h.drain_messages();

        let reaper = LifecycleReaper::new(h.engine.clone(), h.config.lifecycle.clone());
        reaper.tick().await;

        assert_eq!(vm.lifetime(), 23 * HOUR);
        assert!(h.drain_messages().is_empty());
    }

    #[tokio::test]
    async fn test_forever_vm_never_decremented() {
        let h = Harness::new();
        let alice = h.account("alice").await;
        let vm = h.engine.create_vms(&alice, one_day_vm()).await.unwrap().remove(0);
        h.settle().await;

        let forever = h.config.lifecycle.forever_secs;
        vm.extend_lifetime(forever - vm.lifetime());

        let reaper = LifecycleReaper::new(h.engine.clone(), h.config.lifecycle.clone());
        for _ in 0..50 {
            reaper.tick().await;
        }
        assert_eq!(vm.lifetime(), forever);
        assert_eq!(alice.vms().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_reaper_exits() {
        let h = Harness::new();
        let reaper = LifecycleReaper::new(h.engine.clone(), LifecycleConfig::default());
        let handle = spawn_reaper(reaper, CancellationToken::new());
        handle.await.unwrap();
    }
}
