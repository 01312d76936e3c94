//! Background workflow tasks
//!
//! Workflows hand their long-running part to a detached tokio task. The
//! tracker counts outstanding work (tasks plus synchronous actions in flight)
//! and gives each task a child cancellation token. Tokens only interrupt the
//! waits between polls; a provisioner call already in flight runs to
//! completion.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    outstanding: Arc<AtomicI64>,
    root: CancellationToken,
}

/// Counts as one outstanding task until dropped
#[derive(Debug)]
pub struct TaskGuard {
    outstanding: Arc<AtomicI64>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self) -> TaskGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            outstanding: self.outstanding.clone(),
        }
    }

    /// Spawn a detached task; it counts as outstanding from this call on
    pub fn spawn<F, Fut>(&self, name: &'static str, f: F) -> JoinHandle<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = self.guard();
        let fut = f(self.root.child_token());
        tokio::spawn(async move {
            let _guard = guard;
            debug!(task = name, "Workflow task started");
            fut.await;
            debug!(task = name, "Workflow task finished");
        })
    }

    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Cancel the waits of every task spawned so far and in future
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Wait until nothing is outstanding, up to `timeout`
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.outstanding() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

/// Sleep for `duration` unless `cancel` fires first; `false` when cancelled
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts() {
        let tracker = TaskTracker::new();
        let a = tracker.guard();
        let b = tracker.guard();
        assert_eq!(tracker.outstanding(), 2);
        drop(a);
        assert_eq!(tracker.outstanding(), 1);
        drop(b);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_spawn_counts_until_done() {
        let tracker = TaskTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tracker.spawn("test", |_| async move {
            let _ = rx.await;
        });
        assert_eq!(tracker.outstanding(), 1);

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_interrupts_pause() {
        let tracker = TaskTracker::new();
        let handle = tracker.spawn("sleeper", |cancel| async move {
            assert!(!pause(Duration::from_secs(3600), &cancel).await);
        });

        tracker.cancel_all();
        handle.await.unwrap();
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
    }
}
