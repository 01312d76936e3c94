//! Best-effort account notifications
//!
//! Producers push onto a bounded queue and never wait. When the queue is full
//! the message is dropped with a warning. A dispatcher task drains the queue
//! into a [`NotificationSink`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::Account;

/// Default notification queue depth
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub target: String,
    pub text: String,
}

/// Delivers messages to their final destination
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &Message) -> anyhow::Result<()>;
}

/// Sink that only writes messages to the log
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, message: &Message) -> anyhow::Result<()> {
        info!(target_id = %message.target, "Notification: {}", message.text);
        Ok(())
    }
}

/// Producer handle for the notification queue
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Message>,
    domain: Option<String>,
}

impl Notifier {
    pub fn new(queue_size: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        (Self { tx, domain: None }, rx)
    }

    /// Domain appended to account names that have no explicit contact
    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    /// Queue a message, dropping it if the queue is full
    pub fn send(&self, target: impl Into<String>, text: impl Into<String>) {
        let message = Message {
            target: target.into(),
            text: text.into(),
        };
        if let Err(e) = self.tx.try_send(message) {
            match e {
                mpsc::error::TrySendError::Full(m) => {
                    warn!(target_id = %m.target, "Notification queue full, dropping message")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("Notification queue closed, dropping message")
                }
            }
        }
    }

    /// Queue a message for an account's contact target
    pub async fn notify_account(&self, account: &Account, text: impl Into<String>) {
        match account.notification_target(self.domain.as_deref()).await {
            Some(target) => self.send(target, text),
            None => debug!(account = %account.name(), "No notification target, skipping"),
        }
    }
}

/// Drain the queue into `sink` until cancelled or all producers are gone
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<Message>,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Notification dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = sink.deliver(&message).await {
                        warn!(target_id = %message.target, "Notification delivery failed: {}", e);
                    }
                }
            }
        }
        info!("Notification dispatcher exited");
    })
}
