//! Registry persistence
//!
//! Mutating code paths call [`SaveSignal::notify`], which never blocks and
//! coalesces: any number of notifications between two saves produce a single
//! write. The save loop writes a JSON snapshot of the whole registry at most
//! once per sync period, and once more on shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::{Registry, RegistryRecord};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("State file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file format error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Coalescing "a save is pending" flag
#[derive(Clone, Debug)]
pub struct SaveSignal {
    tx: mpsc::Sender<()>,
}

impl SaveSignal {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Request a save. A pending request absorbs this one.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// JSON snapshot file for a registry
pub struct Store {
    path: PathBuf,
    registry: Arc<Registry>,
    port_range: (u16, u16),
}

impl Store {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<Registry>, port_range: (u16, u16)) -> Self {
        Self {
            path: path.into(),
            registry,
            port_range,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restore the registry from disk
    ///
    /// Returns `false` when no state file exists yet.
    pub async fn load(&self) -> Result<bool, PersistenceError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting empty", self.path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let record: RegistryRecord = serde_json::from_slice(&data)?;
        info!(
            nodes = record.nodes.len(),
            accounts = record.accounts.len(),
            "Loaded state from {}",
            self.path.display()
        );
        self.registry.restore(record, self.port_range);
        Ok(true)
    }

    /// Write the current registry, replacing the file atomically
    pub async fn save(&self) -> Result<(), PersistenceError> {
        let record = self.registry.to_record().await;
        let data = serde_json::to_vec_pretty(&record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

/// Save whenever a request is pending, checking once per `period`
pub fn spawn_save_loop(
    store: Arc<Store>,
    mut requests: mpsc::Receiver<()>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("State sync started, period={}s", period.as_secs());
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if requests.try_recv().is_ok() {
                        if let Err(e) = store.save().await {
                            error!("Failed to save state: {}", e);
                        }
                    }
                }
            }
        }

        if let Err(e) = store.save().await {
            error!("Failed to save state on shutdown: {}", e);
        }
        info!("State sync exited");
    })
}
