//! Background purge of abandoned uploads.
//!
//! A pending record whose client never finished the upload holds a name and
//! possibly a partial blob. The reaper removes such records once they are
//! older than the pending timeout.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use super::record::FileRepository;
use super::storage::StorageGateway;
use crate::config::ReaperConfig;
use crate::db::Database;
use crate::Result;

/// Default sweep interval in seconds (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Default age in seconds after which a pending upload is abandoned (24 hours).
pub const DEFAULT_PENDING_TIMEOUT_SECS: u64 = 86400;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending records removed.
    pub removed: usize,
    /// Blobs that could not be deleted (the record is removed regardless).
    pub storage_failures: usize,
    /// Records that could not be deleted.
    pub database_failures: usize,
}

/// Pending upload reaper.
pub struct PendingReaper {
    db: Arc<Database>,
    storage: Arc<dyn StorageGateway>,
    sweep_interval: Duration,
    pending_timeout: Duration,
}

impl PendingReaper {
    /// Create a new PendingReaper with default timings.
    pub fn new(db: Arc<Database>, storage: Arc<dyn StorageGateway>) -> Self {
        Self {
            db,
            storage,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            pending_timeout: Duration::from_secs(DEFAULT_PENDING_TIMEOUT_SECS),
        }
    }

    /// Create a PendingReaper with timings from configuration.
    pub fn from_config(
        db: Arc<Database>,
        storage: Arc<dyn StorageGateway>,
        config: &ReaperConfig,
    ) -> Self {
        Self::new(db, storage)
            .with_interval(config.interval_secs)
            .with_pending_timeout(config.pending_timeout_secs)
    }

    /// Set the sweep interval.
    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.sweep_interval = Duration::from_secs(interval_secs);
        self
    }

    /// Set the pending timeout.
    pub fn with_pending_timeout(mut self, timeout_secs: u64) -> Self {
        self.pending_timeout = Duration::from_secs(timeout_secs);
        self
    }

    /// Run the reaper loop.
    ///
    /// This method runs indefinitely; the first sweep happens immediately.
    pub async fn run(&self) {
        info!(
            "Pending upload reaper started (interval: {} seconds, timeout: {} seconds)",
            self.sweep_interval.as_secs(),
            self.pending_timeout.as_secs()
        );

        let mut timer = interval(self.sweep_interval);

        loop {
            timer.tick().await;
            if let Err(e) = self.sweep().await {
                error!("Pending upload sweep failed: {}", e);
            }
        }
    }

    /// Remove every pending record older than the timeout.
    ///
    /// Rows are deleted in one transaction, each guarded on still being
    /// pending so a file confirmed in the meantime survives. Blobs of the
    /// removed rows are deleted after commit.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut tx = self.db.begin_write().await?;

        let stale = FileRepository::list_stale_pending(&mut tx, self.pending_timeout.as_secs()).await?;
        if stale.is_empty() {
            debug!("No abandoned uploads");
            return Ok(report);
        }

        let mut removed = Vec::with_capacity(stale.len());
        for file in stale {
            match FileRepository::delete_pending(&mut tx, file.id).await {
                Ok(true) => removed.push(file),
                Ok(false) => debug!("File {} is no longer pending", file.id),
                Err(e) => {
                    error!("Failed to remove abandoned upload {}: {}", file.id, e);
                    report.database_failures += 1;
                }
            }
        }
        tx.commit().await?;

        for file in &removed {
            if let Err(e) = self.storage.delete(&file.storage_key).await {
                warn!(
                    "Failed to delete blob {} of abandoned upload {}: {}",
                    file.storage_key, file.id, e
                );
                report.storage_failures += 1;
            }
        }
        report.removed = removed.len();

        info!(
            "Removed {} abandoned upload(s) ({} storage failures, {} database failures)",
            report.removed, report.storage_failures, report.database_failures
        );
        Ok(report)
    }
}

/// Start the reaper as a background task.
pub fn start_reaper(reaper: PendingReaper) -> JoinHandle<()> {
    tokio::spawn(async move {
        reaper.run().await;
    })
}
