//! Periodic reclamation of stale published artifacts.
//!
//! A single process-wide task scans the downloads directory on a fixed
//! interval and deletes every entry whose modification time is older than
//! the retention window. Sweeping is best-effort housekeeping: read errors
//! are swallowed and retried on the next tick.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::metrics;

/// Spawn the retention sweeper. Runs until process exit; never joined.
pub fn spawn_retention_sweeper(
    downloads_dir: PathBuf,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    info!(
        "Retention sweeper enabled: deleting artifacts older than {}s every {}s",
        retention.as_secs(),
        interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first immediate tick, wait for the first interval.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(&downloads_dir, retention).await;
        }
    })
}

/// One sweep pass. Returns the number of entries deleted.
pub async fn sweep_once(downloads_dir: &Path, retention: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(downloads_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping sweep, cannot read {:?}: {}", downloads_dir, e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut deleted = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read downloads directory entry: {}", e);
                break;
            }
        };

        let path = entry.path();
        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Failed to read mtime of {:?}: {}", path, e);
                continue;
            }
        };

        // Entries with an mtime in the future are treated as fresh.
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= retention {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Swept stale artifact {:?} (age {}s)", path, age.as_secs());
                deleted += 1;
            }
            Err(e) => warn!("Failed to sweep {:?}: {}", path, e),
        }
    }

    if deleted > 0 {
        info!("Swept {} stale artifacts", deleted);
        metrics::record_artifacts_swept(deleted);
    }
    deleted
}
