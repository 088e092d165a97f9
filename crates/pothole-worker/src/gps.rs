//! Latest GPS fix shared between the feed reader and persistence.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pothole_models::GpsFix;

/// Delay before re-reading a feed that reached end of file.
const FEED_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Single-slot cache of the most recent fix.
///
/// Writers replace the whole fix under the lock and readers clone it, so a
/// reader never sees coordinates from two different fixes.
#[derive(Debug, Clone, Default)]
pub struct GpsTracker {
    slot: Arc<RwLock<GpsFix>>,
}

impl GpsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, fix: GpsFix) {
        match self.slot.write() {
            Ok(mut slot) => *slot = fix,
            Err(poisoned) => *poisoned.into_inner() = fix,
        }
    }

    pub fn snapshot(&self) -> GpsFix {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply one feed line. Blank and malformed lines are ignored.
    pub fn apply_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        match serde_json::from_str::<GpsFix>(line) {
            Ok(fix) => {
                self.update(fix);
                true
            }
            Err(e) => {
                debug!("Ignoring malformed GPS line: {}", e);
                false
            }
        }
    }

    /// Follow a JSON-lines fix feed until `shutdown` flips to true.
    ///
    /// The file is tailed: after reaching the end the reader waits for more
    /// lines instead of stopping.
    pub fn spawn_feed(&self, path: PathBuf, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    warn!("GPS feed {} unavailable: {}", path.display(), e);
                    return;
                }
            };
            info!("Reading GPS fixes from {}", path.display());

            let mut reader = BufReader::new(file);
            let mut line = String::new();
            let mut had_fix = false;

            loop {
                if *shutdown.borrow() {
                    break;
                }
                line.clear();
                let read = tokio::select! {
                    _ = shutdown.changed() => break,
                    read = reader.read_line(&mut line) => read,
                };

                match read {
                    Ok(0) => {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(FEED_POLL_INTERVAL) => {}
                        }
                    }
                    Ok(_) => {
                        if tracker.apply_line(&line) {
                            let has_fix = tracker.snapshot().has_fix();
                            if has_fix != had_fix {
                                info!(has_fix, "GPS fix state changed");
                                had_fix = has_fix;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("GPS feed read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("GPS feed reader stopped");
        })
    }
}
