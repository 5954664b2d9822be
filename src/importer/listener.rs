use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::errors::IngestError;

/// Progress line every this many imported blocks.
const PROGRESS_EVERY: u64 = 100;

/// Observer of an import run.
///
/// Notifications arrive from whichever task produced them; implementations handle their
/// own synchronization. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait ImportListener: Send + Sync {
    fn on_import_started(&self, hash: &str, height: u64) {}

    fn on_queue_changed(&self, depth: usize) {}

    fn on_imported(&self, hash: &str, height: u64) {}

    /// The node does not have the next height yet; polling starts.
    fn on_source_depleted(&self) {}

    fn on_finished(&self) {}

    /// The run was stopped from outside before it finished.
    fn on_cancelled(&self) {}

    fn on_error(&self, cause: &IngestError, last_hash: Option<&str>) {}
}

/// Listener that ignores every event.
pub struct NoopListener;

impl ImportListener for NoopListener {}

/// Logs every event through `tracing`.
pub struct LogListener {
    imported: AtomicU64,
    window: Mutex<(Instant, u64)>,
}

impl LogListener {
    #[must_use]
    pub fn new() -> Self {
        Self {
            imported: AtomicU64::new(0),
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    fn log_progress(&self, imported: u64, height: u64) {
        let Ok(mut window) = self.window.lock() else {
            return;
        };
        let (since, base) = *window;
        let elapsed = since.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let rate = if elapsed > 0.0 {
            imported.saturating_sub(base) as f64 / elapsed
        } else {
            0.0
        };
        info!("[importer] {imported} blocks imported, at height {height} ({rate:.1} blocks/s)");
        *window = (Instant::now(), imported);
    }
}

impl Default for LogListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportListener for LogListener {
    fn on_import_started(&self, hash: &str, height: u64) {
        debug!("[importer] importing block {height} ({hash})");
    }

    fn on_queue_changed(&self, depth: usize) {
        debug!("[importer] storage queue depth {depth}");
    }

    fn on_imported(&self, hash: &str, height: u64) {
        debug!("[importer] imported block {height} ({hash})");
        let imported = self.imported.fetch_add(1, Ordering::Relaxed) + 1;
        if imported % PROGRESS_EVERY == 0 {
            self.log_progress(imported, height);
        }
    }

    fn on_source_depleted(&self) {
        info!("[importer] reached the node's tip, waiting for new blocks");
    }

    fn on_finished(&self) {
        info!(
            "[importer] import finished, {} blocks imported",
            self.imported.load(Ordering::Relaxed)
        );
    }

    fn on_cancelled(&self) {
        info!(
            "[importer] import cancelled after {} blocks",
            self.imported.load(Ordering::Relaxed)
        );
    }

    fn on_error(&self, cause: &IngestError, last_hash: Option<&str>) {
        error!(
            "[importer] import failed: {cause} (last block hash: {})",
            last_hash.unwrap_or("none")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_listener_counts_imports() {
        let listener = LogListener::new();
        for height in 0..250 {
            listener.on_imported("0xabc", height);
        }
        assert_eq!(listener.imported.load(Ordering::Relaxed), 250);
        let (_, base) = *listener.window.lock().unwrap();
        assert_eq!(base, 200);
    }

    #[test]
    fn test_noop_listener_accepts_everything() {
        let listener = NoopListener;
        listener.on_import_started("0x1", 1);
        listener.on_error(&IngestError::Cancelled, None);
        listener.on_finished();
    }
}
