//! Debounced, superseding persistence of serialized snapshots.
//!
//! Snapshots go to a worker task over a channel. Each one restarts the
//! debounce window and replaces whatever was pending, so only the newest
//! content inside a window is written. Identical content is not rewritten.
//! Write failures are logged and dropped; the next snapshot tries again.

use core_config::AutosaveConfig;
use core_services::PersistenceService;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
enum Request {
    Snapshot(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutosaveStats {
    pub writes: u64,
    pub failures: u64,
    /// Snapshots replaced by a newer one before being written.
    pub superseded: u64,
    /// Snapshots skipped because they matched the last write.
    pub unchanged: u64,
}

/// Sending half held by the editor. Dropping every handle flushes the
/// pending snapshot and stops the worker.
#[derive(Debug, Clone)]
pub struct AutosaveHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl AutosaveHandle {
    /// Queue `content`. Returns `false` once the worker is gone.
    pub fn submit(&self, content: String) -> bool {
        self.tx.send(Request::Snapshot(content)).is_ok()
    }

    /// Write the pending snapshot now and wait for it.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Request::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

struct AutosaveWorker<P> {
    persistence: P,
    document_id: String,
    debounce: Duration,
    rx: mpsc::UnboundedReceiver<Request>,
    pending: Option<String>,
    last_written: Option<String>,
    stats: AutosaveStats,
}

/// Start the worker on the current runtime.
pub fn spawn_autosave<P>(
    persistence: P,
    document_id: impl Into<String>,
    cfg: &AutosaveConfig,
) -> (JoinHandle<AutosaveStats>, AutosaveHandle)
where
    P: PersistenceService + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = AutosaveWorker {
        persistence,
        document_id: document_id.into(),
        debounce: cfg.debounce(),
        rx,
        pending: None,
        last_written: None,
        stats: AutosaveStats::default(),
    };
    (tokio::spawn(worker.run()), AutosaveHandle { tx })
}

impl<P: PersistenceService> AutosaveWorker<P> {
    async fn run(mut self) -> AutosaveStats {
        info!(target: "blocks.autosave", document_id = %self.document_id, debounce_ms = self.debounce.as_millis() as u64, "autosave_started");
        let mut deadline: Option<Instant> = None;
        loop {
            let request = match deadline {
                Some(at) => tokio::select! {
                    biased;
                    request = self.rx.recv() => request,
                    _ = sleep_until(at) => {
                        deadline = None;
                        self.write_pending().await;
                        continue;
                    }
                },
                None => self.rx.recv().await,
            };
            match request {
                Some(Request::Snapshot(content)) => {
                    if self.pending.replace(content).is_some() {
                        self.stats.superseded += 1;
                        trace!(target: "blocks.autosave", "snapshot_superseded");
                    }
                    deadline = Some(Instant::now() + self.debounce);
                }
                Some(Request::Flush(ack)) => {
                    deadline = None;
                    self.write_pending().await;
                    let _ = ack.send(());
                }
                None => {
                    self.write_pending().await;
                    break;
                }
            }
        }
        info!(target: "blocks.autosave", writes = self.stats.writes, failures = self.stats.failures, superseded = self.stats.superseded, "autosave_stopped");
        self.stats
    }

    async fn write_pending(&mut self) {
        let Some(content) = self.pending.take() else {
            return;
        };
        if self.last_written.as_deref() == Some(content.as_str()) {
            self.stats.unchanged += 1;
            trace!(target: "blocks.autosave", "snapshot_unchanged");
            return;
        }
        match self.persistence.save(&self.document_id, &content).await {
            Ok(()) => {
                self.stats.writes += 1;
                debug!(target: "blocks.autosave", bytes = content.len(), "snapshot_written");
                self.last_written = Some(content);
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!(target: "blocks.autosave", error = %e, "snapshot_dropped");
            }
        }
    }
}
