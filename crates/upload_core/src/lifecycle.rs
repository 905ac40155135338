//! Per-record upload state machine: `Init -> InProgress -> Success | Fail`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use shared::domain::{RecordId, UploadStatus};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    record::FileRecord,
    transport::{ProgressFn, Transport},
};

/// Receives record snapshots from running lifecycles.
///
/// `finished` marks a settled outcome; progress ticks and the
/// `Init -> InProgress` transition are published with `finished == false`.
pub trait UpdateSink: Send + Sync {
    fn apply(&self, record: FileRecord, finished: bool);
}

/// Handle to one running upload. Cancelling it guarantees no further update
/// for the record reaches the sink.
pub struct UploadTask {
    record_id: RecordId,
    cancelled: Arc<AtomicBool>,
    transport: Arc<dyn Transport>,
    handle: JoinHandle<()>,
}

impl UploadTask {
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) || self.handle.is_finished() {
            return;
        }
        debug!(record_id = %self.record_id, "upload: cancelling in-flight upload");
        self.transport.abort();
        self.handle.abort();
    }
}

/// Starts the lifecycle for `record` on `runtime`. Records that are not in
/// `Init` produce no updates.
pub fn spawn(
    runtime: &Handle,
    record: FileRecord,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn UpdateSink>,
) -> UploadTask {
    let record_id = record.id;
    let cancelled = Arc::new(AtomicBool::new(false));
    let lifecycle = Lifecycle::new(record, Arc::clone(&cancelled), sink);
    let handle = runtime.spawn(lifecycle.run(Arc::clone(&transport)));
    UploadTask {
        record_id,
        cancelled,
        transport,
        handle,
    }
}

struct Lifecycle {
    snapshot: Mutex<FileRecord>,
    cancelled: Arc<AtomicBool>,
    sink: Arc<dyn UpdateSink>,
}

impl Lifecycle {
    fn new(record: FileRecord, cancelled: Arc<AtomicBool>, sink: Arc<dyn UpdateSink>) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(record),
            cancelled,
            sink,
        })
    }

    fn snapshot(&self) -> MutexGuard<'_, FileRecord> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>, transport: Arc<dyn Transport>) {
        let started = {
            let mut snapshot = self.snapshot();
            if snapshot.status != UploadStatus::Init {
                return;
            }
            let next = snapshot.in_progress();
            *snapshot = next.clone();
            next
        };
        let record_id = started.id;
        let file = Arc::clone(&started.file);
        self.publish(started, false);

        let on_progress: ProgressFn = {
            let lifecycle = Arc::clone(&self);
            Arc::new(move |percent| lifecycle.report_progress(percent))
        };
        let outcome = transport.request(Arc::clone(&file), on_progress).await;

        // The record may have been removed while the request was pending.
        if self.is_cancelled() {
            debug!(record_id = %record_id, "upload: discarding result after teardown");
            return;
        }

        let settled = {
            let mut snapshot = self.snapshot();
            let next = match outcome {
                Ok(response) if response.success => {
                    info!(record_id = %record_id, file = %file.name, "upload: succeeded");
                    snapshot.succeeded(response.url)
                }
                Ok(_) => {
                    warn!(
                        record_id = %record_id,
                        file = %file.name,
                        "upload: rejected by destination"
                    );
                    snapshot.failed()
                }
                Err(err) => {
                    warn!(
                        record_id = %record_id,
                        file = %file.name,
                        kind = ?err.kind(),
                        error = %err,
                        "upload: failed"
                    );
                    snapshot.failed()
                }
            };
            *snapshot = next.clone();
            next
        };
        self.publish(settled, true);
    }

    fn report_progress(&self, percent: f64) {
        if self.is_cancelled() || !percent.is_finite() {
            return;
        }
        let next = {
            let mut snapshot = self.snapshot();
            if snapshot.status != UploadStatus::InProgress || percent < snapshot.progress {
                return;
            }
            let next = snapshot.with_progress(percent);
            *snapshot = next.clone();
            next
        };
        self.publish(next, false);
    }

    fn publish(&self, record: FileRecord, finished: bool) {
        if self.is_cancelled() {
            return;
        }
        self.sink.apply(record, finished);
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
