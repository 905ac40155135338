//! Test doubles shared by the lifecycle and controller tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::protocol::UploadResponse;
use tokio::sync::{mpsc, oneshot};

use crate::{
    lifecycle::UpdateSink,
    record::{FileRecord, SelectedFile},
    transport::{ProgressFn, Transport, TransportError},
};

type Outcome = Result<UploadResponse, TransportError>;

struct PendingRequest {
    on_progress: ProgressFn,
    resolve: oneshot::Sender<Outcome>,
}

/// Transport whose requests stay pending until the test resolves them by
/// file name. Every started request is announced on the returned receiver.
pub(crate) struct ScriptedTransport {
    pending: Mutex<HashMap<String, PendingRequest>>,
    started: mpsc::UnboundedSender<String>,
    aborts: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (started, started_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            started,
            aborts: AtomicUsize::new(0),
        });
        (transport, started_rx)
    }

    pub(crate) fn progress(&self, name: &str, percent: f64) {
        let on_progress = self
            .pending
            .lock()
            .expect("pending lock")
            .get(name)
            .map(|pending| Arc::clone(&pending.on_progress))
            .expect("request is pending");
        on_progress(percent);
    }

    /// Returns `false` when the request was already torn down.
    pub(crate) fn resolve(&self, name: &str, outcome: Outcome) -> bool {
        let pending = self
            .pending
            .lock()
            .expect("pending lock")
            .remove(name)
            .expect("request is pending");
        pending.resolve.send(outcome).is_ok()
    }

    pub(crate) fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        file: Arc<SelectedFile>,
        on_progress: ProgressFn,
    ) -> Result<UploadResponse, TransportError> {
        let (resolve, outcome) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(
            file.name.clone(),
            PendingRequest {
                on_progress,
                resolve,
            },
        );
        let _ = self.started.send(file.name.clone());
        outcome.await.unwrap_or(Err(TransportError::Aborted))
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    updates: Mutex<Vec<(FileRecord, bool)>>,
}

impl RecordingSink {
    pub(crate) fn updates(&self) -> Vec<(FileRecord, bool)> {
        self.updates.lock().expect("updates lock").clone()
    }
}

impl UpdateSink for RecordingSink {
    fn apply(&self, record: FileRecord, finished: bool) {
        self.updates.lock().expect("updates lock").push((record, finished));
    }
}

pub(crate) fn selected(name: &str, size: usize) -> SelectedFile {
    SelectedFile::new(name, vec![7u8; size])
}

/// Lets spawned tasks run until `done` holds, failing after a bounded wait.
pub(crate) async fn run_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
