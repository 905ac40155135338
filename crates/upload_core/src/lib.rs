use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use reqwest::Client;
use shared::{
    domain::{RecordId, UploadPolicy, UploadStatus},
    error::ErrorKind,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod record;
pub mod transport;

pub use config::{load_options, UploadOptions};
pub use error::{ConfigError, UploadError};
pub use lifecycle::{UpdateSink, UploadTask};
pub use merge::{merge_file_value, MergeOutcome};
pub use record::{FileListValue, FileRecord, SelectedFile};
pub use transport::{
    HttpTransport, HttpTransportConfig, ProgressFn, Transport, TransportError, TransportSource,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What caused a `ValueChanged` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Submit,
    Remove,
    Upload,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Every mutation of the list, including each progress tick.
    ValueChanged {
        list: FileListValue,
        origin: ChangeOrigin,
    },
    /// Settled mutations only: a record reached `Success`/`Fail`, or a
    /// submission was accepted without upload.
    Finished { list: FileListValue },
    /// Validation failure, reported once per submission.
    Error(UploadError),
}

struct ControllerState {
    value: FileListValue,
    transport: TransportSource,
    tasks: HashMap<RecordId, UploadTask>,
    /// Listed records that have had a lifecycle, running or not.
    started: HashSet<RecordId>,
    finish_pending: bool,
}

struct ControllerShared {
    policy: UploadPolicy,
    runtime: Handle,
    http: Client,
    events: broadcast::Sender<UploadEvent>,
    finish_signal: Notify,
    state: Mutex<ControllerState>,
}

/// Owns the canonical file list and the uploads running for it.
///
/// Dropping the controller cancels every upload still in flight.
pub struct UploadController {
    shared: Arc<ControllerShared>,
    finish_publisher: JoinHandle<()>,
}

impl UploadController {
    /// Must be called from within a tokio runtime; uploads are spawned on it.
    pub fn new(policy: UploadPolicy, transport: TransportSource) -> Result<Self, UploadError> {
        Self::with_client(policy, transport, Client::new())
    }

    pub fn with_client(
        policy: UploadPolicy,
        transport: TransportSource,
        http: Client,
    ) -> Result<Self, UploadError> {
        let runtime = Handle::try_current().map_err(|_| UploadError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(ControllerShared {
            policy,
            runtime,
            http,
            events,
            finish_signal: Notify::new(),
            state: Mutex::new(ControllerState {
                value: None,
                transport,
                tasks: HashMap::new(),
                started: HashSet::new(),
                finish_pending: false,
            }),
        });
        let finish_publisher = shared
            .runtime
            .spawn(publish_finished(Arc::clone(&shared)));
        Ok(Self {
            shared,
            finish_publisher,
        })
    }

    pub fn from_options(options: &UploadOptions) -> Result<Self, UploadError> {
        Self::new(options.policy(), options.transport_source()?)
    }

    pub fn policy(&self) -> UploadPolicy {
        self.shared.policy
    }

    pub fn value(&self) -> FileListValue {
        self.shared.lock_state().value.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.shared.events.subscribe()
    }

    /// Adds newly selected files to the list and starts their uploads.
    pub fn submit(&self, files: Vec<SelectedFile>) {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let needs_upload = state.transport.is_configured();
        let candidates = FileRecord::from_selection(files, needs_upload);
        let submitted = candidates.len();

        let MergeOutcome { value, error } =
            merge_file_value(candidates, state.value.as_deref(), &shared.policy);
        if let Some(error) = error {
            warn!(error = %error, "upload: rejected part of submission");
            shared.emit(UploadEvent::Error(error));
        }
        state.value = value;
        info!(
            submitted,
            listed = state.value.as_ref().map_or(0, Vec::len),
            needs_upload,
            "upload: files submitted"
        );

        shared.emit(UploadEvent::ValueChanged {
            list: state.value.clone(),
            origin: ChangeOrigin::Submit,
        });
        if !needs_upload {
            shared.emit(UploadEvent::Finished {
                list: state.value.clone(),
            });
        }
        reconcile_tasks(shared, &mut state);
    }

    /// Removes the record at `index`, cancelling its upload. Returns `false`
    /// when there is no such record.
    pub fn remove(&self, index: usize) -> bool {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let Some(list) = state.value.as_mut() else {
            return false;
        };
        if index >= list.len() {
            return false;
        }
        let removed = list.remove(index);
        if list.is_empty() {
            state.value = None;
        }
        if let Some(task) = state.tasks.remove(&removed.id) {
            task.cancel();
        }
        debug!(record_id = %removed.id, file = %removed.file.name, "upload: record removed");

        shared.emit(UploadEvent::ValueChanged {
            list: state.value.clone(),
            origin: ChangeOrigin::Remove,
        });
        true
    }

    /// Replaces the list wholesale without emitting events. Uploads of records
    /// that are no longer listed are cancelled; `Init` records are started.
    ///
    /// A listed record is never moved back to an earlier status: when the
    /// incoming copy of a known id lags behind, the current record is kept.
    pub fn set_value(&self, value: FileListValue) {
        let mut state = self.shared.lock_state();
        let incoming = value.filter(|list| !list.is_empty()).map(|list| {
            list.into_iter()
                .map(|record| {
                    let current = state
                        .value
                        .iter()
                        .flatten()
                        .find(|item| item.id == record.id);
                    match current {
                        Some(current)
                            if current.is_terminal()
                                || stage(record.status) < stage(current.status) =>
                        {
                            debug!(
                                record_id = %record.id,
                                kind = ?ErrorKind::StaleUpdate,
                                status = %current.status,
                                "upload: keeping newer record over stale value"
                            );
                            current.clone()
                        }
                        _ => record,
                    }
                })
                .collect()
        });
        state.value = incoming;
        reconcile_tasks(&self.shared, &mut state);
    }

    /// Switches the transport used by uploads started from now on.
    pub fn set_transport(&self, transport: TransportSource) {
        debug!(transport = ?transport, "upload: transport replaced");
        self.shared.lock_state().transport = transport;
    }

    /// Cancels every running upload. The list itself is left untouched.
    pub fn shutdown(&self) {
        let tasks: Vec<UploadTask> = {
            let mut state = self.shared.lock_state();
            state.tasks.drain().map(|(_, task)| task).collect()
        };
        for task in &tasks {
            task.cancel();
        }
    }
}

impl Drop for UploadController {
    fn drop(&mut self) {
        self.shutdown();
        self.finish_publisher.abort();
    }
}

impl ControllerShared {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }

    fn flush_finished(&self) {
        let mut state = self.lock_state();
        if std::mem::take(&mut state.finish_pending) {
            self.emit(UploadEvent::Finished {
                list: state.value.clone(),
            });
        }
    }
}

impl UpdateSink for ControllerShared {
    fn apply(&self, record: FileRecord, finished: bool) {
        let mut state = self.lock_state();
        let Some(slot) = state
            .value
            .as_mut()
            .and_then(|list| list.iter_mut().find(|item| item.id == record.id))
        else {
            debug!(
                record_id = %record.id,
                kind = ?ErrorKind::StaleUpdate,
                "upload: dropping update for unlisted record"
            );
            return;
        };
        if slot.is_terminal() {
            debug!(
                record_id = %record.id,
                kind = ?ErrorKind::StaleUpdate,
                status = %slot.status,
                "upload: dropping update for settled record"
            );
            return;
        }
        if record.status == UploadStatus::InProgress
            && slot.status == UploadStatus::InProgress
            && record.progress < slot.progress
        {
            return;
        }
        *slot = record;

        self.emit(UploadEvent::ValueChanged {
            list: state.value.clone(),
            origin: ChangeOrigin::Upload,
        });
        if finished {
            state.finish_pending = true;
            self.finish_signal.notify_one();
        }
    }
}

/// Cancels uploads whose record left the list and starts one for every
/// `Init` record that has none yet.
fn reconcile_tasks(shared: &Arc<ControllerShared>, state: &mut ControllerState) {
    let listed: HashSet<RecordId> = state
        .value
        .iter()
        .flatten()
        .map(|record| record.id)
        .collect();
    state.tasks.retain(|id, task| {
        let keep = listed.contains(id) && !task.is_finished();
        if !listed.contains(id) {
            task.cancel();
        }
        keep
    });
    state.started.retain(|id| listed.contains(id));

    let pending: Vec<FileRecord> = state
        .value
        .iter()
        .flatten()
        .filter(|record| record.status == UploadStatus::Init)
        .filter(|record| !state.started.contains(&record.id))
        .cloned()
        .collect();
    for record in pending {
        state.started.insert(record.id);
        let transport = state.transport.instantiate(&shared.http);
        let sink: Arc<dyn UpdateSink> = Arc::clone(shared) as Arc<dyn UpdateSink>;
        debug!(record_id = %record.id, file = %record.file.name, "upload: starting");
        let task = lifecycle::spawn(&shared.runtime, record, transport, sink);
        state.tasks.insert(task.record_id(), task);
    }
}

fn stage(status: UploadStatus) -> u8 {
    match status {
        UploadStatus::Init => 0,
        UploadStatus::InProgress => 1,
        UploadStatus::Success | UploadStatus::Fail => 2,
    }
}

/// Publishes `Finished` one scheduling step after the settling update, so a
/// burst of settled updates yields one event carrying the final list.
async fn publish_finished(shared: Arc<ControllerShared>) {
    loop {
        shared.finish_signal.notified().await;
        tokio::task::yield_now().await;
        shared.flush_finished();
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
