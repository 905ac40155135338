use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use shared::domain::{FileKind, RecordId, UploadStatus};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// File content picked by the user, before any upload state is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub content: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_file_name(&self.name)
    }
}

/// One entry of the canonical list: a selected file plus its upload state.
///
/// Records are replaced by value on every change; `id` is the identity used to
/// match updates back to the list, so two submissions of the same file are
/// two distinct records.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: RecordId,
    pub file: Arc<SelectedFile>,
    pub status: UploadStatus,
    pub progress: f64,
    pub remote_url: Option<String>,
}

/// Ordered records, or `None` when no files are selected.
pub type FileListValue = Option<Vec<FileRecord>>;

impl FileRecord {
    /// Files without an upload path are accepted on the spot.
    pub fn new(file: Arc<SelectedFile>, needs_upload: bool) -> Self {
        let id = RecordId(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed));
        if needs_upload {
            Self {
                id,
                file,
                status: UploadStatus::Init,
                progress: 0.0,
                remote_url: None,
            }
        } else {
            Self {
                id,
                file,
                status: UploadStatus::Success,
                progress: 100.0,
                remote_url: None,
            }
        }
    }

    pub fn from_selection(files: Vec<SelectedFile>, needs_upload: bool) -> Vec<Self> {
        files
            .into_iter()
            .map(|file| Self::new(Arc::new(file), needs_upload))
            .collect()
    }

    pub fn in_progress(&self) -> Self {
        Self {
            status: UploadStatus::InProgress,
            ..self.clone()
        }
    }

    pub fn with_progress(&self, percent: f64) -> Self {
        Self {
            progress: percent.clamp(0.0, 100.0),
            ..self.clone()
        }
    }

    pub fn succeeded(&self, remote_url: Option<String>) -> Self {
        Self {
            status: UploadStatus::Success,
            progress: 100.0,
            remote_url,
            ..self.clone()
        }
    }

    pub fn failed(&self) -> Self {
        Self {
            status: UploadStatus::Fail,
            progress: 0.0,
            remote_url: None,
            ..self.clone()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
