//! Transport seam: moves one file to its destination and reports progress.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    multipart::{Form, Part},
    Body, Client, StatusCode,
};
use shared::{error::ErrorKind, protocol::UploadResponse};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::Url;

use crate::{error::ConfigError, record::SelectedFile};

pub const DEFAULT_FORM_DATA_KEY: &str = "file";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_millis(20_000);
const PROGRESS_CHUNK_BYTES: usize = 64 * 1024;

/// Receives upload progress as a percentage in `[0, 100]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("upload rejected with http status {0}")]
    Status(u16),
    #[error("upload request failed: {0}")]
    Network(String),
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
    #[error("upload request has been aborted")]
    Aborted,
    #[error("invalid upload response: {0}")]
    InvalidResponse(String),
    #[error("upload failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Every transport error settles the record as `Fail`.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransportFailure
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        file: Arc<SelectedFile>,
        on_progress: ProgressFn,
    ) -> Result<UploadResponse, TransportError>;

    /// Cancels whatever request is currently in flight, if any.
    fn abort(&self) {}
}

/// Accepts every file without network activity.
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn request(
        &self,
        _file: Arc<SelectedFile>,
        _on_progress: ProgressFn,
    ) -> Result<UploadResponse, TransportError> {
        Ok(UploadResponse {
            success: true,
            url: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    endpoint: Url,
    headers: HeaderMap,
    form_data_key: String,
    timeout: Duration,
}

impl HttpTransportConfig {
    pub fn new(endpoint: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(endpoint).map_err(|e| ConfigError::InvalidUrl {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: endpoint.to_string(),
                reason: "url must start with http:// or https://".to_string(),
            });
        }
        Ok(Self {
            endpoint: parsed,
            headers: HeaderMap::new(),
            form_data_key: DEFAULT_FORM_DATA_KEY.to_string(),
            timeout: DEFAULT_UPLOAD_TIMEOUT,
        })
    }

    /// Content-Type is skipped: the multipart encoder has to set it with its boundary.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            let name = name.as_ref();
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::InvalidHeader {
                    name: name.to_string(),
                }
            })?;
            if header_name == CONTENT_TYPE {
                continue;
            }
            let header_value =
                HeaderValue::from_str(value.as_ref()).map_err(|_| ConfigError::InvalidHeader {
                    name: name.to_string(),
                })?;
            self.headers.insert(header_name, header_value);
        }
        Ok(self)
    }

    pub fn with_form_data_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.form_data_key = key;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn form_data_key(&self) -> &str {
        &self.form_data_key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

struct InFlight {
    ticket: u64,
    cancel: oneshot::Sender<()>,
}

/// Multipart POST transport. One request in flight per instance: starting a
/// new request aborts the previous one.
pub struct HttpTransport {
    http: Client,
    config: HttpTransportConfig,
    in_flight: Mutex<Option<InFlight>>,
    next_ticket: AtomicU64,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: HttpTransportConfig) -> Self {
        Self {
            http,
            config,
            in_flight: Mutex::new(None),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> (u64, oneshot::Receiver<()>) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        let previous = self.slot().replace(InFlight { ticket, cancel });
        if let Some(previous) = previous {
            debug!(ticket = previous.ticket, "upload: superseding in-flight request");
            let _ = previous.cancel.send(());
        }
        (ticket, cancelled)
    }

    fn finish(&self, ticket: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|in_flight| in_flight.ticket == ticket) {
            slot.take();
        }
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.config.timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }

    async fn send(
        &self,
        file: Arc<SelectedFile>,
        on_progress: ProgressFn,
    ) -> Result<UploadResponse, TransportError> {
        let part = Part::stream_with_length(
            progress_body(file.content.clone(), on_progress),
            file.size(),
        )
        .file_name(file.name.clone());
        let form = Form::new().part(self.config.form_data_key.clone(), part);

        let response = self
            .http
            .post(self.config.endpoint.clone())
            .timeout(self.config.timeout)
            .multipart(form)
            .headers(self.config.headers.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        file: Arc<SelectedFile>,
        on_progress: ProgressFn,
    ) -> Result<UploadResponse, TransportError> {
        let (ticket, cancelled) = self.begin();
        info!(
            file = %file.name,
            size_bytes = file.size(),
            endpoint = %self.config.endpoint,
            "upload: sending file"
        );
        let outcome = tokio::select! {
            outcome = self.send(file, on_progress) => outcome,
            _ = cancelled => Err(TransportError::Aborted),
        };
        self.finish(ticket);
        outcome
    }

    fn abort(&self) {
        if let Some(in_flight) = self.slot().take() {
            debug!(ticket = in_flight.ticket, "upload: aborting in-flight request");
            let _ = in_flight.cancel.send(());
        }
    }
}

/// Streams `content` in fixed chunks, reporting the share handed to the
/// connection so far.
fn progress_body(content: Bytes, on_progress: ProgressFn) -> Body {
    let total = content.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(PROGRESS_CHUNK_BYTES)
        .map(|start| content.slice(start..(start + PROGRESS_CHUNK_BYTES).min(total)))
        .collect();
    let mut sent = 0usize;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        on_progress(sent as f64 / total as f64 * 100.0);
        Ok::<_, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

/// Which transport new records are uploaded through.
#[derive(Clone, Default)]
pub enum TransportSource {
    /// No endpoint: files are accepted without upload.
    #[default]
    None,
    /// Default HTTP transport, one instance per record.
    Http(HttpTransportConfig),
    /// Caller-supplied transport shared by every record.
    ///
    /// Removing a record calls `abort()` on this shared instance while other
    /// records may still be uploading through it, so an implementation should
    /// only cancel the request belonging to the removed record.
    Custom(Arc<dyn Transport>),
}

impl TransportSource {
    pub fn is_configured(&self) -> bool {
        !matches!(self, TransportSource::None)
    }

    pub(crate) fn instantiate(&self, http: &Client) -> Arc<dyn Transport> {
        match self {
            TransportSource::None => Arc::new(NoopTransport),
            TransportSource::Http(config) => {
                Arc::new(HttpTransport::with_client(http.clone(), config.clone()))
            }
            TransportSource::Custom(transport) => Arc::clone(transport),
        }
    }
}

impl fmt::Debug for TransportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSource::None => f.write_str("None"),
            TransportSource::Http(config) => f.debug_tuple("Http").field(config).finish(),
            TransportSource::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
