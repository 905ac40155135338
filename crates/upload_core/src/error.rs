use shared::error::{ErrorKind, ErrorReport};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid upload url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid upload header '{name}'")]
    InvalidHeader { name: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("{rejected} file(s) exceed the maximum size of {max_size} bytes")]
    SizeExceeded { rejected: usize, max_size: u64 },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("upload controller must be created inside a tokio runtime")]
    NoRuntime,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            UploadError::Config(_) => ErrorKind::InvalidConfig,
            UploadError::NoRuntime => ErrorKind::Runtime,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string())
    }
}
