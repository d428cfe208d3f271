use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{FileId, MessageId};

/// Coarse classification of a [`ProviderError`], stable across the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotOpen,
    Transport,
    UpstreamRead,
    UnknownMessageType,
    UnimplementedOperation,
    InvalidRequest,
    Timeout,
    Internal,
}

/// Errors produced on either side of the worker boundary.
///
/// Errors are `Clone` so a single failed wire request can be fanned out to
/// every caller that was coalesced onto it.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("file {0} is not open")]
    NotOpen(FileId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("read of {file_id} failed: {cause}")]
    UpstreamRead { file_id: FileId, cause: Arc<io::Error> },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("operation not implemented: {0}")]
    UnimplementedOperation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request {id} timed out after {after:?}")]
    Timeout { id: MessageId, after: Duration },

    #[error("worker handler failed: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn upstream(file_id: &FileId, err: io::Error) -> Self {
        ProviderError::UpstreamRead {
            file_id: file_id.clone(),
            cause: Arc::new(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotOpen(_) => ErrorKind::NotOpen,
            ProviderError::Transport(_) => ErrorKind::Transport,
            ProviderError::UpstreamRead { .. } => ErrorKind::UpstreamRead,
            ProviderError::UnknownMessageType(_) => ErrorKind::UnknownMessageType,
            ProviderError::UnimplementedOperation(_) => ErrorKind::UnimplementedOperation,
            ProviderError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ProviderError::Timeout { .. } => ErrorKind::Timeout,
            ProviderError::Internal(_) => ErrorKind::Internal,
        }
    }
}
