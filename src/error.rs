//! Error taxonomy for the tutor core.
//!
//! Each component has its own error enum; [`Error`] wraps them and
//! [`Error::kind`] maps every failure onto the small set of outcomes the
//! surrounding web layer reports to callers.

use serde::Serialize;
use thiserror::Error;

/// Main error type for core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Content extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported source type: {0}")]
    UnsupportedType(String),

    #[error("failed to decode {kind} document: {message}")]
    DecodeFailure { kind: &'static str, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn decode(kind: &'static str, message: impl ToString) -> Self {
        ExtractError::DecodeFailure {
            kind,
            message: message.to_string(),
        }
    }
}

/// Errors surfaced by an embedding model.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding credentials missing or rejected: {0}")]
    AuthMissing(String),

    #[error("embedding provider rate limited: {0}")]
    RateLimited(String),

    #[error("embedding transport failure: {0}")]
    Transport(String),

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding request timed out after {0}s")]
    Timeout(u64),
}

/// Vector store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store temporarily unavailable: {0}")]
    Transient(String),

    #[error("store consistency error: {0}")]
    Permanent(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Transient(err.to_string())
            }
            sqlx::Error::Database(db) => {
                let msg = db.message().to_ascii_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    StoreError::Transient(err.to_string())
                } else {
                    StoreError::Permanent(err.to_string())
                }
            }
            _ => StoreError::Permanent(err.to_string()),
        }
    }
}

/// Errors surfaced by a completion model.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("completion credentials missing or rejected: {0}")]
    AuthMissing(String),

    #[error("completion transport failure: {0}")]
    Transport(String),

    #[error("malformed completion response: {0}")]
    Malformed(String),

    #[error("completion provider is disabled")]
    Disabled,

    #[error("completion request timed out after {0}s")]
    Timeout(u64),
}

/// Object store errors.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

/// User-visible outcome of a core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Ok,
    UnsupportedType,
    DecodeFailed,
    TransientUnavailable,
    PermanentInternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Ok => "ok",
            ErrorKind::UnsupportedType => "unsupported_type",
            ErrorKind::DecodeFailed => "decode_failed",
            ErrorKind::TransientUnavailable => "transient_unavailable",
            ErrorKind::PermanentInternalError => "permanent_internal_error",
        }
    }
}

impl Error {
    /// Classify this error into the caller-facing outcome set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Extract(ExtractError::UnsupportedType(_)) => ErrorKind::UnsupportedType,
            Error::Extract(ExtractError::DecodeFailure { .. }) => ErrorKind::DecodeFailed,
            Error::Extract(ExtractError::Io(_)) => ErrorKind::DecodeFailed,
            Error::Embed(e) => match e {
                EmbedError::RateLimited(_) | EmbedError::Transport(_) | EmbedError::Timeout(_) => {
                    ErrorKind::TransientUnavailable
                }
                EmbedError::AuthMissing(_) | EmbedError::Malformed(_) | EmbedError::Disabled => {
                    ErrorKind::PermanentInternalError
                }
            },
            Error::Store(StoreError::Transient(_)) => ErrorKind::TransientUnavailable,
            Error::Store(_) => ErrorKind::PermanentInternalError,
            Error::Completion(CompletionError::Transport(_) | CompletionError::Timeout(_)) => {
                ErrorKind::TransientUnavailable
            }
            Error::Completion(_) => ErrorKind::PermanentInternalError,
            Error::Blob(BlobError::Io(_)) => ErrorKind::TransientUnavailable,
            Error::Blob(_) => ErrorKind::PermanentInternalError,
            Error::InvalidRequest(_) => ErrorKind::PermanentInternalError,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
