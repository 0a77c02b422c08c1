use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::domain::storage::Bucket;

/// Error type shared by every pipeline boundary: storage, database, codecs.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("transient I/O failure: {context}")]
    TransientIo { context: String },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("invalid asset: {0}")]
    Validation(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("object `{path}` already exists in bucket `{bucket}`")]
    Conflict { bucket: Bucket, path: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already in progress")]
    InProgress(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("cancelled before start")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn transient(context: impl Into<String>) -> Self {
        Self::TransientIo {
            context: context.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether re-invoking the same operation without user intervention can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientIo { .. } | Self::Timeout { .. } | Self::Database(_) | Self::Cancelled => {
                true
            }
            Self::Validation(_)
            | Self::ResourceExhausted(_)
            | Self::Conflict { .. }
            | Self::NotFound(_)
            | Self::InProgress(_) => false,
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => Self::transient(io.to_string()),
            other => Self::validation(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::ResourceExhausted(format!("worker task failed: {}", err))
    }
}

/// Runs a network-bound future under a deadline; elapsed time maps to a retryable error.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { operation, after }),
    }
}
