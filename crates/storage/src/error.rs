//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Object does not exist
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Network-related error (S3 connections, HTTP transport, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The backend refused the request because of its API quota.
    #[display("rate limited: {_0}")]
    RateLimited(#[error(not(source))] String),
    /// Key contains invalid characters or escapes the storage root
    #[display("invalid key: {_0}")]
    InvalidKey(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
    /// The configured provider cannot be constructed.
    #[display("storage configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::RateLimited(_) | Self::BackendError(_))
    }
}
