//! Pool Error Types

use derive_more::{Display, Error};

/// A pool error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A worker process could not be started.
    #[display("failed to spawn worker process: {_0}")]
    Spawn(#[error(not(source))] String),
    /// Reading or writing a worker's pipes failed.
    #[display("worker I/O failed")]
    Io,
    /// A batch or reply could not be (de)serialized.
    #[display("malformed worker message")]
    Protocol,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::Io)
    }
}
