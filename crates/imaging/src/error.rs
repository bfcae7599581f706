//! Imaging Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An imaging error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for imaging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The bytes are not in any format this codec understands.
    #[display("unsupported image format: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// The format was recognised but the image could not be decoded.
    #[display("failed to decode image")]
    Decode,
    /// The preview could not be encoded.
    #[display("failed to encode preview")]
    Encode,
    /// The EXIF block is present but unreadable.
    #[display("malformed EXIF data")]
    Exif,
    /// The placeholder hash could not be computed.
    #[display("failed to compute blurhash: {_0}")]
    Hash(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Bytes in, bytes out: the same input always fails the same way.
        false
    }
}
