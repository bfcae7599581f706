//! Builder Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A builder error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for builder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Only [`Listing`](Self::Listing), [`Persist`](Self::Persist) and
/// [`Scheduler`](Self::Scheduler) ever escape a build; the rest are
/// per-photo and end up as a `failed` outcome or a missing preview.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The storage listing failed; there is nothing safe to build from.
    #[display("failed to list storage objects")]
    Listing,
    /// The manifest could not be written.
    #[display("failed to write manifest {}", _0.display())]
    Persist(#[error(not(source))] PathBuf),
    /// Worker processes could not be started or driven.
    #[display("multi-process scheduling failed")]
    Scheduler,
    /// The object's bytes could not be fetched.
    #[display("failed to fetch {_0}")]
    Fetch(#[error(not(source))] String),
    /// The object isn't an image the codec can read.
    #[display("failed to read image {_0}")]
    Decode(#[error(not(source))] String),
    /// A preview could not be rendered or stored.
    #[display("failed to generate preview")]
    Thumbnail,
    /// A blocking image task panicked or was cancelled.
    #[display("image task did not complete")]
    Blocking,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Listing | Self::Scheduler | Self::Fetch(_) | Self::Persist(_))
    }
}
