//! Storage provider trait and implementations.
//!
//! This module defines the `StorageProvider` trait, which provides a unified
//! capability surface over the backends photos can live in (S3-compatible
//! services, GitHub repositories, the local filesystem).
//!

#[cfg(feature = "github")]
mod github;
mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "github")]
pub use self::github::GitHubProvider;
pub use self::local::LocalProvider;
#[cfg(feature = "mock")]
pub use self::mock::MockProvider;
#[cfg(feature = "s3")]
pub use self::s3::S3Provider;
use crate::error::{ErrorKind, Result};
use crate::live::{self, LivePhotoMap};
use crate::object::StorageObject;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

/// Boxed stream of listed objects, as returned by [`StorageProvider::list_stream()`].
pub type ObjectStream<'a> = Pin<Box<dyn Stream<Item = Result<StorageObject>> + Send + 'a>>;

/// Listings stop after this many objects unless the provider is configured
/// otherwise.
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Join a public base URL and an object key, percent-encoding each key
/// segment but keeping the `/` separators.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
}

/// Unified interface for photo storage backends.
///
/// Only the operations the manifest builder needs are exposed: listing,
/// fetching, public URL generation and live photo pairing. This is not a
/// general purpose object storage client.
///
/// # Failure semantics
/// - Listing failures are returned as errors and are meant to be fatal to a
///   build; there is no safe partial state to build from.
/// - [`get_file()`](Self::get_file) never fails: a missing object or a
///   transport error is logged and surfaces as `None`, so a single bad
///   object can't take the whole batch down. Use [`read()`](Self::read) when
///   the error itself matters.
///
/// # Examples
///
/// ```
/// use prism_storage::{StorageProvider, error::Result};
///
/// async fn total_image_bytes(provider: &dyn StorageProvider) -> Result<u64> {
///     let images = provider.list_images().await?;
///     Ok(images.iter().filter_map(|object| object.size).sum())
/// }
/// ```
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Name of the configured provider (used for logging only).
    fn name(&self) -> &str;

    /// Key prefix acting as the root of the photo collection, if any.
    /// Listed keys include it.
    fn prefix(&self) -> Option<&str> {
        None
    }

    /// Maximum number of objects a listing returns.
    fn list_limit(&self) -> usize {
        DEFAULT_LIST_LIMIT
    }

    /// Stream every object under the configured root, transparently walking
    /// through backend pagination. Errors end the listing.
    fn list_stream(&self) -> ObjectStream<'_>;

    /// Full listing under the configured root, no filtering.
    ///
    /// Stops at [`list_limit()`](Self::list_limit); running into the limit
    /// is logged and the truncated set is returned.
    async fn list_all_files(&self) -> Result<Vec<StorageObject>> {
        let limit = self.list_limit();
        let mut stream = self.list_stream();
        let mut objects = Vec::new();
        while let Some(object) = stream.try_next().await? {
            if objects.len() >= limit {
                tracing::warn!(provider = self.name(), limit, "Listing exceeds object limit; continuing with a truncated set");
                break;
            }
            objects.push(object);
        }
        tracing::debug!(provider = self.name(), count = objects.len(), "Listed objects");
        Ok(objects)
    }

    /// Same as [`list_all_files()`](Self::list_all_files), restricted to
    /// supported image extensions (case-insensitive).
    async fn list_images(&self) -> Result<Vec<StorageObject>> {
        let objects = self.list_all_files().await?;
        Ok(objects.into_iter().filter(StorageObject::is_image).collect())
    }

    /// Read the complete contents of an object.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Fetch raw bytes, or `None` if the object can't be fetched for any
    /// reason. The cause is logged.
    async fn get_file(&self, key: &str) -> Option<Vec<u8>> {
        match self.read(key).await {
            Ok(bytes) => Some(bytes),
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => {
                tracing::warn!(provider = self.name(), key, "Object not found");
                None
            },
            Err(e) => {
                tracing::error!(provider = self.name(), key, error = ?e, "Failed to fetch object");
                None
            },
        }
    }

    /// Externally reachable URL for `key`. Pure and deterministic; a custom
    /// domain always wins over the backend's own URL scheme.
    fn generate_public_url(&self, key: &str) -> String;

    /// Pair images in `objects` with their `.mov` companions.
    fn detect_live_photos(&self, objects: &[StorageObject]) -> LivePhotoMap {
        let pairs = live::detect(objects);
        tracing::debug!(provider = self.name(), pairs = pairs.len(), "Detected live photos");
        pairs
    }
}
