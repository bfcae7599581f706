//! Storage object metadata returned by provider listings.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Image extensions (lowercase, without the dot) the pipeline knows how to
/// turn into manifest items.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "heic", "heif", "hif", "avif",
];

/// Companion video extension for live photos.
pub const LIVE_PHOTO_VIDEO_EXTENSION: &str = "mov";

/// Metadata for a single object in a storage backend.
///
/// Produced by provider listings and never persisted directly; it is only
/// used to derive manifest items and to diff against the previous manifest.
/// Optional fields are absent when the backend doesn't report them (the
/// GitHub provider has no modification times, for instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    /// Full key within the backend, `/`-separated.
    pub key: String,
    pub size: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
}
impl StorageObject {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: None,
            last_modified: None,
            etag: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_last_modified(mut self, modified: OffsetDateTime) -> Self {
        self.last_modified = Some(modified);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Everything before the final `/`, or `""` for keys at the root.
    pub fn directory(&self) -> &str {
        self.key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }

    /// Final path segment, extension included.
    pub fn file_name(&self) -> &str {
        self.key.rsplit_once('/').map(|(_, name)| name).unwrap_or(&self.key)
    }

    /// File name without its (last) extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rsplit_once('.') {
            // Dotfiles (".hidden") have no extension.
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Extension without the dot, as written in the key.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// `true` if the extension is one of [`SUPPORTED_IMAGE_EXTENSIONS`]
    /// (case-insensitive).
    pub fn is_image(&self) -> bool {
        self.extension()
            .is_some_and(|ext| SUPPORTED_IMAGE_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
    }

    /// `true` if this object could be the video half of a live photo.
    pub fn is_live_photo_video(&self) -> bool {
        self.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(LIVE_PHOTO_VIDEO_EXTENSION))
    }
}
