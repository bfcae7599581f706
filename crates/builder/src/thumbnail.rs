//! On-disk preview artifacts, one file per photo id.
//!
//! Whether a preview file exists is part of the reuse decision, so this is
//! the only place that knows how ids map to paths and URLs.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    dir: PathBuf,
    url_prefix: String,
    extension: String,
}

impl ThumbnailStore {
    /// Previews for id `x` live at `dir/x.{extension}` and are served from
    /// `url_prefix/x.{extension}`.
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, id: &str) -> String {
        format!("{id}.{}", self.extension)
    }

    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(self.file_name(id))
    }

    pub fn url(&self, id: &str) -> String {
        format!("{}/{}", self.url_prefix.trim_end_matches('/'), self.file_name(id))
    }

    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.path(id)).await.unwrap_or(false)
    }

    /// Contents of an existing preview, `None` if there isn't a readable one.
    pub async fn read(&self, id: &str) -> Option<Vec<u8>> {
        match tokio::fs::read(self.path(id)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(id, error = %e, "Existing preview is unreadable");
                None
            },
        }
    }

    pub async fn write(&self, id: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.or_raise(|| ErrorKind::Thumbnail)?;
        tokio::fs::write(self.path(id), bytes).await.or_raise(|| ErrorKind::Thumbnail)
    }

    /// Best-effort removal; returns whether a file was actually deleted.
    pub async fn remove(&self, id: &str) -> bool {
        match tokio::fs::remove_file(self.path(id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == IoErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(id, error = %e, "Failed to remove stale preview");
                false
            },
        }
    }
}
