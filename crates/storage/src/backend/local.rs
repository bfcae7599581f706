//! Local filesystem storage provider.
//!
//! Photos are read from a configured directory using `tokio::fs`. Keys are
//! `/`-separated paths relative to that directory on every platform.

use crate::backend::{DEFAULT_LIST_LIMIT, ObjectStream, join_url};
use crate::error::{ErrorKind, Result};
use crate::{StorageObject, StorageProvider, path::validate as validate_key};
use async_stream::stream;
use async_trait::async_trait;
use prism_config::LocalConfig;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(StorageObject),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage provider.
///
/// # Examples
///
/// ```no_run
/// use prism_config::LocalConfig;
/// use prism_storage::backend::LocalProvider;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = LocalProvider::new("local", &LocalConfig {
///     root: "/srv/photos".into(),
///     base_url: Some("https://photos.example.com".to_string()),
///     max_objects: None,
/// }).map_err(|e| format!("{e:?}"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalProvider {
    name: String,
    /// Root directory of the photo collection
    root: PathBuf,
    base_url: Option<String>,
    list_limit: usize,
}
impl LocalProvider {
    /// Create a new local filesystem provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not absolute, or exists but is not a
    /// directory. A missing root is not an error; it lists as empty.
    pub fn new(name: impl Into<String>, config: &LocalConfig) -> Result<Self> {
        let root = config.root.clone();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::Configuration(format!("local root must be absolute: {}", root.display())));
        }
        if root.exists() && !root.is_dir() {
            exn::bail!(ErrorKind::Configuration(format!("local root is not a directory: {}", root.display())));
        }
        Ok(Self {
            name: name.into(),
            root,
            base_url: config.base_url.clone(),
            list_limit: config.max_objects.unwrap_or(DEFAULT_LIST_LIMIT),
        })
    }

    /// Validate a key and join it onto the root directory.
    fn absolute_path(&self, key: &str) -> Result<PathBuf> {
        let validated = validate_key(key)?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path under the root back into a `/`-separated key.
    fn key_for(&self, absolute: &Path) -> Result<String> {
        let relative = absolute.strip_prefix(&self.root).map_err(|_| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => match segment.to_str() {
                    Some(s) => segments.push(s),
                    None => exn::bail!(ErrorKind::InvalidKey(relative.to_string_lossy().into_owned())),
                },
                _ => exn::bail!(ErrorKind::InvalidKey(relative.to_string_lossy().into_owned())),
            }
        }
        validate_key(segments.join("/"))
    }

    fn object(key: String, metadata: &Metadata) -> StorageObject {
        StorageObject {
            key,
            size: Some(metadata.len()),
            last_modified: metadata.modified().ok().map(OffsetDateTime::from),
            etag: None,
        }
    }

    fn map_io_error(e: std::io::Error, key: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(key.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(key.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Classify a directory entry. Kept out of the stream body so errors can
    /// use `?`.
    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::map_io_error(e, &path.to_string_lossy()))?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(Self::object(self.key_for(&path)?, &metadata)));
        }
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_limit(&self) -> usize {
        self.list_limit
    }

    fn list_stream(&self) -> ObjectStream<'_> {
        let mut stack = vec![self.root.clone()];
        Box::pin(stream! {
            while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Same as an empty bucket.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current.to_string_lossy())));
                        return;
                    },
                };
                let mut batch = Vec::new();
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => batch.push(entry),
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(Self::map_io_error(e, &current.to_string_lossy())));
                            return;
                        },
                    }
                }
                // read_dir order is platform dependent.
                batch.sort_by_key(DirEntry::file_name);
                let mut subdirs = Vec::new();
                for entry in batch {
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(object)) => yield Ok(object),
                        Ok(WalkEntry::Descend(dir)) => subdirs.push(dir),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    }
                }
                stack.extend(subdirs.into_iter().rev());
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.absolute_path(key)?;
        Ok(fs::read(&path).await.map_err(|e| Self::map_io_error(e, key))?)
    }

    fn generate_public_url(&self, key: &str) -> String {
        match &self.base_url {
            Some(base) => join_url(base, key),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}
