//! Manifest reconciliation: load, merge, deletion detection and persistence.

use crate::error::{ErrorKind, Result};
use crate::model::{Outcome, PhotoManifestItem, ProcessPhotoResult};
use crate::thumbnail::ThumbnailStore;
use exn::ResultExt;
use std::collections::HashSet;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

/// Per-run counters. Failures are counted but never published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: usize,
    pub new: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
    pub live_photos: usize,
}

/// Read the previous manifest. A missing or unreadable file is a first run,
/// never an error.
pub async fn load(path: &Path) -> Vec<PhotoManifestItem> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No existing manifest; starting from scratch");
            return Vec::new();
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Existing manifest is unreadable; starting from scratch");
            return Vec::new();
        },
    };
    match serde_json::from_slice::<Vec<PhotoManifestItem>>(&bytes) {
        Ok(items) => {
            tracing::info!(path = %path.display(), count = items.len(), "Loaded existing manifest");
            items
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Existing manifest is malformed; starting from scratch");
            Vec::new()
        },
    }
}

/// The new manifest is exactly the non-failed items of this run, in task
/// order.
pub fn merge(results: Vec<ProcessPhotoResult>) -> (Vec<PhotoManifestItem>, Tally) {
    let mut tally = Tally {
        total: results.len(),
        ..Tally::default()
    };
    let mut items = Vec::with_capacity(results.len());
    for result in results {
        match result.outcome {
            Outcome::New => tally.new += 1,
            Outcome::Processed => tally.processed += 1,
            Outcome::Skipped => tally.skipped += 1,
            Outcome::Failed => tally.failed += 1,
        }
        if let Some(item) = result.item {
            tally.live_photos += usize::from(item.is_live_photo);
            items.push(item);
        }
    }
    (items, tally)
}

/// Count previous items whose key is gone from storage and remove their
/// previews. Preview removal is best-effort.
pub async fn detect_deletions(previous: &[PhotoManifestItem], live_keys: &HashSet<&str>, thumbnails: &ThumbnailStore) -> usize {
    let mut deleted = 0;
    for item in previous.iter().filter(|item| !live_keys.contains(item.storage_key.as_str())) {
        deleted += 1;
        let removed = thumbnails.remove(&item.id).await;
        tracing::info!(key = %item.storage_key, preview_removed = removed, "Photo removed from storage");
    }
    deleted
}

/// Newest first. Ties fall back to the storage key so the order never
/// depends on scheduling.
pub fn sort(items: &mut [PhotoManifestItem]) {
    items.sort_by(|a, b| b.date_taken.cmp(&a.date_taken).then_with(|| a.storage_key.cmp(&b.storage_key)));
}

/// Sort and write the manifest in one atomic replace, creating the parent
/// directory if needed.
pub async fn save(path: &Path, items: &mut [PhotoManifestItem]) -> Result<()> {
    sort(items);
    let mut json = serde_json::to_vec_pretty(&*items).or_raise(|| ErrorKind::Persist(path.to_path_buf()))?;
    json.push(b'\n');
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Persist(path.to_path_buf()))?;
    }
    // Rename is atomic on the same filesystem; readers never see half a file.
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, &json).await.or_raise(|| ErrorKind::Persist(path.to_path_buf()))?;
    tokio::fs::rename(&staging, path).await.or_raise(|| ErrorKind::Persist(path.to_path_buf()))?;
    tracing::info!(path = %path.display(), count = items.len(), "Saved manifest");
    Ok(())
}
