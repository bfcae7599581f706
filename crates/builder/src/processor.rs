//! Per-photo decision and transformation pipeline.
//!
//! For every image object the processor either reuses the previous manifest
//! entry untouched (nothing is fetched) or fetches the bytes and derives a
//! fresh entry:
//!
//! 1. **Skip check**: known, unchanged and not forced → `skipped`.
//! 2. **Fetch** the object; a missing object → `failed`.
//! 3. **Probe** dimensions; unreadable bytes → `failed`.
//! 4. **EXIF**, from the preprocessed bytes first and the original second.
//!    Failures only cost the EXIF block.
//! 5. **Preview + blurhash**, reusing an existing preview file unless
//!    previews are being regenerated. Failures only cost the preview.
//! 6. **Live photo** fields from the paired video, if any.
//! 7. **Assemble**, keeping user-curated fields of the previous entry.
//!
//! Every failure is converted into an [`Outcome`](crate::Outcome) here, so the
//! scheduler never sees an error.

use crate::error::{ErrorKind, Result};
use crate::flags::RunFlags;
use crate::model::{PhotoManifestItem, ProcessPhotoResult, aspect_ratio, default_tags, photo_id};
use crate::thumbnail::ThumbnailStore;
use exn::{OptionExt, ResultExt};
use prism_imaging::{ImageCodec, ImageInfo, PhotoExif};
use prism_storage::{BackendHandle, StorageObject};
use std::borrow::Cow;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Decide whether `existing` can be reused as-is for `object`.
///
/// An object is changed when it was modified after the recorded entry. Backends
/// without modification times (git) fall back to comparing sizes; an object
/// with neither is never treated as changed.
pub fn should_skip(object: &StorageObject, existing: &PhotoManifestItem, flags: RunFlags, preview_exists: bool) -> bool {
    if flags.recomputes_all() {
        return false;
    }
    let changed = match object.last_modified {
        Some(modified) => modified > existing.last_modified,
        None => object.size.is_some_and(|size| size != existing.size_bytes),
    };
    !changed && (!flags.force_thumbnails || preview_exists)
}

struct Analysis {
    /// Bytes the codec can decode: preprocessed if conversion was needed.
    image: Vec<u8>,
    info: ImageInfo,
    exif: Option<PhotoExif>,
}

/// Turns storage objects into manifest items.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Processor {
    storage: BackendHandle,
    codec: Arc<dyn ImageCodec>,
    thumbnails: ThumbnailStore,
    flags: RunFlags,
}

impl Processor {
    pub fn new(storage: BackendHandle, codec: Arc<dyn ImageCodec>, thumbnails: ThumbnailStore, flags: RunFlags) -> Self {
        Self {
            storage,
            codec,
            thumbnails,
            flags,
        }
    }

    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    pub fn thumbnails(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    /// Process a single image object. Never fails: errors are logged and
    /// reported as a `failed` outcome.
    #[instrument(level = "debug", skip_all, fields(key = %object.key))]
    pub async fn process(
        &self,
        object: &StorageObject,
        existing: Option<&PhotoManifestItem>,
        live_video: Option<&StorageObject>,
    ) -> ProcessPhotoResult {
        let id = photo_id(&object.key);
        if let Some(existing) = existing {
            let preview_exists = match self.flags.force_thumbnails {
                true => self.thumbnails.exists(&id).await,
                false => true,
            };
            if should_skip(object, existing, self.flags, preview_exists) {
                tracing::trace!("Unchanged; reusing manifest entry");
                return ProcessPhotoResult::skipped(existing.clone());
            }
        }
        match self.process_inner(&id, object, existing, live_video).await {
            Ok(item) => ProcessPhotoResult::computed(item, existing.is_some()),
            Err(e) => {
                tracing::error!(key = %object.key, error = ?e, "Failed to process photo");
                ProcessPhotoResult::failed()
            },
        }
    }

    async fn process_inner(
        &self,
        id: &str,
        object: &StorageObject,
        existing: Option<&PhotoManifestItem>,
        live_video: Option<&StorageObject>,
    ) -> Result<PhotoManifestItem> {
        let original = self
            .storage
            .get_file(&object.key)
            .await
            .ok_or_raise(|| ErrorKind::Fetch(object.key.clone()))?;
        let size_bytes = object.size.unwrap_or(original.len() as u64);

        let codec = Arc::clone(&self.codec);
        let key = object.key.clone();
        let analysis = tokio::task::spawn_blocking(move || analyse(codec.as_ref(), original, &key))
            .await
            .or_raise(|| ErrorKind::Blocking)??;
        let Analysis { image, info, exif } = analysis;

        let (thumbnail_url, blur_hash) = self.preview(id, image).await.unzip();

        let now = OffsetDateTime::now_utc();
        let date_taken = exif
            .as_ref()
            .and_then(PhotoExif::captured_at)
            .or(object.last_modified)
            .unwrap_or(now);
        let mut item = PhotoManifestItem {
            id: id.to_string(),
            title: object.stem().to_string(),
            description: String::new(),
            date_taken,
            views: 0,
            tags: default_tags(object, self.storage.prefix()),
            original_url: self.storage.generate_public_url(&object.key),
            thumbnail_url,
            blur_hash,
            width: info.width,
            height: info.height,
            aspect_ratio: aspect_ratio(info.width, info.height),
            storage_key: object.key.clone(),
            last_modified: object.last_modified.unwrap_or(now),
            size_bytes,
            exif,
            is_live_photo: live_video.is_some(),
            live_photo_video_url: live_video.map(|video| self.storage.generate_public_url(&video.key)),
            live_photo_video_key: live_video.map(|video| video.key.clone()),
        };
        if let Some(existing) = existing {
            item.keep_curated(existing);
        }
        tracing::debug!(width = info.width, height = info.height, format = %info.format, "Processed photo");
        Ok(item)
    }

    /// Preview URL and blurhash, or `None` if neither could be produced.
    async fn preview(&self, id: &str, image: Vec<u8>) -> Option<(String, String)> {
        if !self.flags.regenerates_previews()
            && let Some(existing) = self.thumbnails.read(id).await
        {
            let codec = Arc::clone(&self.codec);
            match tokio::task::spawn_blocking(move || codec.hash_preview(&existing)).await {
                Ok(Ok(hash)) => return Some((self.thumbnails.url(id), hash)),
                Ok(Err(e)) => tracing::warn!(id, error = ?e, "Existing preview can't be hashed; regenerating"),
                Err(e) => tracing::warn!(id, error = %e, "Preview hashing did not complete; regenerating"),
            }
        }
        match self.render(id, image).await {
            Ok(preview) => Some(preview),
            Err(e) => {
                tracing::warn!(id, error = ?e, "Failed to generate preview");
                None
            },
        }
    }

    async fn render(&self, id: &str, image: Vec<u8>) -> Result<(String, String)> {
        let codec = Arc::clone(&self.codec);
        let preview = tokio::task::spawn_blocking(move || codec.render_preview(&image))
            .await
            .or_raise(|| ErrorKind::Blocking)?
            .or_raise(|| ErrorKind::Thumbnail)?;
        self.thumbnails.write(id, &preview.bytes).await?;
        Ok((self.thumbnails.url(id), preview.blurhash))
    }
}

/// Blocking half of the pipeline: preprocess, probe and EXIF.
fn analyse(codec: &dyn ImageCodec, original: Vec<u8>, key: &str) -> Result<Analysis> {
    let converted = match codec.preprocess(&original).or_raise(|| ErrorKind::Decode(key.to_string()))? {
        Cow::Borrowed(_) => None,
        Cow::Owned(bytes) => Some(bytes),
    };
    let image = converted.as_deref().unwrap_or(&original);
    let info = codec.probe(image).or_raise(|| ErrorKind::Decode(key.to_string()))?;
    let mut exif = read_exif(codec, image, key);
    if exif.is_none() && converted.is_some() {
        // Conversion may drop metadata the original still carries.
        exif = read_exif(codec, &original, key);
    }
    Ok(Analysis {
        image: converted.unwrap_or(original),
        info,
        exif,
    })
}

fn read_exif(codec: &dyn ImageCodec, bytes: &[u8], key: &str) -> Option<PhotoExif> {
    match codec.exif(bytes) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::warn!(key, error = ?e, "Failed to extract EXIF");
            None
        },
    }
}
