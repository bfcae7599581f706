//! Build orchestration.
//!
//! One build runs these steps in a fixed order:
//!
//! 1. load the previous manifest (skipped under `force`)
//! 2. list every object
//! 3. pair live photos, if enabled
//! 4. list image objects, warning past the configured soft maximum
//! 5. process every image through the [`Scheduler`]
//! 6. tally outcomes
//! 7. detect deletions (not when forced, nor when the listing was capped)
//! 8. persist the manifest
//! 9. report the summary
//!
//! Only failures in steps 2, 4, 5 (starting worker processes) and 8 abort
//! the build.

use crate::error::{ErrorKind, Result};
use crate::flags::RunFlags;
use crate::manifest::{self, Tally};
use crate::model::{PhotoManifestItem, ProcessPhotoResult};
use crate::processor::Processor;
use crate::thumbnail::ThumbnailStore;
use crate::worker::WorkerContext;
use crate::{MANIFEST_PATH, THUMBNAIL_DIR, THUMBNAIL_URL_PREFIX};
use exn::ResultExt;
use prism_config::BuildOptions;
use prism_imaging::ImageCodec;
use prism_pool::ClusterPool;
use prism_storage::{BackendHandle, LivePhotoMap, StorageObject};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// How photos are spread over workers.
#[derive(Debug, Clone)]
pub enum Scheduler {
    /// Cooperative workers inside this process.
    Local { concurrency: usize },
    /// Worker processes, each running its own local pool.
    Cluster(ClusterPool),
}

/// What a finished build did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub tally: Tally,
    pub elapsed: Duration,
}

/// Builds the manifest for one storage backend.
pub struct Builder {
    storage: BackendHandle,
    codec: Arc<dyn ImageCodec>,
    root: PathBuf,
    options: BuildOptions,
    scheduler: Scheduler,
}

impl Builder {
    /// A builder writing under the project `root`, with default options and
    /// an in-process scheduler at the default concurrency.
    pub fn new(storage: BackendHandle, codec: Arc<dyn ImageCodec>, root: impl Into<PathBuf>) -> Self {
        let options = BuildOptions::default();
        Self {
            storage,
            codec,
            root: root.into(),
            scheduler: Scheduler::Local {
                concurrency: options.default_concurrency,
            },
            options,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_PATH)
    }

    pub fn thumbnails(&self) -> ThumbnailStore {
        thumbnail_store(&self.root, self.codec.as_ref())
    }

    pub fn processor(&self, flags: RunFlags) -> Processor {
        Processor::new(Arc::clone(&self.storage), Arc::clone(&self.codec), self.thumbnails(), flags)
    }

    #[instrument(level = "info", skip_all, fields(provider = self.storage.name()))]
    pub async fn build(&self, flags: RunFlags) -> Result<BuildSummary> {
        let started = Instant::now();
        let manifest_path = self.manifest_path();
        tracing::info!(?flags, "Starting build");

        let previous = match flags.loads_manifest() {
            true => manifest::load(&manifest_path).await,
            false => Vec::new(),
        };

        let objects = self.storage.list_all_files().await.or_raise(|| ErrorKind::Listing)?;
        let live_photos = match self.options.enable_live_photo_detection {
            true => self.storage.detect_live_photos(&objects),
            false => LivePhotoMap::new(),
        };
        let images = self.storage.list_images().await.or_raise(|| ErrorKind::Listing)?;
        tracing::info!(objects = objects.len(), images = images.len(), live_photos = live_photos.len(), "Listed storage");
        if images.len() > self.options.max_photos {
            tracing::warn!(
                images = images.len(),
                max_photos = self.options.max_photos,
                "Photo count exceeds the configured maximum; processing all of them anyway"
            );
        }

        let existing: HashMap<&str, &PhotoManifestItem> =
            previous.iter().map(|item| (item.storage_key.as_str(), item)).collect();
        let processor = self.processor(flags);
        let results = self.schedule(&processor, &images, &existing, &live_photos).await?;
        let (mut items, mut tally) = manifest::merge(results);

        // A capped listing can't prove anything past the cap is gone.
        let truncated = objects.len() >= self.storage.list_limit();
        if truncated && flags.detects_deletions() {
            tracing::warn!(limit = self.storage.list_limit(), "Listing hit the object limit; skipping deletion detection");
        }
        if flags.detects_deletions() && !truncated && !previous.is_empty() {
            let live_keys: HashSet<&str> = objects.iter().map(|object| object.key.as_str()).collect();
            tally.deleted = manifest::detect_deletions(&previous, &live_keys, processor.thumbnails()).await;
        }

        manifest::save(&manifest_path, &mut items).await?;

        let summary = BuildSummary {
            tally,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            total = tally.total,
            new = tally.new,
            processed = tally.processed,
            skipped = tally.skipped,
            failed = tally.failed,
            deleted = tally.deleted,
            live_photos = tally.live_photos,
            elapsed = ?summary.elapsed,
            "Build complete"
        );
        Ok(summary)
    }

    async fn schedule(
        &self,
        processor: &Processor,
        images: &[StorageObject],
        existing: &HashMap<&str, &PhotoManifestItem>,
        live_photos: &LivePhotoMap,
    ) -> Result<Vec<ProcessPhotoResult>> {
        match &self.scheduler {
            Scheduler::Local { concurrency } => {
                tracing::debug!(concurrency, "Processing in-process");
                Ok(prism_pool::run(images.len(), *concurrency, |i| {
                    let object = &images[i];
                    let previous = existing.get(object.key.as_str()).copied();
                    let video = live_photos.get(&object.key);
                    async move { processor.process(object, previous, video).await }
                })
                .await)
            },
            Scheduler::Cluster(pool) => {
                tracing::debug!(workers = pool.workers(), concurrency = pool.worker_concurrency(), "Processing in worker processes");
                let pool = processor
                    .flags()
                    .to_env()
                    .into_iter()
                    .fold(pool.clone(), |pool, (key, value)| pool.env(key, value));
                let outputs: Vec<Option<ProcessPhotoResult>> = pool
                    .run(images, |slice| WorkerContext::for_slice(slice, existing, live_photos))
                    .await
                    .or_raise(|| ErrorKind::Scheduler)?;
                Ok(outputs
                    .into_iter()
                    .zip(images)
                    .map(|(output, object)| {
                        output.unwrap_or_else(|| {
                            tracing::error!(key = %object.key, "No result from worker process");
                            ProcessPhotoResult::failed()
                        })
                    })
                    .collect())
            },
        }
    }
}

/// Preview store for a project root, named after the codec's output format.
pub fn thumbnail_store(root: &Path, codec: &dyn ImageCodec) -> ThumbnailStore {
    ThumbnailStore::new(root.join(THUMBNAIL_DIR), THUMBNAIL_URL_PREFIX, codec.preview_extension())
}
