//! Worker-process side of the cluster scheduler.
//!
//! A worker receives a slice of image objects plus a [`WorkerContext`]
//! holding only the previous entries and live photo pairs for that slice,
//! and answers with one [`ProcessPhotoResult`](crate::ProcessPhotoResult)
//! per object. Run flags arrive through the environment, see
//! [`RunFlags::from_env`](crate::RunFlags::from_env).

use crate::error::{ErrorKind, Result};
use crate::model::PhotoManifestItem;
use crate::processor::Processor;
use exn::ResultExt;
use prism_storage::{LivePhotoMap, StorageObject};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read-only state shared by every task in a worker's batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerContext {
    /// Previous manifest entries, by storage key.
    pub existing: HashMap<String, PhotoManifestItem>,
    /// Paired videos, by image key.
    pub live_photos: HashMap<String, StorageObject>,
}

impl WorkerContext {
    /// The part of the run's state that `slice` can observe.
    pub fn for_slice(slice: &[StorageObject], existing: &HashMap<&str, &PhotoManifestItem>, live_photos: &LivePhotoMap) -> Self {
        let mut context = Self::default();
        for object in slice {
            if let Some(item) = existing.get(object.key.as_str()) {
                context.existing.insert(object.key.clone(), (*item).clone());
            }
            if let Some(video) = live_photos.get(&object.key) {
                context.live_photos.insert(object.key.clone(), video.clone());
            }
        }
        context
    }
}

/// Serve one batch on stdin/stdout and exit.
pub async fn serve(processor: Processor) -> Result<()> {
    serve_with(processor, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve one batch read from `reader`, writing replies to `writer`.
pub async fn serve_with<R, W>(processor: Processor, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::debug!(flags = ?processor.flags(), "Worker starting");
    let processor = &processor;
    prism_pool::cluster::serve_with(reader, writer, |context: &WorkerContext, object: &StorageObject| {
        // The future can't borrow the batch, so it gets its own copies.
        let object = object.clone();
        let existing = context.existing.get(&object.key).cloned();
        let video = context.live_photos.get(&object.key).cloned();
        async move { processor.process(&object, existing.as_ref(), video.as_ref()).await }
    })
    .await
    .or_raise(|| ErrorKind::Scheduler)
}
