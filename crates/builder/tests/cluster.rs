//! Worker batches, run in-process over the same JSON protocol the worker
//! processes speak, must agree with an in-process build.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use prism_builder::worker::{self, WorkerContext};
use prism_builder::{Builder, MANIFEST_PATH, Outcome, PhotoManifestItem, ProcessPhotoResult, RunFlags, Scheduler, manifest};
use prism_imaging::StandardCodec;
use prism_pool::cluster::{Batch, Reply, partition};
use prism_storage::backend::MockProvider;
use prism_storage::{StorageObject, StorageProvider};
use rstest::rstest;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

const WORKERS: usize = 3;

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 11 % 256) as u8, (y * 5 % 256) as u8, 40]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
    bytes
}

struct Fixture {
    root: TempDir,
    storage: Arc<MockProvider>,
}

impl Fixture {
    /// A built collection, then changed: one photo replaced, one added.
    async fn changed() -> Self {
        let fixture = Self {
            root: tempfile::tempdir().unwrap(),
            storage: Arc::new(MockProvider::with_files(vec![
                ("2023/a.jpg", png(120, 80)),
                ("2023/b.png", png(30, 60)),
                ("2024/c.jpg", png(64, 64)),
                ("2024/d.jpg", png(200, 20)),
                ("2024/broken.jpg", b"not an image".to_vec()),
                ("live/x.jpg", png(16, 12)),
                ("live/x.mov", b"clip".to_vec()),
            ])),
        };
        fixture.builder().build(RunFlags::default()).await.unwrap();

        fixture.storage.insert("2023/b.png", png(90, 45)).await;
        assert!(fixture.storage.touch("2023/b.png", OffsetDateTime::now_utc() + Duration::hours(1)).await);
        fixture.storage.insert("2024/e.jpg", png(10, 30)).await;
        fixture
    }

    fn builder(&self) -> Builder {
        Builder::new(self.storage.clone(), Arc::new(StandardCodec::default().with_max_width(32)), self.root.path())
            .with_scheduler(Scheduler::Local { concurrency: 4 })
    }

    /// Split the images the way the cluster scheduler does and feed every
    /// slice to a worker, with flags recovered from the worker environment.
    async fn run_workers(&self, flags: RunFlags) -> (Vec<StorageObject>, Vec<ProcessPhotoResult>) {
        let env: HashMap<&str, &str> = flags.to_env().into_iter().collect();
        let worker_flags = RunFlags::from_lookup(|key| env.get(key).map(|value| value.to_string()));
        assert_eq!(worker_flags, flags);

        let previous = match flags.loads_manifest() {
            true => manifest::load(&self.root.path().join(MANIFEST_PATH)).await,
            false => Vec::new(),
        };
        let existing: HashMap<&str, &PhotoManifestItem> = previous.iter().map(|i| (i.storage_key.as_str(), i)).collect();
        let objects = self.storage.list_all_files().await.unwrap();
        let live = self.storage.detect_live_photos(&objects);
        let images = self.storage.list_images().await.unwrap();

        let mut results: Vec<Option<ProcessPhotoResult>> = vec![None; images.len()];
        for range in partition(images.len(), WORKERS) {
            let slice = &images[range.clone()];
            let batch = Batch {
                offset: range.start,
                concurrency: 3,
                context: WorkerContext::for_slice(slice, &existing, &live),
                tasks: slice.to_vec(),
            };
            let input = serde_json::to_vec(&batch).unwrap();
            let mut output = Vec::new();
            worker::serve_with(self.builder().processor(worker_flags), &input[..], &mut output).await.unwrap();

            let replies: Vec<Reply<ProcessPhotoResult>> =
                output.split(|b| *b == b'\n').filter(|line| !line.is_empty()).map(|line| serde_json::from_slice(line).unwrap()).collect();
            assert_eq!(replies.len(), slice.len());
            for reply in replies {
                assert!(range.contains(&reply.index), "{} outside {range:?}", reply.index);
                assert!(results[reply.index].replace(reply.output).is_none(), "index {} answered twice", reply.index);
            }
        }
        (images, results.into_iter().map(Option::unwrap).collect())
    }
}

#[tokio::test]
async fn test_replies_land_at_their_task_index() {
    let fixture = Fixture::changed().await;
    let (images, results) = fixture.run_workers(RunFlags::default()).await;

    for (object, result) in images.iter().zip(&results) {
        let expected = match object.key.as_str() {
            "2024/broken.jpg" => Outcome::Failed,
            "2023/b.png" => Outcome::Processed,
            "2024/e.jpg" => Outcome::New,
            _ => Outcome::Skipped,
        };
        assert_eq!(result.outcome, expected, "{}", object.key);
        if let Some(item) = &result.item {
            assert_eq!(item.storage_key, object.key);
        }
    }
    let x = results.iter().filter_map(|r| r.item.as_ref()).find(|i| i.storage_key == "live/x.jpg").unwrap();
    assert_eq!(x.live_photo_video_key.as_deref(), Some("live/x.mov"));
    let b = results.iter().filter_map(|r| r.item.as_ref()).find(|i| i.storage_key == "2023/b.png").unwrap();
    assert_eq!((b.width, b.height), (90, 45));
}

#[rstest]
#[case::incremental(RunFlags::default())]
#[case::force(RunFlags { force: true, ..RunFlags::default() })]
#[case::force_manifest(RunFlags { force_manifest: true, ..RunFlags::default() })]
#[case::force_thumbnails(RunFlags { force_thumbnails: true, ..RunFlags::default() })]
#[tokio::test]
async fn test_workers_agree_with_in_process_build(#[case] flags: RunFlags) {
    let fixture = Fixture::changed().await;
    let (_, results) = fixture.run_workers(flags).await;
    let (mut items, cluster) = manifest::merge(results);
    manifest::sort(&mut items);

    // The worker run never saves, so the in-process build sees the same state.
    let local = fixture.builder().build(flags).await.unwrap().tally;
    assert_eq!(
        (cluster.total, cluster.new, cluster.processed, cluster.skipped, cluster.failed, cluster.live_photos),
        (local.total, local.new, local.processed, local.skipped, local.failed, local.live_photos)
    );

    let shape = |items: &[PhotoManifestItem]| -> Vec<(String, u32, u32, bool)> {
        items.iter().map(|i| (i.storage_key.clone(), i.width, i.height, i.is_live_photo)).collect()
    };
    let saved = manifest::load(&fixture.root.path().join(MANIFEST_PATH)).await;
    assert_eq!(shape(&items), shape(&saved));
}
