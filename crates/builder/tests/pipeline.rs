use async_trait::async_trait;
use futures::stream;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use prism_builder::error::ErrorKind;
use prism_builder::{Builder, MANIFEST_PATH, PhotoManifestItem, RunFlags, Scheduler, Tally, manifest, photo_id};
use prism_config::BuildOptions;
use prism_imaging::StandardCodec;
use prism_storage::backend::{MockProvider, ObjectStream};
use prism_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use prism_storage::{StorageObject, StorageProvider};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
    bytes
}

struct Fixture {
    root: TempDir,
    storage: Arc<MockProvider>,
    options: BuildOptions,
}

impl Fixture {
    fn new(files: Vec<(&str, Vec<u8>)>) -> Self {
        Self::with_provider(MockProvider::with_files(files))
    }

    fn with_provider(storage: MockProvider) -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            storage: Arc::new(storage),
            options: BuildOptions::default(),
        }
    }

    fn photos() -> Self {
        Self::new(vec![
            ("photos/a.jpg", png(120, 80)),
            ("photos/2024/b.png", png(40, 90)),
            ("photos/2024/tokyo/c.jpg", png(64, 64)),
        ])
    }

    fn builder(&self) -> Builder {
        Builder::new(self.storage.clone(), Arc::new(StandardCodec::default().with_max_width(32)), self.root.path())
            .with_options(self.options.clone())
            .with_scheduler(Scheduler::Local { concurrency: 4 })
    }

    async fn build(&self, flags: RunFlags) -> Tally {
        self.builder().build(flags).await.unwrap().tally
    }

    async fn manifest(&self) -> Vec<PhotoManifestItem> {
        manifest::load(&self.root.path().join(MANIFEST_PATH)).await
    }

    fn manifest_bytes(&self) -> Vec<u8> {
        std::fs::read(self.root.path().join(MANIFEST_PATH)).unwrap()
    }

    fn preview_exists(&self, key: &str) -> bool {
        self.builder().thumbnails().path(&photo_id(key)).exists()
    }
}

fn force() -> RunFlags {
    RunFlags {
        force: true,
        ..RunFlags::default()
    }
}

#[tokio::test]
async fn test_first_run_builds_everything() {
    let fixture = Fixture::photos();
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.total, tally.new, tally.failed, tally.deleted), (3, 3, 0, 0));

    let items = fixture.manifest().await;
    assert_eq!(items.len(), 3);
    let a = items.iter().find(|i| i.storage_key == "photos/a.jpg").unwrap();
    assert_eq!((a.width, a.height), (120, 80));
    assert_eq!(a.title, "a");
    assert_eq!(a.original_url, "mock://mock/photos/a.jpg");
    assert_eq!(a.thumbnail_url.as_deref(), Some(format!("/thumbnails/{}.jpg", a.id).as_str()));
    assert!(a.blur_hash.is_some());
    let c = items.iter().find(|i| i.storage_key == "photos/2024/tokyo/c.jpg").unwrap();
    assert_eq!(c.tags, ["photos", "2024", "tokyo"]);
    for key in ["photos/a.jpg", "photos/2024/b.png", "photos/2024/tokyo/c.jpg"] {
        assert!(fixture.preview_exists(key), "{key}");
    }
}

#[tokio::test]
async fn test_aspect_ratio_matches_dimensions() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    for item in fixture.manifest().await {
        assert!((item.aspect_ratio - f64::from(item.width) / f64::from(item.height)).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    let first = fixture.manifest_bytes();
    let reads = fixture.storage.total_reads();

    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.total, tally.skipped, tally.new, tally.processed), (3, 3, 0, 0));
    assert_eq!(fixture.manifest_bytes(), first);
    assert_eq!(fixture.storage.total_reads(), reads);
}

#[tokio::test]
async fn test_older_object_is_not_refetched() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    let before = fixture.storage.read_count("photos/a.jpg");
    assert!(fixture.storage.touch("photos/a.jpg", datetime!(2001-01-01 00:00 UTC)).await);

    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!(tally.skipped, 3);
    assert_eq!(fixture.storage.read_count("photos/a.jpg"), before);
}

#[tokio::test]
async fn test_changed_object_keeps_curated_fields() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;

    // Curate the manifest by hand, then replace the photo in storage.
    let mut items = fixture.manifest().await;
    let a = items.iter_mut().find(|i| i.storage_key == "photos/a.jpg").unwrap();
    a.title = "Harbour at dusk".to_string();
    a.views = 7;
    manifest::save(&fixture.root.path().join(MANIFEST_PATH), &mut items).await.unwrap();
    fixture.storage.insert("photos/a.jpg", png(50, 100)).await;
    assert!(fixture.storage.touch("photos/a.jpg", OffsetDateTime::now_utc() + Duration::hours(1)).await);

    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.processed, tally.skipped), (1, 2));
    let items = fixture.manifest().await;
    let a = items.iter().find(|i| i.storage_key == "photos/a.jpg").unwrap();
    assert_eq!((a.title.as_str(), a.views), ("Harbour at dusk", 7));
    assert_eq!((a.width, a.height), (50, 100));
    assert_eq!(a.aspect_ratio, 0.5);
}

#[tokio::test]
async fn test_replaced_object_detected_by_size_without_timestamps() {
    let fixture = Fixture::with_provider(MockProvider::with_files(vec![("photos/a.jpg", png(120, 80))]).without_timestamps());
    fixture.build(RunFlags::default()).await;
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.skipped, tally.processed), (1, 0));

    let replacement = png(50, 100);
    let size = replacement.len() as u64;
    fixture.storage.insert("photos/a.jpg", replacement).await;
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.total, tally.skipped, tally.processed), (1, 0, 1));
    let items = fixture.manifest().await;
    assert_eq!((items[0].width, items[0].height, items[0].size_bytes), (50, 100, size));
}

#[tokio::test]
async fn test_capped_listing_skips_deletion_detection() {
    let files = || vec![("A.jpg", png(8, 8)), ("B.jpg", png(8, 8)), ("C.jpg", png(8, 8))];
    let fixture = Fixture::new(files());
    fixture.build(RunFlags::default()).await;

    let capped = Arc::new(MockProvider::with_files(files()).with_limit(2));
    let summary = Builder::new(capped, Arc::new(StandardCodec::default().with_max_width(32)), fixture.root.path())
        .build(RunFlags::default())
        .await
        .unwrap();
    assert_eq!((summary.tally.total, summary.tally.deleted), (2, 0));
    assert!(fixture.preview_exists("C.jpg"));
}

#[tokio::test]
async fn test_deleted_object_is_detected() {
    let fixture = Fixture::new(vec![("A.jpg", png(8, 8)), ("B.jpg", png(8, 8)), ("C.jpg", png(8, 8))]);
    fixture.build(RunFlags::default()).await;
    assert!(fixture.preview_exists("B.jpg"));
    assert!(fixture.storage.remove("B.jpg").await);

    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.total, tally.deleted), (2, 1));
    let keys: Vec<_> = fixture.manifest().await.into_iter().map(|i| i.storage_key).collect();
    assert!(!keys.contains(&"B.jpg".to_string()));
    assert_eq!(keys.len(), 2);
    assert!(!fixture.preview_exists("B.jpg"));
}

#[tokio::test]
async fn test_forced_rebuild_recomputes_everything() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    assert!(fixture.storage.remove("photos/a.jpg").await);

    let tally = fixture.build(force()).await;
    assert_eq!((tally.total, tally.new, tally.processed, tally.skipped, tally.deleted), (2, 2, 0, 0, 0));
}

#[tokio::test]
async fn test_force_manifest_recomputes_but_skips_deletions() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    assert!(fixture.storage.remove("photos/a.jpg").await);

    let flags = RunFlags {
        force_manifest: true,
        ..RunFlags::default()
    };
    let tally = fixture.build(flags).await;
    assert_eq!((tally.total, tally.processed, tally.deleted), (2, 2, 0));
}

#[tokio::test]
async fn test_force_thumbnails_only_touches_missing_previews() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    let path = fixture.builder().thumbnails().path(&photo_id("photos/a.jpg"));
    std::fs::remove_file(&path).unwrap();

    let flags = RunFlags {
        force_thumbnails: true,
        ..RunFlags::default()
    };
    let tally = fixture.build(flags).await;
    assert_eq!((tally.processed, tally.skipped), (1, 2));
    assert!(path.exists());
}

#[tokio::test]
async fn test_live_photo_pairing() {
    let fixture = Fixture::new(vec![
        ("photos/x.jpg", png(16, 12)),
        ("photos/x.mov", b"not really a movie".to_vec()),
        ("photos/y.jpg", png(16, 12)),
    ]);
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.total, tally.live_photos), (2, 1));

    let items = fixture.manifest().await;
    let x = items.iter().find(|i| i.storage_key == "photos/x.jpg").unwrap();
    assert!(x.is_live_photo);
    assert_eq!(x.live_photo_video_key.as_deref(), Some("photos/x.mov"));
    assert_eq!(x.live_photo_video_url.as_deref(), Some("mock://mock/photos/x.mov"));
    let y = items.iter().find(|i| i.storage_key == "photos/y.jpg").unwrap();
    assert!(!y.is_live_photo);
    assert_eq!(y.live_photo_video_key, None);
}

#[tokio::test]
async fn test_live_photo_detection_can_be_disabled() {
    let mut fixture = Fixture::new(vec![("x.jpg", png(4, 4)), ("x.mov", b"clip".to_vec())]);
    fixture.options.enable_live_photo_detection = false;
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!(tally.live_photos, 0);
}

#[tokio::test]
async fn test_undecodable_photo_fails_without_aborting() {
    let fixture = Fixture::new(vec![("good.jpg", png(10, 10)), ("broken.jpg", b"garbage".to_vec())]);
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.total, tally.new, tally.failed), (2, 1, 1));
    let keys: Vec<_> = fixture.manifest().await.into_iter().map(|i| i.storage_key).collect();
    assert_eq!(keys, ["good.jpg"]);

    // Failures aren't remembered, so the next run simply tries again.
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!((tally.skipped, tally.failed), (1, 1));
    assert_eq!(fixture.storage.read_count("broken.jpg"), 2);
}

#[tokio::test]
async fn test_photo_limit_only_warns() {
    let mut fixture = Fixture::photos();
    fixture.options.max_photos = 1;
    let tally = fixture.build(RunFlags::default()).await;
    assert_eq!(tally.new, 3);
}

#[tokio::test]
async fn test_manifest_sorted_newest_first() {
    let fixture = Fixture::photos();
    assert!(fixture.storage.touch("photos/a.jpg", datetime!(2020-01-01 00:00 UTC)).await);
    assert!(fixture.storage.touch("photos/2024/b.png", datetime!(2024-01-01 00:00 UTC)).await);
    assert!(fixture.storage.touch("photos/2024/tokyo/c.jpg", datetime!(2022-01-01 00:00 UTC)).await);
    fixture.build(RunFlags::default()).await;

    let keys: Vec<_> = fixture.manifest().await.into_iter().map(|i| i.storage_key).collect();
    assert_eq!(keys, ["photos/2024/b.png", "photos/2024/tokyo/c.jpg", "photos/a.jpg"]);
}

struct Unreachable;

#[async_trait]
impl StorageProvider for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn list_stream(&self) -> ObjectStream<'_> {
        let error = exn::Exn::from(StorageErrorKind::Network("connection refused".to_string()));
        Box::pin(stream::once(async move { Err::<StorageObject, _>(error) }))
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        exn::bail!(StorageErrorKind::NotFound(key.to_string()))
    }

    fn generate_public_url(&self, key: &str) -> String {
        format!("https://unreachable.invalid/{key}")
    }
}

#[tokio::test]
async fn test_listing_failure_is_fatal_and_keeps_manifest() {
    let fixture = Fixture::photos();
    fixture.build(RunFlags::default()).await;
    let before = fixture.manifest_bytes();

    let err = Builder::new(Arc::new(Unreachable), Arc::new(StandardCodec::default()), fixture.root.path())
        .build(RunFlags::default())
        .await
        .unwrap_err();
    assert!(matches!(&*err, ErrorKind::Listing));
    assert!(err.is_retryable());
    assert_eq!(fixture.manifest_bytes(), before);
}
