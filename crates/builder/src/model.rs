//! Manifest data model.

use prism_imaging::PhotoExif;
use prism_storage::StorageObject;
use rslug::slugify;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Hex digits of the key hash appended to every photo id.
const ID_HASH_LEN: usize = 8;

/// One photo as published to the gallery.
///
/// `storage_key` is unique across a manifest and `id` is derived from it
/// alone (see [`photo_id`]), so looking an item up by key and identifying it
/// by id always agree across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoManifestItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date_taken: OffsetDateTime,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub original_url: String,
    pub thumbnail_url: Option<String>,
    pub blur_hash: Option<String>,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
    pub storage_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    pub size_bytes: u64,
    pub exif: Option<PhotoExif>,
    #[serde(default)]
    pub is_live_photo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_photo_video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_photo_video_key: Option<String>,
}

impl PhotoManifestItem {
    /// Carry the user-curated fields over from a previous version of the
    /// same photo. Nothing in storage can regenerate them.
    pub fn keep_curated(&mut self, previous: &Self) {
        self.title.clone_from(&previous.title);
        self.description.clone_from(&previous.description);
        self.tags.clone_from(&previous.tags);
        self.views = previous.views;
    }
}

/// `width / height`, the only way an item's aspect ratio is ever computed.
pub fn aspect_ratio(width: u32, height: u32) -> f64 {
    f64::from(width) / f64::from(height)
}

/// Stable, URL-safe id for a storage key: the slugified file stem followed by
/// a short BLAKE3 digest of the whole key.
///
/// The digest keeps ids unique when the same file name appears in several
/// directories.
pub fn photo_id(key: &str) -> String {
    let stem = StorageObject::new(key).stem().to_string();
    let digest = blake3::hash(key.as_bytes()).to_hex();
    let slug = slugify!(&stem);
    match slug.is_empty() {
        true => digest[..ID_HASH_LEN].to_string(),
        false => format!("{slug}-{}", &digest[..ID_HASH_LEN]),
    }
}

/// Default tags for a photo: the directories between the provider's root
/// prefix and the file.
pub fn default_tags(object: &StorageObject, prefix: Option<&str>) -> Vec<String> {
    let directory = object.directory();
    let relative = match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) if directory == prefix => "",
        Some(prefix) => directory.strip_prefix(prefix).and_then(|d| d.strip_prefix('/')).unwrap_or(directory),
        None => directory,
    };
    relative.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// How much work a photo needed this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Not in the previous manifest; computed from scratch.
    New,
    /// In the previous manifest but recomputed (changed, or forced).
    Processed,
    /// Unchanged; the previous entry was reused without fetching anything.
    Skipped,
    /// Could not be fetched or decoded. Left out of the manifest.
    Failed,
}

/// What the processor produced for one storage object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessPhotoResult {
    /// `None` exactly when the outcome is [`Outcome::Failed`].
    pub item: Option<PhotoManifestItem>,
    pub outcome: Outcome,
}

impl ProcessPhotoResult {
    pub fn computed(item: PhotoManifestItem, previously_known: bool) -> Self {
        let outcome = match previously_known {
            true => Outcome::Processed,
            false => Outcome::New,
        };
        Self { item: Some(item), outcome }
    }

    pub fn skipped(item: PhotoManifestItem) -> Self {
        Self {
            item: Some(item),
            outcome: Outcome::Skipped,
        }
    }

    pub fn failed() -> Self {
        Self {
            item: None,
            outcome: Outcome::Failed,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    pub(crate) fn item(key: &str, date_taken: OffsetDateTime) -> PhotoManifestItem {
        PhotoManifestItem {
            id: photo_id(key),
            title: StorageObject::new(key).stem().to_string(),
            description: String::new(),
            date_taken,
            views: 0,
            tags: Vec::new(),
            original_url: format!("https://cdn.example.com/{key}"),
            thumbnail_url: None,
            blur_hash: None,
            width: 3,
            height: 2,
            aspect_ratio: aspect_ratio(3, 2),
            storage_key: key.to_string(),
            last_modified: date_taken,
            size_bytes: 10,
            exif: None,
            is_live_photo: false,
            live_photo_video_url: None,
            live_photo_video_key: None,
        }
    }

    #[test]
    fn test_photo_id_is_stable_and_unique_per_key() {
        let a = photo_id("2024/Tokyo Trip/IMG_0001.JPG");
        assert_eq!(a, photo_id("2024/Tokyo Trip/IMG_0001.JPG"));
        assert!(a.starts_with("img-0001-"), "{a}");
        assert_eq!(a.len(), "img-0001-".len() + ID_HASH_LEN);
        assert_ne!(a, photo_id("2023/IMG_0001.JPG"));
    }

    #[test]
    fn test_photo_id_without_slug() {
        let id = photo_id("日本/写真.jpg");
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'), "{id}");
    }

    #[rstest]
    #[case("photos/2024/tokyo/a.jpg", Some("photos"), &["2024", "tokyo"])]
    #[case("photos/2024/tokyo/a.jpg", Some("/photos/"), &["2024", "tokyo"])]
    #[case("photos/a.jpg", Some("photos"), &[])]
    #[case("2024/a.jpg", None, &["2024"])]
    #[case("a.jpg", None, &[])]
    #[case("elsewhere/a.jpg", Some("photos"), &["elsewhere"])]
    fn test_default_tags(#[case] key: &str, #[case] prefix: Option<&str>, #[case] expected: &[&str]) {
        assert_eq!(default_tags(&StorageObject::new(key), prefix), expected);
    }

    #[test]
    fn test_keep_curated() {
        let mut previous = item("a.jpg", datetime!(2024-01-01 00:00 UTC));
        previous.title = "Sunrise".to_string();
        previous.tags = vec!["favourites".to_string()];
        previous.views = 42;
        let mut fresh = item("a.jpg", datetime!(2024-02-01 00:00 UTC));
        fresh.width = 10;
        fresh.keep_curated(&previous);
        assert_eq!((fresh.title.as_str(), fresh.views, fresh.width), ("Sunrise", 42, 10));
        assert_eq!(fresh.tags, ["favourites"]);
    }

    #[test]
    fn test_serde_shape() {
        let mut item = item("2024/a.jpg", datetime!(2024-05-01 12:30 +09:00));
        item.is_live_photo = true;
        item.live_photo_video_key = Some("2024/a.mov".to_string());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["dateTaken"], "2024-05-01T12:30:00+09:00");
        assert_eq!(json["storageKey"], "2024/a.jpg");
        assert_eq!(json["aspectRatio"], 1.5);
        assert!(json["thumbnailUrl"].is_null());
        assert!(json.get("livePhotoVideoUrl").is_none());
        assert_eq!(json["livePhotoVideoKey"], "2024/a.mov");
        let back: PhotoManifestItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_outcome_wire_names() {
        let json = serde_json::to_string(&ProcessPhotoResult::failed()).unwrap();
        assert_eq!(json, r#"{"item":null,"outcome":"failed"}"#);
    }
}
