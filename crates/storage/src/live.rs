//! Live photo pairing.
//!
//! A live photo is a still image with a short `.mov` clip sharing its
//! directory and base name (`IMG_0001.HEIC` + `IMG_0001.MOV`). The map is
//! rebuilt from a full listing on every run and never persisted.

use crate::StorageObject;
use std::collections::{BTreeMap, HashMap};

/// Image key → paired video object.
pub type LivePhotoMap = HashMap<String, StorageObject>;

#[derive(Default)]
struct Group<'a> {
    images: Vec<&'a StorageObject>,
    videos: Vec<&'a StorageObject>,
}

/// Pair images with their companion videos.
///
/// Objects are grouped by `(directory, stem)`. A group yields a pairing only
/// when it holds exactly one supported image and exactly one `.mov`; anything
/// else (no video, two images of different formats, ...) is ambiguous and
/// left unpaired. The result does not depend on listing order.
pub fn detect(objects: &[StorageObject]) -> LivePhotoMap {
    let mut groups: BTreeMap<(&str, &str), Group<'_>> = BTreeMap::new();
    for object in objects {
        let role_image = object.is_image();
        let role_video = object.is_live_photo_video();
        if !role_image && !role_video {
            continue;
        }
        let group = groups.entry((object.directory(), object.stem())).or_default();
        match role_image {
            true => group.images.push(object),
            false => group.videos.push(object),
        }
    }
    groups
        .into_values()
        .filter_map(|group| match (group.images.as_slice(), group.videos.as_slice()) {
            ([image], [video]) => Some((image.key.clone(), (*video).clone())),
            _ => None,
        })
        .collect()
}
