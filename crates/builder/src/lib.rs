//! Incremental photo manifest builder.
//!
//! Lists a storage backend, turns every image into a [`PhotoManifestItem`]
//! (reusing last run's entry when nothing changed) and writes the result as
//! a single JSON manifest sorted newest first.
//!
//! ```no_run
//! use prism_builder::{Builder, RunFlags};
//! use prism_imaging::StandardCodec;
//! use prism_storage::backend::LocalProvider;
//! use prism_config::LocalConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> prism_builder::error::Result<()> {
//! let config = LocalConfig { root: "/srv/photos".into(), base_url: None, max_objects: None };
//! let storage = Arc::new(LocalProvider::new("local", &config).unwrap());
//! let summary = Builder::new(storage, Arc::new(StandardCodec::default()), "/srv/site")
//!     .build(RunFlags::default())
//!     .await?;
//! println!("{} photos", summary.tally.total);
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod error;
mod flags;
pub mod manifest;
mod model;
mod processor;
mod thumbnail;
pub mod worker;

pub use crate::builder::{BuildSummary, Builder, Scheduler, thumbnail_store};
pub use crate::flags::RunFlags;
pub use crate::manifest::Tally;
pub use crate::model::{Outcome, PhotoManifestItem, ProcessPhotoResult, aspect_ratio, photo_id};
pub use crate::processor::{Processor, should_skip};
pub use crate::thumbnail::ThumbnailStore;

/// Manifest location, relative to the project root.
pub const MANIFEST_PATH: &str = "src/data/photos-manifest.json";
/// Preview directory, relative to the project root.
pub const THUMBNAIL_DIR: &str = "public/thumbnails";
/// Public URL path previews are served under.
pub const THUMBNAIL_URL_PREFIX: &str = "/thumbnails";
