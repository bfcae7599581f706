pub mod backend;
pub mod error;
pub mod live;
mod manager;
mod object;
mod path;

pub use crate::backend::StorageProvider;
pub use crate::live::LivePhotoMap;
pub use crate::manager::StorageManager;
pub use crate::object::{LIVE_PHOTO_VIDEO_EXTENSION, SUPPORTED_IMAGE_EXTENSIONS, StorageObject};
pub use crate::path::validate as validate_key;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageProvider>;
