//! Image handling for prism: probing, previews, placeholder hashes and EXIF.
//!
//! Everything here is synchronous and CPU-bound. The [`ImageCodec`] trait is
//! the seam between the build pipeline and the image libraries, so tests
//! and alternative decoders (HEIF conversion, for instance) can be swapped
//! in without touching the pipeline.

mod codec;
pub mod error;
pub mod exif;

pub use crate::codec::{
    BLURHASH_COMPONENTS, DEFAULT_PREVIEW_QUALITY, DEFAULT_PREVIEW_WIDTH, ImageCodec, ImageInfo, Preview, StandardCodec,
};
pub use crate::exif::{FilmSimulation, FujiRecipe, PhotoExif, WhiteBalanceShift};
