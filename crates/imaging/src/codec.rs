use crate::error::{ErrorKind, Result};
use crate::exif::{self, PhotoExif};
use exn::{OptionExt, ResultExt};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::borrow::Cow;
use std::io::Cursor;
use tracing::instrument;

/// Widest preview rendered by [`StandardCodec`], in pixels.
pub const DEFAULT_PREVIEW_WIDTH: u32 = 600;
/// JPEG quality of previews rendered by [`StandardCodec`].
pub const DEFAULT_PREVIEW_QUALITY: u8 = 85;
/// Blurhash components along the x and y axes.
pub const BLURHASH_COMPONENTS: (u32, u32) = (4, 3);
/// Longest edge of the buffer the blurhash is computed over.
const BLURHASH_MAX_EDGE: u32 = 32;

/// Dimensions and detected format of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Lowercase format name (`jpeg`, `png`, ...).
    pub format: String,
}

/// A rendered preview and the placeholder hash derived from the same pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub blurhash: String,
}

/// Everything the photo pipeline needs from an image library.
///
/// All methods are synchronous and CPU-bound; async callers are expected to
/// run them on a blocking thread.
pub trait ImageCodec: Send + Sync {
    /// Read dimensions and format, ideally without decoding pixel data.
    /// Zero-sized images are rejected.
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo>;

    /// Convert formats the codec can't decode natively into one it can.
    /// Natively supported bytes are returned untouched.
    fn preprocess<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(bytes))
    }

    /// Extract and sanitise EXIF metadata. `Ok(None)` means there is none.
    fn exif(&self, bytes: &[u8]) -> Result<Option<PhotoExif>>;

    /// Render the preview and compute its blurhash in one pass.
    fn render_preview(&self, bytes: &[u8]) -> Result<Preview>;

    /// Compute the blurhash of a previously rendered preview.
    fn hash_preview(&self, preview: &[u8]) -> Result<String>;

    /// File extension of rendered previews, without the dot.
    fn preview_extension(&self) -> &'static str {
        "jpg"
    }
}

/// [`ImageCodec`] backed by the `image`, `blurhash` and `kamadak-exif`
/// crates.
///
/// Decodes JPEG, PNG, GIF, BMP, WebP and TIFF. HEIF/AVIF sources are listed
/// by the storage layer but fail to probe unless a codec with a converting
/// [`preprocess()`](ImageCodec::preprocess) is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardCodec {
    max_width: u32,
    quality: u8,
}
impl Default for StandardCodec {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_PREVIEW_WIDTH,
            quality: DEFAULT_PREVIEW_QUALITY,
        }
    }
}
impl StandardCodec {
    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width.max(1);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().or_raise(|| ErrorKind::Decode)?;
        if reader.format().is_none() {
            exn::bail!(ErrorKind::Unsupported("unrecognised image signature".to_string()));
        }
        reader.decode().or_raise(|| ErrorKind::Decode)
    }

    fn blurhash(image: &DynamicImage) -> Result<String> {
        let small = match image.width().max(image.height()) > BLURHASH_MAX_EDGE {
            true => image.thumbnail(BLURHASH_MAX_EDGE, BLURHASH_MAX_EDGE),
            false => image.clone(),
        };
        let rgba = small.to_rgba8();
        let (x, y) = BLURHASH_COMPONENTS;
        blurhash::encode(x, y, rgba.width(), rgba.height(), rgba.as_raw()).map_err(|e| ErrorKind::Hash(format!("{e:?}")).into())
    }
}

impl ImageCodec for StandardCodec {
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().or_raise(|| ErrorKind::Decode)?;
        let format = reader
            .format()
            .ok_or_raise(|| ErrorKind::Unsupported("unrecognised image signature".to_string()))?;
        let (width, height) = reader.into_dimensions().or_raise(|| ErrorKind::Decode)?;
        if width == 0 || height == 0 {
            exn::bail!(ErrorKind::Decode);
        }
        Ok(ImageInfo {
            width,
            height,
            format: format!("{format:?}").to_lowercase(),
        })
    }

    fn exif(&self, bytes: &[u8]) -> Result<Option<PhotoExif>> {
        exif::extract(bytes)
    }

    #[instrument(level = "debug", skip_all, fields(size = bytes.len()))]
    fn render_preview(&self, bytes: &[u8]) -> Result<Preview> {
        let image = Self::decode(bytes)?;
        let resized = match image.width() > self.max_width {
            true => image.resize(self.max_width, u32::MAX, FilterType::Lanczos3),
            false => image,
        };
        // JPEG has no alpha channel.
        let rgb = resized.to_rgb8();
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(&rgb)
            .or_raise(|| ErrorKind::Encode)?;
        Ok(Preview {
            blurhash: Self::blurhash(&resized)?,
            width: rgb.width(),
            height: rgb.height(),
            bytes: encoded,
        })
    }

    fn hash_preview(&self, preview: &[u8]) -> Result<String> {
        Self::blurhash(&Self::decode(preview)?)
    }
}
