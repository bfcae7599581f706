//! EXIF extraction and sanitisation.
//!
//! Only a curated subset of tags is copied into [`PhotoExif`]. Binary or
//! privacy-sensitive blocks (maker note, user comment, print image matching)
//! never make it into the model; the maker note is only consulted to decode
//! a Fujifilm film recipe.

mod fujifilm;

pub use self::fujifilm::{FilmSimulation, FujiRecipe, WhiteBalanceShift};
use crate::error::{ErrorKind, Result};
use exif::{Exif, In, Reader, Tag, Value};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Curated, sanitised EXIF metadata for a photo.
///
/// Strings are NUL-free and trimmed; a value the camera left blank is
/// `None` rather than an empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoExif {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lens_make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    /// As written by the camera: `YYYY:MM:DD HH:MM:SS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time_original: Option<String>,
    /// `±HH:MM`; absent on most cameras older than 2017.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_time_original: Option<String>,
    /// Human-readable, e.g. `1/250`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    /// Millimetres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length_in_35mm: Option<u32>,
    /// EV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_bias: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_program: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metering_mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_space: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u32>,
    /// Signed decimal degrees, south is negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_latitude: Option<f64>,
    /// Signed decimal degrees, west is negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_longitude: Option<f64>,
    /// Metres, below sea level is negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuji_recipe: Option<FujiRecipe>,
}

impl PhotoExif {
    /// Build the model from parsed EXIF, or `None` if nothing useful is left
    /// after sanitisation.
    pub fn from_exif(exif: &Exif) -> Option<Self> {
        let model = Self {
            make: ascii(exif, Tag::Make),
            model: ascii(exif, Tag::Model),
            lens_make: ascii(exif, Tag::LensMake),
            lens_model: ascii(exif, Tag::LensModel),
            software: ascii(exif, Tag::Software),
            date_time_original: ascii(exif, Tag::DateTimeOriginal),
            offset_time_original: ascii(exif, Tag::OffsetTimeOriginal),
            exposure_time: exposure_time(exif),
            f_number: rational(exif, Tag::FNumber),
            iso: uint(exif, Tag::PhotographicSensitivity),
            focal_length: rational(exif, Tag::FocalLength),
            focal_length_in_35mm: uint(exif, Tag::FocalLengthIn35mmFilm),
            exposure_bias: rational(exif, Tag::ExposureBiasValue),
            exposure_program: uint(exif, Tag::ExposureProgram),
            metering_mode: uint(exif, Tag::MeteringMode),
            flash: uint(exif, Tag::Flash),
            white_balance: uint(exif, Tag::WhiteBalance),
            color_space: uint(exif, Tag::ColorSpace),
            orientation: uint(exif, Tag::Orientation),
            gps_latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
            gps_longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
            gps_altitude: altitude(exif),
            fuji_recipe: match field(exif, Tag::MakerNote) {
                Some(Value::Undefined(note, _)) => fujifilm::decode(note),
                _ => None,
            },
        };
        (!model.is_empty()).then_some(model)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Original capture time, using the recorded offset when there is one
    /// and UTC otherwise.
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        let local = PrimitiveDateTime::parse(
            self.date_time_original.as_deref()?,
            format_description!("[year]:[month]:[day] [hour]:[minute]:[second]"),
        )
        .ok()?;
        let offset = self
            .offset_time_original
            .as_deref()
            .and_then(|o| UtcOffset::parse(o, format_description!("[offset_hour sign:mandatory]:[offset_minute]")).ok())
            .unwrap_or(UtcOffset::UTC);
        Some(local.assume_offset(offset))
    }
}

/// Read EXIF from any container `kamadak-exif` understands (JPEG, TIFF,
/// HEIF, PNG, WebP). Images without EXIF yield `Ok(None)`.
pub fn extract(bytes: &[u8]) -> Result<Option<PhotoExif>> {
    match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => Ok(PhotoExif::from_exif(&exif)),
        Err(exif::Error::NotFound(_) | exif::Error::NotSupported(_)) => Ok(None),
        Err(e) => Err(e).or_raise(|| ErrorKind::Exif),
    }
}

fn field(exif: &Exif, tag: Tag) -> Option<&Value> {
    exif.get_field(tag, In::PRIMARY).map(|f| &f.value)
}

/// NUL bytes removed, whitespace trimmed, blank becomes `None`.
fn clean(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes).replace('\0', "");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    match field(exif, tag)? {
        Value::Ascii(parts) => parts.iter().find_map(|part| clean(part)),
        _ => None,
    }
}

fn uint(exif: &Exif, tag: Tag) -> Option<u32> {
    field(exif, tag)?.get_uint(0)
}

fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    match field(exif, tag)? {
        Value::Rational(v) => v.first().filter(|r| r.denom != 0).map(|r| r.to_f64()),
        Value::SRational(v) => v.first().filter(|r| r.denom != 0).map(|r| r.to_f64()),
        _ => None,
    }
}

fn exposure_time(exif: &Exif) -> Option<String> {
    let Value::Rational(v) = field(exif, Tag::ExposureTime)? else {
        return None;
    };
    let r = v.first().filter(|r| r.denom != 0 && r.num != 0)?;
    Some(match r.num >= r.denom {
        true => format!("{}", r.to_f64()),
        false => format!("1/{}", (f64::from(r.denom) / f64::from(r.num)).round()),
    })
}

fn coordinate(exif: &Exif, tag: Tag, reference: Tag, negative: &str) -> Option<f64> {
    let Value::Rational(dms) = field(exif, tag)? else {
        return None;
    };
    if dms.len() < 3 || dms.iter().any(|r| r.denom == 0) {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    Some(match ascii(exif, reference).is_some_and(|r| r.eq_ignore_ascii_case(negative)) {
        true => -degrees,
        false => degrees,
    })
}

fn altitude(exif: &Exif) -> Option<f64> {
    let metres = rational(exif, Tag::GPSAltitude)?;
    Some(match uint(exif, Tag::GPSAltitudeRef) {
        Some(1) => -metres,
        _ => metres,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::{Field, Rational};
    use time::macros::datetime;

    fn field(tag: Tag, value: Value) -> Field {
        Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        }
    }

    fn rationals(values: &[(u32, u32)]) -> Value {
        Value::Rational(values.iter().map(|&(num, denom)| Rational { num, denom }).collect())
    }

    fn ascii_value(s: &[u8]) -> Value {
        Value::Ascii(vec![s.to_vec()])
    }

    fn parse(fields: &[Field]) -> Option<PhotoExif> {
        let mut writer = Writer::new();
        for f in fields {
            writer.push_field(f);
        }
        let mut buffer = Cursor::new(Vec::new());
        writer.write(&mut buffer, false).unwrap();
        let exif = Reader::new().read_raw(buffer.into_inner()).unwrap();
        PhotoExif::from_exif(&exif)
    }

    #[test]
    fn test_camera_and_exposure() {
        let exif = parse(&[
            field(Tag::Make, ascii_value(b"FUJIFILM\0\0")),
            field(Tag::Model, ascii_value(b"  X-T5 ")),
            field(Tag::DateTimeOriginal, ascii_value(b"2024:03:09 17:45:01")),
            field(Tag::OffsetTimeOriginal, ascii_value(b"+09:00")),
            field(Tag::ExposureTime, rationals(&[(1, 250)])),
            field(Tag::FNumber, rationals(&[(28, 10)])),
            field(Tag::PhotographicSensitivity, Value::Short(vec![400])),
            field(Tag::FocalLength, rationals(&[(230, 10)])),
        ])
        .unwrap();
        assert_eq!(exif.make.as_deref(), Some("FUJIFILM"));
        assert_eq!(exif.model.as_deref(), Some("X-T5"));
        assert_eq!(exif.exposure_time.as_deref(), Some("1/250"));
        assert_eq!(exif.f_number, Some(2.8));
        assert_eq!(exif.iso, Some(400));
        assert_eq!(exif.focal_length, Some(23.0));
        assert_eq!(exif.captured_at(), Some(datetime!(2024-03-09 17:45:01 +09:00)));
    }

    #[test]
    fn test_gps() {
        let exif = parse(&[
            field(Tag::GPSLatitudeRef, ascii_value(b"S")),
            field(Tag::GPSLatitude, rationals(&[(33, 1), (51, 1), (36, 1)])),
            field(Tag::GPSLongitudeRef, ascii_value(b"E")),
            field(Tag::GPSLongitude, rationals(&[(151, 1), (12, 1), (0, 1)])),
            field(Tag::GPSAltitudeRef, Value::Byte(vec![1])),
            field(Tag::GPSAltitude, rationals(&[(15, 2)])),
        ])
        .unwrap();
        assert!((exif.gps_latitude.unwrap() + 33.86).abs() < 1e-9);
        assert!((exif.gps_longitude.unwrap() - 151.2).abs() < 1e-9);
        assert_eq!(exif.gps_altitude, Some(-7.5));
    }

    #[test]
    fn test_blank_strings_collapse_to_none() {
        assert_eq!(parse(&[field(Tag::Make, ascii_value(b"\0\0 \0"))]), None);
    }

    #[test]
    fn test_user_comment_is_dropped() {
        let exif = parse(&[field(Tag::UserComment, Value::Undefined(b"ASCII\0\0\0secret".to_vec(), 0))]);
        assert_eq!(exif, None);
    }

    #[test]
    fn test_captured_at_without_offset_is_utc() {
        let exif = PhotoExif {
            date_time_original: Some("2020:01:02 03:04:05".to_string()),
            ..Default::default()
        };
        assert_eq!(exif.captured_at(), Some(datetime!(2020-01-02 03:04:05 UTC)));
        let blank = PhotoExif {
            date_time_original: Some("0000:00:00 00:00:00".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.captured_at(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let exif = PhotoExif {
            make: Some("Apple".to_string()),
            f_number: Some(1.8),
            ..Default::default()
        };
        let json = serde_json::to_value(&exif).unwrap();
        assert_eq!(json, serde_json::json!({"make": "Apple", "fNumber": 1.8}));
    }

    #[test]
    fn test_extract_without_exif() {
        assert_eq!(extract(b"not an image at all").ok().flatten(), None);
    }
}
