//! Key validation and security utilities.
//!
//! Object keys are `/`-separated, regardless of platform. This module ensures
//! that keys never escape the storage root (important for the local
//! filesystem provider) and normalises redundant separators.

use crate::error::{ErrorKind, Result};

/// Validates a storage key for security and correctness.
/// Ensures that keys don't escape the storage root (no `..` traversal).
///
/// > **Note:** Backslashes are **not** treated as separators; they are
/// >           legal characters in object-store keys. Null bytes are rejected.
///
/// # Returns
/// Returns the normalized key if valid, or [`InvalidKey`](crate::error::ErrorKind::InvalidKey)
/// if invalid.
///
/// # Examples
///
/// ```
/// use prism_storage::validate_key;
/// // Valid keys
/// assert!(validate_key("2024/tokyo/IMG_0001.jpg").is_ok());
/// assert!(validate_key("a/../photo.jpg").is_ok()); // (never leaves the root)
/// // Invalid keys
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a/../../b").is_err());
/// assert!(validate_key("a\0b").is_err());
/// // Keys get resolved
/// assert_eq!(
///     validate_key("wrong/../still-wrong/.././correct//./photo.jpg/").unwrap(),
///     "correct/photo.jpg"
/// );
/// ```
pub fn validate(key: impl AsRef<str>) -> Result<String> {
    let key = key.as_ref();
    if key.contains('\0') {
        exn::bail!(ErrorKind::InvalidKey(key.replace('\0', "\\0")));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in key.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidKey(key.to_string()));
                }
            },
            s => segments.push(s),
        }
    }
    match segments.is_empty() {
        true => exn::bail!(ErrorKind::InvalidKey(key.to_string())),
        false => Ok(segments.join("/")),
    }
}

/// Check `key` the way [`validate`] does, but hand back the key exactly as
/// given.
///
/// Remote object stores treat `a//b.jpg` and `a/b.jpg` as different objects,
/// so listed keys must be sent back unchanged.
pub(crate) fn check(key: &str) -> Result<&str> {
    validate(key)?;
    Ok(key)
}

/// Normalise an optional prefix into `segment/segment` form (no leading or
/// trailing slash). An empty prefix is the same as no prefix at all.
pub(crate) fn normalize_prefix(prefix: Option<&str>) -> Result<Option<String>> {
    match prefix.map(str::trim) {
        None => Ok(None),
        Some(p) if p.trim_matches('/').is_empty() => Ok(None),
        Some(p) => validate(p).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert_eq!(validate("2024/tokyo/IMG_0001.jpg").unwrap(), "2024/tokyo/IMG_0001.jpg");
        assert_eq!(validate("a/b/c/photo.heic").unwrap(), "a/b/c/photo.heic");
        assert_eq!(validate("simple.jpg").unwrap(), "simple.jpg");
        // Backslashes are ordinary characters in object keys
        assert_eq!(validate("odd\\name.jpg").unwrap(), "odd\\name.jpg");
    }

    #[test]
    fn test_key_normalization() {
        // Double slashes are normalized
        assert_eq!(validate("a//b//c").unwrap(), "a/b/c");
        // Current directory references removed
        assert_eq!(validate("a/./b/./c").unwrap(), "a/b/c");
        // Leading slash removed
        assert_eq!(validate("/a/b.jpg").unwrap(), "a/b.jpg");
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate("../etc/passwd").is_err());
        assert!(validate("a/../../b").is_err());
        assert!(validate("..").is_err());
        assert!(validate("../..").is_err());
    }

    #[test]
    fn test_reverse_attempts() {
        // Traversal remains within the root
        assert_eq!(validate("a/b/..").unwrap(), "a");
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate("a\0b").is_err());
        assert!(validate("\0").is_err());
    }

    #[test]
    fn test_check_keeps_key_verbatim() {
        assert_eq!(check("a//b.jpg").unwrap(), "a//b.jpg");
        assert_eq!(check("x/../y.jpg").unwrap(), "x/../y.jpg");
        assert_eq!(check("/leading.jpg").unwrap(), "/leading.jpg");
        assert!(check("../escape.jpg").is_err());
        assert!(check("a\0b").is_err());
    }

    #[test]
    fn test_empty_keys() {
        assert!(validate("").is_err());
        assert!(validate(".").is_err());
        assert!(validate("./").is_err());
        assert!(validate("./.").is_err());
        assert!(validate("//").is_err());
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None).unwrap(), None);
        assert_eq!(normalize_prefix(Some("")).unwrap(), None);
        assert_eq!(normalize_prefix(Some("/")).unwrap(), None);
        assert_eq!(normalize_prefix(Some("photos/")).unwrap().as_deref(), Some("photos"));
        assert_eq!(normalize_prefix(Some("/a/b/")).unwrap().as_deref(), Some("a/b"));
        assert!(normalize_prefix(Some("../up")).is_err());
    }
}
