//! Image references and attachment metadata.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub type AttachmentId = u64;

/// Extensions the CDN serves, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

static SIZE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<base>.+)-(?P<width>\d+)x(?P<height>\d+)\.(?P<ext>[A-Za-z0-9]+)$")
        .unwrap_or_else(|err| panic!("invalid size suffix pattern: {err}"))
});

/// Lowercased extension of the last path segment, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

pub fn is_supported(path: &str) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_positive(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// `<base>-<width>x<height>.<ext>` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSuffix {
    pub base: String,
    pub dimensions: Dimensions,
    pub extension: String,
}

impl SizeSuffix {
    /// Filename with the size suffix removed, keeping the extension's case.
    pub fn stripped_name(&self) -> String {
        format!("{}.{}", self.base, self.extension)
    }
}

/// Parse a filename carrying an intermediate-size suffix.
///
/// Dimensions that overflow `u32` are treated as no suffix.
pub fn parse_size_suffix(filename: &str) -> Option<SizeSuffix> {
    let captures = SIZE_SUFFIX.captures(filename)?;
    let width = captures["width"].parse().ok()?;
    let height = captures["height"].parse().ok()?;
    Some(SizeSuffix {
        base: captures["base"].to_string(),
        dimensions: Dimensions::new(width, height),
        extension: captures["ext"].to_string(),
    })
}

/// An absolute image URL split into the parts the rewriter works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub scheme: String,
    pub host: String,
    /// Percent-encoded path, as it appeared in the URL.
    pub path: String,
    pub query: Option<String>,
}

impl ImageReference {
    pub fn from_url(url: &Url) -> Self {
        Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            path: url.path().to_string(),
            query: url.query().filter(|query| !query.is_empty()).map(str::to_string),
        }
    }

    /// Last path segment, still percent-encoded.
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Path up to and including the final `/`.
    pub fn directory(&self) -> &str {
        match self.path.rfind('/') {
            Some(index) => &self.path[..=index],
            None => "",
        }
    }
}

/// Path served by the CDN plus the resize hints that replace a stripped suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImagePath {
    pub path: String,
    pub resize: Option<Dimensions>,
}

impl CanonicalImagePath {
    pub fn unchanged(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resize: None,
        }
    }
}

/// Stored metadata for an uploaded image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentMeta {
    /// Original file, relative to the uploads base (`2024/05/photo.jpg`).
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub sizes: BTreeMap<String, ImageSizeMeta>,
}

impl AttachmentMeta {
    /// Basename of the original file.
    pub fn basename(&self) -> &str {
        self.file.rsplit('/').next().unwrap_or_default()
    }

    /// Directory of the original file relative to the uploads base, with a
    /// trailing `/` when non-empty.
    pub fn directory(&self) -> &str {
        match self.file.rfind('/') {
            Some(index) => &self.file[..=index],
            None => "",
        }
    }
}

/// One generated intermediate size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSizeMeta {
    pub file: String,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_case_insensitive() {
        assert!(is_supported("/uploads/Photo.JPG"));
        assert!(is_supported("/uploads/anim.webp"));
        assert!(!is_supported("/uploads/logo.svg"));
        assert!(!is_supported("/uploads/scan.bmp"));
        assert!(!is_supported("/uploads/no-extension"));
        assert!(!is_supported("/uploads.d/readme"));
    }

    #[test]
    fn parses_size_suffix() {
        let suffix = parse_size_suffix("sunset-beach-300x200.JPG").expect("suffix");
        assert_eq!(suffix.base, "sunset-beach");
        assert_eq!(suffix.dimensions, Dimensions::new(300, 200));
        assert_eq!(suffix.stripped_name(), "sunset-beach.JPG");
    }

    #[test]
    fn ignores_names_without_suffix() {
        assert!(parse_size_suffix("sunset.jpg").is_none());
        assert!(parse_size_suffix("-300x200.jpg").is_none());
        assert!(parse_size_suffix("photo-300x.jpg").is_none());
        assert!(parse_size_suffix("photo-99999999999x2.jpg").is_none());
    }

    #[test]
    fn reference_splits_directory_and_filename() {
        let url = Url::parse("https://example.com/wp-content/uploads/2024/05/a%20b.jpg?v=2")
            .expect("url");
        let reference = ImageReference::from_url(&url);
        assert_eq!(reference.directory(), "/wp-content/uploads/2024/05/");
        assert_eq!(reference.filename(), "a%20b.jpg");
        assert_eq!(reference.query.as_deref(), Some("v=2"));
    }

    #[test]
    fn metadata_splits_file() {
        let meta = AttachmentMeta {
            file: "2024/05/photo.jpg".into(),
            ..AttachmentMeta::default()
        };
        assert_eq!(meta.basename(), "photo.jpg");
        assert_eq!(meta.directory(), "2024/05/");

        let flat = AttachmentMeta {
            file: "photo.jpg".into(),
            ..AttachmentMeta::default()
        };
        assert_eq!(flat.directory(), "");
    }
}
