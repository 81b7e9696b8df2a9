//! Image format detection and handling

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Encodable output formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    /// Representable for settings compatibility; this build has no AVIF encoder.
    Avif,
}

impl OutputFormat {
    /// File extension including the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::WebP => ".webp",
            Self::Avif => ".avif",
        }
    }

    /// Get MIME type for this format
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Avif => "image/avif",
        }
    }

    /// Whether the format has a quality axis
    pub fn is_lossy(self) -> bool {
        !matches!(self, Self::Png)
    }

    /// Whether an encoder for this format is compiled in
    pub fn is_encodable(self) -> bool {
        !matches!(self, Self::Avif)
    }

    /// All formats, in the order the CLI lists them
    pub fn all() -> &'static [OutputFormat] {
        &[Self::Jpeg, Self::Png, Self::WebP, Self::Avif]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WebP",
            Self::Avif => "AVIF",
        };
        f.write_str(name)
    }
}

/// Standard raster extensions accepted as input
const STANDARD_INPUT_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "bmp", "gif", "tiff", "tif", "webp", "avif",
];

/// Camera RAW extensions, each decoded through the RAW path
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "dng", "raf", "orf", "rw2", "pef", "srw",
];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Check whether a path carries a camera RAW extension
pub fn is_raw_extension<P: AsRef<Path>>(path: P) -> bool {
    extension_of(path.as_ref())
        .map(|ext| RAW_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Check if a file is a supported input by extension
pub fn is_supported_input<P: AsRef<Path>>(path: P) -> bool {
    extension_of(path.as_ref())
        .map(|ext| {
            STANDARD_INPUT_EXTENSIONS.contains(&ext.as_str())
                || RAW_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Get supported input extensions (standard first, then RAW)
pub fn supported_input_extensions() -> impl Iterator<Item = &'static str> {
    STANDARD_INPUT_EXTENSIONS
        .iter()
        .chain(RAW_EXTENSIONS.iter())
        .copied()
}

/// What the leading bytes of a file look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A raster format the standard decoders handle
    Standard(image::ImageFormat),
    /// A TIFF-based container: plain TIFF, or a camera RAW built on it
    TiffContainer,
    /// Nothing recognised
    Unknown,
}

/// Classify file content from its magic bytes
pub fn sniff_content(data: &[u8]) -> ContentKind {
    if let Some(kind) = infer::get(data) {
        match kind.mime_type() {
            "image/x-canon-cr2" | "image/tiff" => return ContentKind::TiffContainer,
            _ => {}
        }
    }

    match image::guess_format(data) {
        Ok(format) => ContentKind::Standard(format),
        Err(_) => ContentKind::Unknown,
    }
}
