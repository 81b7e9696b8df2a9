//! Encoding rasters to output bytes, optionally under a byte budget

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat};
use thiserror::Error;
use tracing::{debug, warn};

use super::formats::OutputFormat;

/// Lowest quality the encoders accept
pub const MIN_QUALITY: u8 = 1;

/// Highest quality the size search will try
pub const MAX_SEARCH_QUALITY: u8 = 95;

/// Maximum binary-search steps before falling back
pub const MAX_SEARCH_ITERATIONS: u32 = 10;

/// Encoder failures. Always reported as `FailedToSave` at the job level.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// No encoder for this format in the current build
    #[error("{format} encoding is not available in this build")]
    Unsupported { format: OutputFormat },

    /// A size target was requested for a format without a quality axis
    #[error("{format} is lossless; a target size cannot be searched")]
    NoQualityAxis { format: OutputFormat },

    /// The codec rejected the raster
    #[error("{format} encoder failed: {message}")]
    Codec {
        format: OutputFormat,
        message: String,
    },

    /// Errors from the image crate's encoders
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Encode at a fixed quality. PNG ignores `quality`.
pub fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, EncodeError> {
    let quality = quality.clamp(MIN_QUALITY, 100);

    match format {
        OutputFormat::Jpeg => encode_jpeg(image, quality),
        OutputFormat::Png => encode_png(image),
        OutputFormat::WebP => encode_webp(image, quality),
        OutputFormat::Avif => Err(EncodeError::Unsupported { format }),
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    // JPEG has no alpha channel
    let rgb = match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image.clone(),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };

    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageOutputFormat::Jpeg(quality))?;
    Ok(buffer.into_inner())
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageOutputFormat::Png)?;
    Ok(buffer.into_inner())
}

fn encode_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = (image.width(), image.height());

    let encoded = if image.color().has_alpha() {
        let rgba = image.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height)
            .encode_simple(false, f32::from(quality))
    } else {
        let rgb = image.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height)
            .encode_simple(false, f32::from(quality))
    };

    encoded
        .map(|memory| memory.to_vec())
        .map_err(|e| EncodeError::Codec {
            format: OutputFormat::WebP,
            message: format!("{:?}", e),
        })
}

/// Outcome of a size-targeted encode
#[derive(Debug, Clone)]
pub struct TargetEncoding {
    /// The encoded buffer that will be written
    pub bytes: Vec<u8>,
    /// Quality the buffer was encoded at
    pub quality: u8,
    /// Whether `bytes` fits the requested budget
    pub met_target: bool,
    /// Number of encoder invocations spent
    pub attempts: u32,
}

/// Encode a lossy format at the highest quality whose output fits `max_bytes`.
///
/// Best effort: when even quality 1 is too large, the quality-1 buffer is
/// returned with `met_target == false`. Only codec failures are errors.
pub fn encode_to_target(
    image: &DynamicImage,
    format: OutputFormat,
    max_bytes: u64,
) -> Result<TargetEncoding, EncodeError> {
    if !format.is_lossy() {
        return Err(EncodeError::NoQualityAxis { format });
    }
    if !format.is_encodable() {
        return Err(EncodeError::Unsupported { format });
    }

    debug!(
        "Searching {} quality for a {}x{} raster under {} bytes",
        format,
        image.width(),
        image.height(),
        max_bytes
    );

    search_quality(max_bytes, |quality| encode(image, format, quality))
}

/// Bounded binary search over quality in `[MIN_QUALITY, MAX_SEARCH_QUALITY]`.
///
/// Assumes encoded size grows with quality. At most
/// `MAX_SEARCH_ITERATIONS + 1` calls to `encode_at`.
pub fn search_quality<F>(max_bytes: u64, mut encode_at: F) -> Result<TargetEncoding, EncodeError>
where
    F: FnMut(u8) -> Result<Vec<u8>, EncodeError>,
{
    let mut lo = u32::from(MIN_QUALITY);
    let mut hi = u32::from(MAX_SEARCH_QUALITY);
    let mut best: Option<(u8, Vec<u8>)> = None;
    let mut attempts = 0;

    for _ in 0..MAX_SEARCH_ITERATIONS {
        if lo > hi {
            break;
        }

        let mid = (lo + hi) / 2;
        let quality = mid as u8;
        let bytes = encode_at(quality)?;
        attempts += 1;

        if bytes.len() as u64 <= max_bytes {
            debug!("Quality {} fits: {} <= {} bytes", quality, bytes.len(), max_bytes);
            best = Some((quality, bytes));
            lo = mid + 1;
        } else {
            debug!("Quality {} too large: {} > {} bytes", quality, bytes.len(), max_bytes);
            hi = mid - 1;
        }
    }

    if let Some((quality, bytes)) = best {
        return Ok(TargetEncoding {
            bytes,
            quality,
            met_target: true,
            attempts,
        });
    }

    let bytes = encode_at(MIN_QUALITY)?;
    attempts += 1;
    warn!(
        "Target of {} bytes not reachable; using quality {} ({} bytes)",
        max_bytes,
        MIN_QUALITY,
        bytes.len()
    );

    Ok(TargetEncoding {
        bytes,
        quality: MIN_QUALITY,
        met_target: false,
        attempts,
    })
}
