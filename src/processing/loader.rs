//! Reading and decoding input files

use std::ops::Deref;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use super::formats::{is_raw_extension, sniff_content, ContentKind};

/// Inputs above this size are memory-mapped instead of read into a buffer
pub const MMAP_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Load failures. Always reported as `FailedToLoad` at the job level.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not decode {path:?}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Could not decode camera RAW {path:?}: {message}")]
    Raw { path: PathBuf, message: String },

    #[error("Camera RAW support is not compiled in; cannot decode {path:?}")]
    RawUnavailable { path: PathBuf },
}

impl LoadError {
    /// The input this error refers to
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Decode { path, .. }
            | Self::Raw { path, .. }
            | Self::RawUnavailable { path } => path,
        }
    }
}

/// Which decoder produced the raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    Standard,
    Raw,
}

/// A decoded input together with its on-disk size
#[derive(Debug)]
pub struct LoadedImage {
    pub image: DynamicImage,
    pub file_size: u64,
    pub decoded_by: DecodePath,
}

/// File contents, owned or mapped
pub enum SourceBytes {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mapped(memmap2::Mmap),
}

impl Deref for SourceBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            #[cfg(feature = "mmap")]
            Self::Mapped(map) => map,
        }
    }
}

/// Read a file, mapping it when it is large enough to be worth it
pub fn read_source(path: &Path) -> Result<SourceBytes, LoadError> {
    let io_error = |source: std::io::Error| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file_size = std::fs::metadata(path).map_err(io_error)?.len();

    if let Some(mapped) = map_large(path, file_size).map_err(io_error)? {
        return Ok(mapped);
    }

    std::fs::read(path).map(SourceBytes::Owned).map_err(io_error)
}

#[cfg(feature = "mmap")]
fn map_large(path: &Path, file_size: u64) -> std::io::Result<Option<SourceBytes>> {
    if file_size <= MMAP_THRESHOLD {
        return Ok(None);
    }

    debug!("Using memory mapping for large file: {:?}", path);
    let file = std::fs::File::open(path)?;
    // The mapping is read-only and dropped before the job writes anything.
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    Ok(Some(SourceBytes::Mapped(map)))
}

#[cfg(not(feature = "mmap"))]
fn map_large(_path: &Path, _file_size: u64) -> std::io::Result<Option<SourceBytes>> {
    Ok(None)
}

/// Load and decode an input file.
///
/// Content decides the decoder, not the extension: standard rasters go
/// through the `image` crate. Files with a camera RAW extension fall back to
/// the RAW developer when the standard decoders fail, and skip them entirely
/// when the content is a TIFF container, which would otherwise decode to the
/// embedded preview.
pub fn load_image(path: &Path) -> Result<LoadedImage, LoadError> {
    debug!("Loading image: {:?}", path);

    let bytes = read_source(path)?;
    let file_size = bytes.len() as u64;
    let raw_extension = is_raw_extension(path);
    let content = sniff_content(&bytes);

    let try_standard = !(raw_extension && content == ContentKind::TiffContainer);

    if try_standard {
        match image::load_from_memory(&bytes) {
            Ok(image) => {
                debug!(
                    "Decoded {:?} as {:?}: {}x{}",
                    path,
                    content,
                    image.width(),
                    image.height()
                );
                return Ok(LoadedImage {
                    image,
                    file_size,
                    decoded_by: DecodePath::Standard,
                });
            }
            Err(e) if !raw_extension => {
                return Err(LoadError::Decode {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                debug!("Standard decode of {:?} failed ({}), trying RAW", path, e);
            }
        }
    }

    drop(bytes);
    let image = load_raw(path)?;

    Ok(LoadedImage {
        image,
        file_size,
        decoded_by: DecodePath::Raw,
    })
}

#[cfg(feature = "raw")]
fn load_raw(path: &Path) -> Result<DynamicImage, LoadError> {
    let frame = super::raw::read_frame(path).map_err(|message| LoadError::Raw {
        path: path.to_path_buf(),
        message,
    })?;

    debug!(
        "Developing RAW {:?}: {}x{} ({} cpp)",
        path, frame.width, frame.height, frame.cpp
    );

    Ok(DynamicImage::ImageRgb8(super::raw::develop(&frame)))
}

#[cfg(not(feature = "raw"))]
fn load_raw(path: &Path) -> Result<DynamicImage, LoadError> {
    Err(LoadError::RawUnavailable {
        path: path.to_path_buf(),
    })
}
