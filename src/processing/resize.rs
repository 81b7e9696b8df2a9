//! Image resizing

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// How a raster is scaled before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResizeSpec {
    /// Scale both dimensions by `percent / 100`
    Percentage { percent: u32 },

    /// Resize to a specific width, height follows aspect ratio
    FitWidth { width: u32 },

    /// Resize to a specific height, width follows aspect ratio
    FitHeight { height: u32 },

    /// Largest size that fits inside the box, aspect ratio preserved
    FitBoundingBox { width: u32, height: u32 },

    /// Keep the original dimensions
    NoResize,
}

impl Default for ResizeSpec {
    fn default() -> Self {
        Self::Percentage { percent: 100 }
    }
}

impl ResizeSpec {
    /// Reject parameters that cannot describe a raster
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Percentage { percent } if percent == 0 => Err(Error::invalid_job(
                "Resize percentage must be at least 1",
            )),
            Self::FitWidth { width: 0 } => Err(Error::invalid_job("Width must be greater than 0")),
            Self::FitHeight { height: 0 } => {
                Err(Error::invalid_job("Height must be greater than 0"))
            }
            Self::FitBoundingBox { width, height } if width == 0 || height == 0 => Err(
                Error::invalid_job("Bounding box width and height must be greater than 0"),
            ),
            _ => Ok(()),
        }
    }

    /// Output dimensions for a raster of `width` x `height`.
    ///
    /// Always at least 1x1. A zero parameter leaves the raster unchanged.
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if width == 0 || height == 0 {
            return (width.max(1), height.max(1));
        }

        let (w, h) = (u64::from(width), u64::from(height));

        let (new_w, new_h) = match *self {
            Self::Percentage { percent } if percent > 0 => {
                let p = u64::from(percent);
                (w * p / 100, h * p / 100)
            }
            Self::FitWidth { width: target } if target > 0 => {
                let target = u64::from(target);
                (target, rounded_div(h * target, w))
            }
            Self::FitHeight { height: target } if target > 0 => {
                let target = u64::from(target);
                (rounded_div(w * target, h), target)
            }
            Self::FitBoundingBox {
                width: box_w,
                height: box_h,
            } if box_w > 0 && box_h > 0 => {
                let (box_w, box_h) = (u64::from(box_w), u64::from(box_h));
                // Width the image would have at the box height; if that fits, height binds.
                let width_at_box_h = box_h * w / h;
                if width_at_box_h <= box_w {
                    (width_at_box_h, box_h)
                } else {
                    (box_w, box_w * h / w)
                }
            }
            _ => (w, h),
        };

        (clamp_dimension(new_w), clamp_dimension(new_h))
    }
}

fn rounded_div(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator / 2) / denominator
}

fn clamp_dimension(value: u64) -> u32 {
    value.clamp(1, u64::from(u32::MAX)) as u32
}

/// Available resize filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterType {
    /// Triangle (linear interpolation over a scaled support)
    #[default]
    Triangle,
    /// Catmull-Rom cubic spline
    CatmullRom,
    /// Gaussian blur
    Gaussian,
    /// Lanczos with radius 3
    Lanczos3,
}

impl From<FilterType> for image::imageops::FilterType {
    fn from(filter: FilterType) -> Self {
        match filter {
            FilterType::Triangle => image::imageops::FilterType::Triangle,
            FilterType::CatmullRom => image::imageops::FilterType::CatmullRom,
            FilterType::Gaussian => image::imageops::FilterType::Gaussian,
            FilterType::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// Smooth image resizer
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageResizer {
    filter: FilterType,
}

impl ImageResizer {
    /// Create a new resizer with the default smooth filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resizer with a custom filter
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    /// Resize an image according to the spec. Never fails.
    pub fn resize(&self, image: &DynamicImage, spec: &ResizeSpec) -> DynamicImage {
        let (target_width, target_height) = spec.target_dimensions(image.width(), image.height());

        if target_width == image.width() && target_height == image.height() {
            debug!("No resize needed for {}x{}", image.width(), image.height());
            return image.clone();
        }

        debug!(
            "Resizing {}x{} -> {}x{} using {:?}",
            image.width(),
            image.height(),
            target_width,
            target_height,
            self.filter
        );

        image.resize_exact(target_width, target_height, self.filter.into())
    }
}

/// Resize with the default filter
pub fn resize(image: &DynamicImage, spec: &ResizeSpec) -> DynamicImage {
    ImageResizer::new().resize(image, spec)
}
