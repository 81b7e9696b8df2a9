//! Camera RAW development to 8-bit RGB
//!
//! Sensor data is read with `rawloader` and developed with a
//! small pipeline: black/white level normalisation, camera white balance,
//! a 2x2 block demosaic and a display gamma. No colour matrix is applied.

use image::RgbImage;
use rayon::prelude::*;

/// CFA colour index per sensor site, sampled over a 6x6 tile.
///
/// Six covers both Bayer (2x2) and X-Trans (6x6) layouts.
/// Colour indices follow rawloader: 0 red, 1 green, 2 blue, 3 second green.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfaPattern {
    colors: [[usize; 6]; 6],
}

impl CfaPattern {
    /// Build a pattern from a `(row, col) -> colour` lookup
    pub fn from_fn(color_at: impl Fn(usize, usize) -> usize) -> Self {
        let mut colors = [[0usize; 6]; 6];
        for (row, line) in colors.iter_mut().enumerate() {
            for (col, color) in line.iter_mut().enumerate() {
                *color = color_at(row, col);
            }
        }
        Self { colors }
    }

    /// The common RGGB Bayer layout
    pub fn rggb() -> Self {
        Self::from_fn(|row, col| match (row % 2, col % 2) {
            (0, 0) => 0,
            (1, 1) => 2,
            _ => 1,
        })
    }

    fn color_at(&self, row: usize, col: usize) -> usize {
        self.colors[row % 6][col % 6]
    }
}

/// Undeveloped sensor data, independent of the decoder that produced it
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub width: usize,
    pub height: usize,
    /// Components per pixel: 1 for a mosaic, 3 for already-interpolated RGB
    pub cpp: usize,
    pub samples: Vec<u16>,
    pub black_levels: [u16; 4],
    pub white_levels: [u16; 4],
    /// As-shot white balance multipliers, in CFA colour order
    pub wb_coeffs: [f32; 4],
    /// Crop margins: top, right, bottom, left
    pub crops: [usize; 4],
    pub cfa: CfaPattern,
}

impl SensorFrame {
    fn cropped_bounds(&self) -> (usize, usize, usize, usize) {
        let [top, right, bottom, left] = self.crops;
        if top + bottom >= self.height || left + right >= self.width {
            return (0, 0, self.width, self.height);
        }
        (top, left, self.width - left - right, self.height - top - bottom)
    }

    fn white_balance(&self) -> [f32; 4] {
        let sane = |v: f32| if v.is_finite() && v > 0.0 { v } else { 1.0 };
        let green = sane(self.wb_coeffs[1]);
        let mut wb = [1.0f32; 4];
        for (i, slot) in wb.iter_mut().enumerate() {
            *slot = sane(self.wb_coeffs[i]) / green;
        }
        if !(self.wb_coeffs[3].is_finite() && self.wb_coeffs[3] > 0.0) {
            wb[3] = wb[1];
        }
        wb
    }
}

const GAMMA_LUT_SIZE: usize = 4096;

fn gamma_lut() -> Vec<u8> {
    (0..GAMMA_LUT_SIZE)
        .map(|i| {
            let linear = i as f32 / (GAMMA_LUT_SIZE - 1) as f32;
            (linear.powf(1.0 / 2.2) * 255.0).round() as u8
        })
        .collect()
}

/// Develop a sensor frame into an 8-bit RGB raster
pub fn develop(frame: &SensorFrame) -> RgbImage {
    let (top, left, out_w, out_h) = frame.cropped_bounds();
    let wb = frame.white_balance();
    let lut = gamma_lut();

    let mut scale = [0f32; 4];
    for c in 0..4 {
        let black = f32::from(frame.black_levels[c]);
        let white = f32::from(frame.white_levels[c]);
        let range = if white > black { white - black } else { 65535.0 - black };
        scale[c] = wb[c] / range.max(1.0);
    }

    let normalize = |value: u16, color: usize| -> f32 {
        let color = color.min(3);
        (f32::from(value) - f32::from(frame.black_levels[color])).max(0.0) * scale[color]
    };
    let to_byte = |linear: f32| -> u8 {
        let index = (linear.clamp(0.0, 1.0) * (GAMMA_LUT_SIZE - 1) as f32) as usize;
        lut[index]
    };

    let mut buffer = vec![0u8; out_w * out_h * 3];

    buffer
        .par_chunks_mut(out_w * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = y + top;
            for x in 0..out_w {
                let sx = x + left;
                let rgb = if frame.cpp >= 3 {
                    let base = (sy * frame.width + sx) * frame.cpp;
                    [
                        normalize(frame.samples[base], 0),
                        normalize(frame.samples[base + 1], 1),
                        normalize(frame.samples[base + 2], 2),
                    ]
                } else {
                    demosaic_block(frame, sx, sy, &normalize)
                };

                let out = &mut row[x * 3..x * 3 + 3];
                for (channel, value) in out.iter_mut().zip(rgb) {
                    *channel = to_byte(value);
                }
            }
        });

    RgbImage::from_raw(out_w as u32, out_h as u32, buffer)
        .unwrap_or_else(|| RgbImage::new(out_w as u32, out_h as u32))
}

/// Average each colour over the aligned 2x2 block containing `(x, y)`
fn demosaic_block(
    frame: &SensorFrame,
    x: usize,
    y: usize,
    normalize: &impl Fn(u16, usize) -> f32,
) -> [f32; 3] {
    let bx = x & !1;
    let by = y & !1;
    let mut sums = [0f32; 3];
    let mut counts = [0u32; 3];

    for dy in 0..2 {
        for dx in 0..2 {
            let sx = (bx + dx).min(frame.width - 1);
            let sy = (by + dy).min(frame.height - 1);
            let color = frame.cfa.color_at(sy, sx);
            let value = normalize(frame.samples[sy * frame.width + sx], color);
            let channel = if color == 3 { 1 } else { color.min(2) };
            sums[channel] += value;
            counts[channel] += 1;
        }
    }

    let green = if counts[1] > 0 { sums[1] / counts[1] as f32 } else { 0.0 };
    let mut rgb = [0f32; 3];
    for c in 0..3 {
        rgb[c] = if counts[c] > 0 { sums[c] / counts[c] as f32 } else { green };
    }
    rgb
}

#[cfg(feature = "raw")]
mod decode {
    use std::path::Path;

    use super::{CfaPattern, SensorFrame};

    /// Read sensor data from a camera RAW file
    pub fn read_frame(path: &Path) -> Result<SensorFrame, String> {
        let loader = rawloader::RawLoader::new();
        let raw = loader
            .decode_file(path)
            .map_err(|e| format!("{:?}", e))?;

        let samples: Vec<u16> = match raw.data {
            rawloader::RawImageData::Integer(values) => values,
            rawloader::RawImageData::Float(values) => values
                .iter()
                .map(|&v| (v * 65535.0).clamp(0.0, 65535.0) as u16)
                .collect(),
        };

        if raw.width == 0 || raw.height == 0 || samples.len() < raw.width * raw.height * raw.cpp {
            return Err(format!(
                "sensor data is truncated ({}x{}x{}, {} samples)",
                raw.width,
                raw.height,
                raw.cpp,
                samples.len()
            ));
        }

        let cfa = &raw.cfa;
        Ok(SensorFrame {
            width: raw.width,
            height: raw.height,
            cpp: raw.cpp,
            samples,
            black_levels: raw.blacklevels,
            white_levels: raw.whitelevels,
            wb_coeffs: raw.wb_coeffs,
            crops: raw.crops,
            cfa: CfaPattern::from_fn(|row, col| cfa.color_at(row, col)),
        })
    }
}

#[cfg(feature = "raw")]
pub use decode::read_frame;

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(width: usize, height: usize, value: u16) -> SensorFrame {
        SensorFrame {
            width,
            height,
            cpp: 1,
            samples: vec![value; width * height],
            black_levels: [0; 4],
            white_levels: [1000; 4],
            wb_coeffs: [1.0, 1.0, 1.0, f32::NAN],
            crops: [0; 4],
            cfa: CfaPattern::rggb(),
        }
    }

    #[test]
    fn test_flat_grey_develops_neutral() {
        let image = develop(&flat_frame(4, 4, 500));
        assert_eq!(image.dimensions(), (4, 4));
        let px = image.get_pixel(1, 1);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        // 0.5 linear through a 2.2 gamma lands around 186
        assert!((180..=192).contains(&px[0]), "got {:?}", px);
    }

    #[test]
    fn test_red_sites_drive_red_channel() {
        let mut frame = flat_frame(2, 2, 0);
        frame.samples[0] = 1000; // R at (0, 0) in RGGB
        let image = develop(&frame);
        let px = image.get_pixel(0, 0);
        assert_eq!(px[0], 255);
        assert_eq!(px[1], 0);
        assert_eq!(px[2], 0);
    }

    #[test]
    fn test_white_balance_normalised_to_green() {
        let mut frame = flat_frame(2, 2, 250);
        frame.wb_coeffs = [4.0, 2.0, 1.0, 2.0];
        let image = develop(&frame);
        let px = image.get_pixel(0, 0);
        assert!(px[0] > px[1]);
        assert!(px[1] > px[2]);
    }

    #[test]
    fn test_black_level_and_clipping() {
        let mut frame = flat_frame(2, 2, 100);
        frame.black_levels = [100; 4];
        assert_eq!(develop(&frame).get_pixel(0, 0)[1], 0);

        let mut frame = flat_frame(2, 2, 60_000);
        frame.white_levels = [4095; 4];
        assert_eq!(develop(&frame).get_pixel(0, 0)[1], 255);
    }

    #[test]
    fn test_crops_applied() {
        let mut frame = flat_frame(10, 8, 300);
        frame.crops = [1, 2, 1, 2];
        assert_eq!(develop(&frame).dimensions(), (6, 6));

        // Impossible margins are ignored
        frame.crops = [8, 0, 0, 0];
        assert_eq!(develop(&frame).dimensions(), (10, 8));
    }

    #[test]
    fn test_odd_dimensions() {
        let image = develop(&flat_frame(5, 3, 400));
        assert_eq!(image.dimensions(), (5, 3));
    }

    #[test]
    fn test_three_component_frame() {
        let frame = SensorFrame {
            cpp: 3,
            samples: [1000u16, 0, 0].repeat(4),
            ..flat_frame(2, 2, 0)
        };
        let image = develop(&frame);
        assert_eq!(image.get_pixel(1, 1).0, [255, 0, 0]);
    }
}
