//! Frame brightness statistic and overlay compositing.
//!
//! Only the sky is measured: the camera also sees the dome, trees and the
//! horizon, which would otherwise dominate the mean. The sky region is a
//! polygon in pixel coordinates, filled with an even-odd scanline rule.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};

use crate::error::{OpsError, OpsResult};

/// Polygon selecting the sky portion of a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkyMask {
    vertices: Vec<(f64, f64)>,
}

impl SkyMask {
    /// A mask covering the whole frame.
    pub fn full_frame() -> Self {
        Self::default()
    }

    pub fn from_vertices(vertices: &[[f64; 2]]) -> Self {
        Self {
            vertices: vertices.iter().map(|v| (v[0], v[1])).collect(),
        }
    }

    pub fn is_full_frame(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Half-open column spans `[x0, x1)` inside the mask on row `y`.
    fn row_spans(&self, y: u32, width: u32) -> Vec<(u32, u32)> {
        if self.is_full_frame() {
            return vec![(0, width)];
        }

        // sample at the pixel center
        let yc = y as f64 + 0.5;
        let n = self.vertices.len();
        let mut crossings = Vec::new();
        for i in 0..n {
            let (x0, y0) = self.vertices[i];
            let (x1, y1) = self.vertices[(i + 1) % n];
            if (y0 <= yc && yc < y1) || (y1 <= yc && yc < y0) {
                crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        crossings
            .chunks_exact(2)
            .filter_map(|pair| {
                let start = (pair[0] - 0.5).ceil().max(0.0);
                let end = (pair[1] - 0.5).ceil().min(width as f64);
                (end > start).then_some((start as u32, end as u32))
            })
            .collect()
    }

    /// Whether pixel `(x, y)` lies inside the mask.
    pub fn contains(&self, x: u32, y: u32, width: u32) -> bool {
        self.row_spans(y, width)
            .iter()
            .any(|&(start, end)| start <= x && x < end)
    }
}

/// Decode a compressed frame (JPEG or PNG).
pub fn decode_frame(bytes: &[u8]) -> OpsResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(OpsError::from)
}

/// Mean grey level inside `mask`.
///
/// Returns NaN when the mask selects no pixels.
pub fn mean_brightness(gray: &GrayImage, mask: &SkyMask) -> f64 {
    let (width, height) = gray.dimensions();
    let mut sum = 0u64;
    let mut count = 0u64;
    for y in 0..height {
        for (start, end) in mask.row_spans(y, width) {
            for x in start..end {
                sum += gray.get_pixel(x, y).0[0] as u64;
                count += 1;
            }
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum as f64 / count as f64
    }
}

/// Decode `bytes` and measure the masked mean grey level.
pub fn measure_frame(bytes: &[u8], mask: &SkyMask) -> OpsResult<f64> {
    let frame = decode_frame(bytes)?;
    Ok(mean_brightness(&frame.to_luma8(), mask))
}

/// Alpha-blend `overlay` onto `base` wherever the overlay is non-black and
/// inside `mask`; other pixels keep the base value.
pub fn blend_overlay(
    base: &RgbImage,
    overlay: &RgbImage,
    alpha: f32,
    mask: &SkyMask,
) -> OpsResult<RgbImage> {
    if base.dimensions() != overlay.dimensions() {
        return Err(OpsError::Render(format!(
            "overlay is {}x{} but frame is {}x{}",
            overlay.width(),
            overlay.height(),
            base.width(),
            base.height()
        )));
    }

    let alpha = alpha.clamp(0.0, 1.0);
    let beta = 1.0 - alpha;
    let (width, height) = base.dimensions();
    let mut out = base.clone();
    for y in 0..height {
        for (start, end) in mask.row_spans(y, width) {
            for x in start..end {
                let over = overlay.get_pixel(x, y);
                if over.0.iter().all(|&c| c == 0) {
                    continue;
                }
                let under = base.get_pixel(x, y);
                let mut mixed = [0u8; 3];
                for c in 0..3 {
                    let v = alpha * over.0[c] as f32 + beta * under.0[c] as f32;
                    mixed[c] = v.round().clamp(0.0, 255.0) as u8;
                }
                out.put_pixel(x, y, Rgb(mixed));
            }
        }
    }
    Ok(out)
}
