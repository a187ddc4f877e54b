//! Timestamp caption stamped on annotated frames.
//!
//! The caption reads `Cloud Cam YYYY-MM-DD Ddd HH:MM:SS` in site-local time
//! and sits in the bottom-left corner.

use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use chrono::{DateTime, FixedOffset, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};

use super::storage::local_offset;
use crate::error::{OpsError, OpsResult};

const CAPTION_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MARGIN_PX: u32 = 25;

pub struct Captioner {
    font: FontVec,
    scale: PxScale,
    local_offset: FixedOffset,
}

impl Captioner {
    /// Load the caption font from disk.
    pub fn load(font_path: &Path, scale: f32, utc_offset_hours: f64) -> OpsResult<Self> {
        let bytes = fs::read(font_path).map_err(|e| {
            OpsError::Configuration(format!(
                "cannot read caption font {}: {}",
                font_path.display(),
                e
            ))
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|e| {
            OpsError::Configuration(format!(
                "invalid caption font {}: {}",
                font_path.display(),
                e
            ))
        })?;
        Ok(Self {
            font,
            scale: PxScale::from(scale),
            local_offset: local_offset(utc_offset_hours)?,
        })
    }

    pub fn text(&self, observed_at: DateTime<Utc>) -> String {
        caption_text(observed_at, self.local_offset)
    }

    /// Draw the caption for `observed_at` onto `image`.
    pub fn draw(&self, image: &mut RgbImage, observed_at: DateTime<Utc>) {
        let text = self.text(observed_at);
        let (_, height) = text_size(self.scale, &self.font, &text);
        let y = image.height().saturating_sub(MARGIN_PX + height);
        draw_text_mut(
            image,
            CAPTION_COLOR,
            MARGIN_PX as i32,
            y as i32,
            self.scale,
            &self.font,
            &text,
        );
    }
}

pub fn caption_text(observed_at: DateTime<Utc>, offset: FixedOffset) -> String {
    format!(
        "Cloud Cam {}",
        observed_at
            .with_timezone(&offset)
            .format("%Y-%m-%d %a %H:%M:%S")
    )
}
