//! Box and label overlay for processed frames.

use crate::pipeline::{FaceReport, FaceVerdict};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing;
use imageproc::rect::Rect;
use rollcall_core::BoundingBox;
use std::path::Path;

const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
const RED: Rgb<u8> = Rgb([220, 30, 30]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const STRIP_HEIGHT: u32 = 35;
const TEXT_SCALE: f32 = 22.0;

/// Draws face boxes and label strips. Text needs a font; without one only
/// the boxes and strips are drawn.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| match load_font(path) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to load label font; drawing boxes only"
                );
                None
            }
        });
        Self { font }
    }

    #[cfg(test)]
    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn draw(&self, image: &mut RgbImage, faces: &[FaceReport]) {
        for face in faces {
            let color = match face.verdict {
                FaceVerdict::Recognized { .. } => GREEN,
                _ => RED,
            };
            let Some(rect) = clip(&face.bbox, image.width(), image.height()) else {
                continue;
            };

            drawing::draw_hollow_rect_mut(image, rect, color);
            if rect.width() > 2 && rect.height() > 2 {
                let inner = Rect::at(rect.left() + 1, rect.top() + 1)
                    .of_size(rect.width() - 2, rect.height() - 2);
                drawing::draw_hollow_rect_mut(image, inner, color);
            }

            // Label strip inside the bottom of the box.
            let strip_h = STRIP_HEIGHT.min(rect.height());
            let strip_top = rect.bottom() - strip_h as i32 + 1;
            let strip = Rect::at(rect.left(), strip_top).of_size(rect.width(), strip_h);
            drawing::draw_filled_rect_mut(image, strip, color);

            if let Some(font) = &self.font {
                drawing::draw_text_mut(
                    image,
                    WHITE,
                    rect.left() + 6,
                    strip_top + 6,
                    PxScale::from(TEXT_SCALE),
                    font,
                    &face.verdict.label(),
                );
            }
        }
    }
}

fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}

/// Intersect a box with the frame. None when nothing is visible.
fn clip(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let left = bbox.x.max(0.0).floor() as i64;
    let top = bbox.y.max(0.0).floor() as i64;
    let right = ((bbox.x + bbox.width).ceil() as i64).min(width as i64);
    let bottom = ((bbox.y + bbox.height).ceil() as i64).min(height as i64);
    if right <= left || bottom <= top {
        return None;
    }
    let (w, h) = ((right - left) as u32, (bottom - top) as u32);
    Some(Rect::at(left as i32, top as i32).of_size(w, h))
}
