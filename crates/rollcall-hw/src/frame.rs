//! RGB frame type and pixel format conversion.

use image::RgbImage;
use std::path::Path;

/// A captured or loaded RGB frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
}

impl Frame {
    /// Wrap packed RGB24 bytes, rejecting buffers that don't match the dimensions.
    pub fn from_rgb(
        width: u32,
        height: u32,
        data: Vec<u8>,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::InvalidLength {
            expected,
            actual: 0,
        })?;
        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u32) -> Self {
        Self { image, sequence }
    }

    /// Decode a still image file (JPEG, PNG, ...) into a frame.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let image = image::open(path)?.into_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::InvalidLength {
                expected: 3,
                actual: 0,
            });
        }
        Ok(Self::from_image(image, 0))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Convert packed YUYV (4:2:2) to RGB24 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected || width % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * cr),
        clamp(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp(y + 1.772 * cb),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray_pixels() {
        // Neutral chroma: RGB equals luma.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // Strong Cr pushes red up and green down.
        let rgb = yuyv_to_rgb(&[128, 128, 128, 255], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red = {}", rgb[0]);
        assert!(rgb[1] < 100, "green = {}", rgb[1]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0; 12], 1).is_ok());
        assert!(matches!(
            Frame::from_rgb(2, 2, vec![0; 11], 1),
            Err(FrameError::InvalidLength {
                expected: 12,
                actual: 11
            })
        ));
        assert!(Frame::from_rgb(0, 2, vec![], 1).is_err());
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = std::env::temp_dir().join(format!("rollcall-frame-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corrupt.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        assert!(matches!(Frame::load(&path), Err(FrameError::Decode(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_png_round_trip() {
        let dir = std::env::temp_dir().join(format!("rollcall-frame-ok-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("still.png");
        RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30])).save(&path).unwrap();

        let frame = Frame::load(&path).unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.image.get_pixel(3, 3).0, [10, 20, 30]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
