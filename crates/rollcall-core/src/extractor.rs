//! Frame → (bounding box, descriptor) extraction.
//!
//! [`DescriptorExtractor`] is the seam the capture loop and enrollment work
//! against. [`OnnxExtractor`] runs SCRFD + the descriptor model on a
//! downscaled copy of the frame and maps boxes back to full resolution.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Descriptor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use thiserror::Error;

/// Linear downscale applied before detection in the live loop.
pub const DEFAULT_DOWNSCALE: u32 = 4;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("malformed frame: {width}x{height}")]
    MalformedFrame { width: u32, height: u32 },
    #[error("frame {width}x{height} is too small to downscale by {factor}")]
    FrameTooSmall {
        width: u32,
        height: u32,
        factor: u32,
    },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// One detected face: its box in full-frame coordinates and its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

/// Turns a frame into zero or more face detections.
///
/// An empty result means no face was found and is not an error.
pub trait DescriptorExtractor {
    fn extract(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, ExtractionError>;

    /// Extract without any speed-oriented downscaling. Used for enrollment
    /// and uploaded stills.
    fn extract_full_resolution(
        &mut self,
        frame: &RgbImage,
    ) -> Result<Vec<FaceDetection>, ExtractionError> {
        self.extract(frame)
    }
}

/// SCRFD detector plus descriptor model.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    downscale: u32,
}

impl OnnxExtractor {
    pub fn load(
        detector_path: &str,
        recognizer_path: &str,
        downscale: u32,
    ) -> Result<Self, ExtractionError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self {
            detector,
            recognizer,
            downscale: downscale.max(1),
        })
    }
}

impl DescriptorExtractor for OnnxExtractor {
    fn extract(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, ExtractionError> {
        let factor = self.downscale;
        self.run(frame, factor)
    }

    fn extract_full_resolution(
        &mut self,
        frame: &RgbImage,
    ) -> Result<Vec<FaceDetection>, ExtractionError> {
        self.run(frame, 1)
    }
}

impl OnnxExtractor {
    fn run(
        &mut self,
        frame: &RgbImage,
        factor: u32,
    ) -> Result<Vec<FaceDetection>, ExtractionError> {
        let detector = &mut self.detector;
        let recognizer = &mut self.recognizer;

        extract_scaled(frame, factor, |small| {
            let faces = detector.detect(small)?;
            let mut out = Vec::with_capacity(faces.len());
            for face in faces {
                match recognizer.describe(small, &face) {
                    Ok(descriptor) => out.push(FaceDetection {
                        bbox: face,
                        descriptor,
                    }),
                    Err(RecognizerError::NoLandmarks) => {
                        tracing::debug!(
                            confidence = face.confidence,
                            "skipping face without landmarks"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(out)
        })
    }
}

/// Reject frames no model can consume.
pub fn validate_frame(frame: &RgbImage) -> Result<(), ExtractionError> {
    let (width, height) = frame.dimensions();
    let expected = width as usize * height as usize * 3;
    if width == 0 || height == 0 || frame.as_raw().len() < expected {
        return Err(ExtractionError::MalformedFrame { width, height });
    }
    Ok(())
}

/// Shrink `frame` by `factor` in each dimension. Factor 1 borrows the frame as-is.
pub fn downscale_frame(
    frame: &RgbImage,
    factor: u32,
) -> Result<Cow<'_, RgbImage>, ExtractionError> {
    if factor <= 1 {
        return Ok(Cow::Borrowed(frame));
    }
    let (width, height) = frame.dimensions();
    let (w, h) = (width / factor, height / factor);
    if w == 0 || h == 0 {
        return Err(ExtractionError::FrameTooSmall {
            width,
            height,
            factor,
        });
    }
    Ok(Cow::Owned(imageops::resize(frame, w, h, FilterType::Triangle)))
}

/// Run `detect` on the downscaled frame and map every box back up by the same factor.
pub fn extract_scaled<F>(
    frame: &RgbImage,
    factor: u32,
    detect: F,
) -> Result<Vec<FaceDetection>, ExtractionError>
where
    F: FnOnce(&RgbImage) -> Result<Vec<FaceDetection>, ExtractionError>,
{
    validate_frame(frame)?;
    let small = downscale_frame(frame, factor)?;
    let detections = detect(&small)?;

    let scale = factor.max(1) as f32;
    Ok(detections
        .into_iter()
        .map(|d| FaceDetection {
            bbox: d.bbox.scaled(scale),
            descriptor: d.descriptor,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DESCRIPTOR_DIM;

    fn detection_at(x: f32, y: f32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox {
                x,
                y,
                width: 10.0,
                height: 12.0,
                confidence: 0.9,
                landmarks: None,
            },
            descriptor: Descriptor::new(vec![0.0; DESCRIPTOR_DIM]).unwrap(),
        }
    }

    #[test]
    fn test_downscale_dimensions() {
        let frame = RgbImage::new(640, 480);
        let small = downscale_frame(&frame, 4).unwrap();
        assert_eq!(small.dimensions(), (160, 120));
        assert!(matches!(downscale_frame(&frame, 1).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_downscale_too_small() {
        let frame = RgbImage::new(3, 3);
        assert!(matches!(
            downscale_frame(&frame, 4),
            Err(ExtractionError::FrameTooSmall { factor: 4, .. })
        ));
    }

    #[test]
    fn test_empty_frame_is_malformed() {
        let frame = RgbImage::new(0, 0);
        let result = extract_scaled(&frame, 1, |_| Ok(vec![]));
        assert!(matches!(result, Err(ExtractionError::MalformedFrame { .. })));
    }

    #[test]
    fn test_boxes_scaled_back_to_full_frame() {
        let frame = RgbImage::new(640, 480);
        let out = extract_scaled(&frame, 4, |small| {
            assert_eq!(small.dimensions(), (160, 120));
            Ok(vec![detection_at(10.0, 20.0)])
        })
        .unwrap();

        assert_eq!(out.len(), 1);
        let b = &out[0].bbox;
        assert_eq!((b.x, b.y, b.width, b.height), (40.0, 80.0, 40.0, 48.0));
    }

    #[test]
    fn test_no_faces_is_empty_not_error() {
        let frame = RgbImage::new(64, 64);
        let out = extract_scaled(&frame, 4, |_| Ok(vec![])).unwrap();
        assert!(out.is_empty());
    }
}
