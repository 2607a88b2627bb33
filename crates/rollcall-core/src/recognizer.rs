//! Face descriptor model via ONNX Runtime.
//!
//! Turns an aligned 112×112 RGB face crop into a 128-dimensional,
//! L2-normalized descriptor.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Descriptor, DESCRIPTOR_DIM};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const RECOGNIZER_MEAN: f32 = 127.5;
const RECOGNIZER_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place the descriptor model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the descriptor ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded descriptor model"
        );

        Ok(Self { session })
    }

    /// Compute the descriptor of a detected face in `frame`.
    pub fn describe(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor output: {e}")))?;

        to_descriptor(raw)
    }
}

/// Aligned crop → 1×3×112×112 tensor normalized to roughly [-1, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 - RECOGNIZER_MEAN) / RECOGNIZER_STD;
        }
    }
    tensor
}

/// Validate dimensionality, L2-normalize and widen to `f64`.
fn to_descriptor(raw: &[f32]) -> Result<Descriptor, RecognizerError> {
    if raw.len() != DESCRIPTOR_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
            raw.len()
        )));
    }

    let norm = raw.iter().map(|&v| (v as f64).powi(2)).sum::<f64>().sqrt();
    let values = raw
        .iter()
        .map(|&v| if norm > 0.0 { v as f64 / norm } else { v as f64 })
        .collect();

    Descriptor::new(values).map_err(|e| RecognizerError::InferenceFailed(e.to_string()))
}
