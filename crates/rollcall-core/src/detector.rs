//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB frame to 640×640, decodes the three anchor-free stride
//! heads and suppresses overlapping boxes.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place the SCRFD model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when letterboxing, needed to map boxes back.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let target = SCRFD_INPUT_SIZE as f32;
        let scale = (target / width as f32).min(target / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target - new_w) / 2.0,
            pad_y: (target - new_h) / 2.0,
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model with landmarks needs 9 outputs, got {}",
                output_names.len()
            )));
        }

        let stride_outputs = map_outputs(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output mapping");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Detect faces in an RGB frame, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let letterbox = Letterbox::fit(frame.width(), frame.height());
        let input = preprocess(frame, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            let heads = StrideHeads {
                scores,
                bboxes,
                kps,
            };
            candidates.extend(decode_stride(
                &heads,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox into a 1×3×640×640 normalized tensor. Padding normalizes to zero.
fn preprocess(frame: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE as usize;
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let off_x = letterbox.pad_x.floor() as usize;
    let off_y = letterbox.pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    tensor
}

/// Map output tensors to stride slots by name ("score_8", "bbox_16", ...),
/// falling back to the standard positional layout for numeric exports.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => {
            tracing::debug!("SCRFD: name-based output mapping");
            [v[0], v[1], v[2]]
        }
        None => {
            tracing::debug!(?names, "SCRFD: positional output mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

struct StrideHeads<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

fn decode_stride(
    heads: &StrideHeads<'_>,
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors {
        let score = heads.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(d) = heads.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * step;
        let ay = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
        let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

        let landmarks = heads.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

/// Greedy non-maximum suppression; result is sorted by confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
