//! rollcall-core: Face descriptor extraction, gallery and matching.
//!
//! Uses SCRFD for face detection and a 128-dimensional descriptor model,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use extractor::{DescriptorExtractor, ExtractionError, FaceDetection, OnnxExtractor};
pub use gallery::{EnrolledRecord, Gallery, GallerySource, SharedGallery};
pub use types::{
    BoundingBox, Descriptor, DescriptorError, FirstWithinTolerance, GalleryEntry, Identity,
    MatchPolicy, MatchResult, Matcher, NearestWithinTolerance, DEFAULT_TOLERANCE, DESCRIPTOR_BYTES,
    DESCRIPTOR_DIM,
};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// File name of the 128-dimensional descriptor model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "face_descriptor_128.onnx";
