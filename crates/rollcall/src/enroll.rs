//! Student enrollment from a still image or the live camera.

use crate::engine::{Engine, Resolution};
use crate::session::SourceOpener;
use image::RgbImage;
use rollcall_core::{Descriptor, ExtractionError, Identity};
use rollcall_hw::{CameraError, Frame, FrameError, FrameSource};
use rollcall_store::StoreError;
use std::path::Path;
use thiserror::Error;

/// Frames captured from the camera per enrollment; the most confident face wins.
pub const ENROLL_FRAMES: usize = 3;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),
    #[error("student ID {0} is already enrolled")]
    DuplicateIdentity(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("camera: {0}")]
    Device(#[from] CameraError),
    #[error("image: {0}")]
    Image(#[from] FrameError),
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("storage: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for EnrollError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdentity(id) => EnrollError::DuplicateIdentity(id),
            other => EnrollError::Storage(other),
        }
    }
}

/// Where the enrollment photo comes from. The camera is only opened once
/// the identity has been validated.
pub enum EnrollSource<'a> {
    Still(&'a Path),
    Camera {
        open: &'a SourceOpener,
        warmup_frames: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Enrolled {
    pub identity: Identity,
    pub confidence: f32,
    pub gallery_size: usize,
}

/// Validate, capture, encode and persist a new student, then reload the gallery.
///
/// A duplicate `student_id` is rejected before the camera is opened or a
/// still is decoded.
pub fn enroll(
    engine: &Engine,
    identity: Identity,
    source: EnrollSource<'_>,
) -> Result<Enrolled, EnrollError> {
    let identity = normalize(identity)?;
    if engine.store().student_exists(&identity.student_id)? {
        return Err(EnrollError::DuplicateIdentity(identity.student_id));
    }

    let frames = match source {
        EnrollSource::Still(path) => vec![Frame::load(path)?.image],
        EnrollSource::Camera {
            open,
            warmup_frames,
        } => {
            let mut source = open()?;
            capture(source.as_mut(), warmup_frames)?
        }
    };

    let (descriptor, confidence) =
        best_face(engine, &frames)?.ok_or(EnrollError::NoFaceDetected)?;
    engine.store().enroll(&identity, &descriptor)?;
    tracing::info!(student_id = %identity.student_id, confidence, "enrollment stored");

    let gallery_size = match engine.reload_gallery() {
        Ok(size) => size,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "enrolled but gallery reload failed; restart capture to pick it up"
            );
            engine.gallery().size()
        }
    };

    Ok(Enrolled {
        identity,
        confidence,
        gallery_size,
    })
}

fn normalize(identity: Identity) -> Result<Identity, EnrollError> {
    let identity = Identity {
        student_id: identity.student_id.trim().to_string(),
        name: identity.name.trim().to_string(),
        course: identity.course.trim().to_string(),
    };
    if identity.student_id.is_empty() {
        return Err(EnrollError::MissingField("student ID"));
    }
    if identity.name.is_empty() {
        return Err(EnrollError::MissingField("name"));
    }
    if identity.course.is_empty() {
        return Err(EnrollError::MissingField("course"));
    }
    Ok(identity)
}

fn capture(
    source: &mut (dyn FrameSource + Send),
    warmup_frames: usize,
) -> Result<Vec<RgbImage>, CameraError> {
    // Discard warmup frames for AGC/AE stabilization.
    if warmup_frames > 0 {
        tracing::debug!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            let _ = source.read_frame();
        }
    }

    let mut frames = Vec::with_capacity(ENROLL_FRAMES);
    for _ in 0..ENROLL_FRAMES {
        frames.push(source.read_frame()?.image);
    }
    Ok(frames)
}

/// First (most confident) face of each frame; the best across frames wins.
fn best_face(
    engine: &Engine,
    frames: &[RgbImage],
) -> Result<Option<(Descriptor, f32)>, ExtractionError> {
    let mut best: Option<(Descriptor, f32)> = None;
    for (i, frame) in frames.iter().enumerate() {
        let detections = engine.extract(frame, Resolution::Full)?;
        let Some(first) = detections.into_iter().next() else {
            tracing::debug!(frame = i, "enroll: no face in frame");
            continue;
        };
        let confidence = first.bbox.confidence;
        if best.as_ref().map_or(true, |(_, c)| confidence > *c) {
            best = Some((first.descriptor, confidence));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::engine;
    use crate::pipeline::test_support::{descriptor, identity};
    use rollcall_store::Store;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        reads: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Frame::from_image(RgbImage::new(64, 48), n as u32))
        }
    }

    struct DeadSource;

    impl FrameSource for DeadSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            Err(CameraError::CaptureFailed("no signal".into()))
        }
    }

    #[derive(Default, Clone)]
    struct Counters {
        opens: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    fn counting_opener(counters: &Counters) -> SourceOpener {
        let counters = counters.clone();
        Box::new(move || -> Result<Box<dyn FrameSource + Send>, CameraError> {
            counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSource {
                reads: counters.reads.clone(),
            }))
        })
    }

    #[test]
    fn test_enroll_from_camera_reloads_gallery() {
        let engine = engine(Store::open_in_memory().unwrap(), &[0.3]);
        let counters = Counters::default();
        let open = counting_opener(&counters);

        let enrolled = enroll(
            &engine,
            identity("s1", "Ada"),
            EnrollSource::Camera {
                open: &open,
                warmup_frames: 2,
            },
        )
        .unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 2 + ENROLL_FRAMES);
        assert_eq!(enrolled.gallery_size, 1);
        assert_eq!(engine.gallery().size(), 1);
        assert_eq!(engine.gallery().entries()[0].descriptor, descriptor(0.3));
    }

    #[test]
    fn test_duplicate_rejected_before_camera_opens() {
        let store = Store::open_in_memory().unwrap();
        store.enroll(&identity("s1", "Ada"), &descriptor(0.0)).unwrap();
        let engine = engine(store, &[0.3]);
        let counters = Counters::default();
        let open = counting_opener(&counters);

        let err = enroll(
            &engine,
            identity(" s1 ", "Someone Else"),
            EnrollSource::Camera {
                open: &open,
                warmup_frames: 0,
            },
        )
        .unwrap_err();

        assert!(matches!(err, EnrollError::DuplicateIdentity(id) if id == "s1"));
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_rejected_before_decoding_still() {
        let store = Store::open_in_memory().unwrap();
        store.enroll(&identity("s1", "Ada"), &descriptor(0.0)).unwrap();
        let engine = engine(store, &[0.3]);

        let still = EnrollSource::Still(Path::new("/nonexistent.png"));
        let err = enroll(&engine, identity("s1", "Ada"), still).unwrap_err();
        assert!(matches!(err, EnrollError::DuplicateIdentity(_)));
    }

    #[test]
    fn test_no_face_detected() {
        let engine = engine(Store::open_in_memory().unwrap(), &[]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        RgbImage::new(32, 32).save(&path).unwrap();

        let err = enroll(&engine, identity("s1", "Ada"), EnrollSource::Still(&path)).unwrap_err();
        assert!(matches!(err, EnrollError::NoFaceDetected));
        assert!(!engine.store().student_exists("s1").unwrap());
    }

    #[test]
    fn test_enroll_from_still() {
        let engine = engine(Store::open_in_memory().unwrap(), &[0.2, 0.9]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ada.png");
        RgbImage::new(32, 32).save(&path).unwrap();

        let enrolled =
            enroll(&engine, identity(" s1 ", "Ada"), EnrollSource::Still(&path)).unwrap();
        assert_eq!(enrolled.identity.student_id, "s1");
        // First detection is the one encoded.
        assert_eq!(engine.gallery().entries()[0].descriptor, descriptor(0.2));
    }

    #[test]
    fn test_missing_fields() {
        let engine = engine(Store::open_in_memory().unwrap(), &[0.2]);
        let mut blank = identity("s1", "Ada");
        blank.course = "  ".into();
        assert!(matches!(
            enroll(&engine, blank, EnrollSource::Still(Path::new("x.png"))),
            Err(EnrollError::MissingField("course"))
        ));
    }

    #[test]
    fn test_camera_failure() {
        let engine = engine(Store::open_in_memory().unwrap(), &[0.2]);
        let open: SourceOpener = Box::new(|| -> Result<Box<dyn FrameSource + Send>, CameraError> {
            Ok(Box::new(DeadSource))
        });
        let err = enroll(
            &engine,
            identity("s1", "Ada"),
            EnrollSource::Camera {
                open: &open,
                warmup_frames: 1,
            },
        )
        .unwrap_err();
        assert!(matches!(err, EnrollError::Device(_)));
    }

    #[test]
    fn test_camera_open_failure() {
        let engine = engine(Store::open_in_memory().unwrap(), &[0.2]);
        let open: SourceOpener = Box::new(|| -> Result<Box<dyn FrameSource + Send>, CameraError> {
            Err(CameraError::CaptureFailed("busy".into()))
        });
        let source = EnrollSource::Camera {
            open: &open,
            warmup_frames: 0,
        };
        let err = enroll(&engine, identity("s1", "Ada"), source).unwrap_err();
        assert!(matches!(err, EnrollError::Device(_)));
        assert!(!engine.store().student_exists("s1").unwrap());
    }
}
