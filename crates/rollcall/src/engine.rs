//! Shared object graph for capture and enrollment.

use crate::pipeline::{self, FrameReport};
use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use rollcall_core::{
    DescriptorExtractor, ExtractionError, FaceDetection, Gallery, MatchPolicy, Matcher,
    SharedGallery,
};
use rollcall_store::{Store, StoreError};
use std::sync::{Arc, Mutex};

pub type SharedExtractor = Mutex<Box<dyn DescriptorExtractor + Send>>;

/// Live frames go through the extractor's downscale; stills and
/// enrollment captures are processed at full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Live,
    Full,
}

/// Extractor, gallery, matcher and store. Shared by `Arc` between the
/// capture worker and the foreground command.
pub struct Engine {
    store: Arc<Store>,
    gallery: SharedGallery,
    extractor: SharedExtractor,
    matcher: Box<dyn Matcher + Send + Sync>,
    tolerance: f64,
}

impl Engine {
    /// Build the engine and load the gallery from `store`.
    pub fn new(
        store: Arc<Store>,
        extractor: Box<dyn DescriptorExtractor + Send>,
        policy: MatchPolicy,
        tolerance: f64,
    ) -> Result<Self, StoreError> {
        let gallery = Gallery::load(store.as_ref())?;
        tracing::info!(size = gallery.size(), policy = %policy, tolerance, "gallery loaded");
        Ok(Self {
            store,
            gallery: SharedGallery::new(gallery),
            extractor: Mutex::new(extractor),
            matcher: policy.matcher(),
            tolerance,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn gallery(&self) -> Arc<Gallery> {
        self.gallery.snapshot()
    }

    /// Re-read all descriptors and swap the active gallery.
    pub fn reload_gallery(&self) -> Result<usize, StoreError> {
        self.gallery.reload(self.store.as_ref())
    }

    /// Run the extractor. The lock is held for inference only.
    pub fn extract(
        &self,
        frame: &RgbImage,
        resolution: Resolution,
    ) -> Result<Vec<FaceDetection>, ExtractionError> {
        let mut extractor = self
            .extractor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match resolution {
            Resolution::Live => extractor.extract(frame),
            Resolution::Full => extractor.extract_full_resolution(frame),
        }
    }

    /// Process one frame at the current local time.
    pub fn process_frame(
        &self,
        frame: &RgbImage,
        resolution: Resolution,
    ) -> Result<FrameReport, ExtractionError> {
        self.process_frame_at(frame, resolution, Local::now().naive_local())
    }

    pub fn process_frame_at(
        &self,
        frame: &RgbImage,
        resolution: Resolution,
        now: NaiveDateTime,
    ) -> Result<FrameReport, ExtractionError> {
        let detections = self.extract(frame, resolution)?;
        let gallery = self.gallery.snapshot();
        Ok(pipeline::judge_frame(
            detections,
            &gallery,
            self.matcher.as_ref(),
            self.tolerance,
            &self.store,
            now,
        ))
    }
}
