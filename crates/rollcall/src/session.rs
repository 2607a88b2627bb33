//! Live capture session: `Idle -> Capturing -> Idle`.
//!
//! The frame source is opened in [`CaptureSession::start`] and moved into a
//! dedicated worker thread, which owns it until the loop exits. Stopping
//! joins the worker, so the device is released once the in-flight frame
//! completes.

use crate::annotate::Annotator;
use crate::display::Display;
use crate::engine::{Engine, Resolution};
use crate::pipeline::FrameReport;
use rollcall_core::ExtractionError;
use rollcall_hw::{CameraError, Frame, FrameError, FrameSource};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Opens a fresh frame source for each capture run.
pub type SourceOpener =
    Box<dyn Fn() -> Result<Box<dyn FrameSource + Send>, CameraError> + Send + Sync>;

pub type SharedDisplay = Arc<Mutex<dyn Display + Send>>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera: {0}")]
    Device(#[from] CameraError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
    #[error("image: {0}")]
    Image(#[from] FrameError),
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
}

/// How a capture run ended.
#[derive(Debug)]
pub enum SessionEnd {
    Stopped { frames: u64 },
    DeviceFailed(CameraError),
    Panicked,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<SessionEnd>,
}

pub struct CaptureSession {
    engine: Arc<Engine>,
    opener: SourceOpener,
    display: SharedDisplay,
    annotator: Arc<Annotator>,
    frame_interval: Duration,
    worker: Option<Worker>,
}

impl CaptureSession {
    pub fn new(
        engine: Arc<Engine>,
        opener: SourceOpener,
        display: SharedDisplay,
        annotator: Annotator,
        frame_interval: Duration,
    ) -> Self {
        Self {
            engine,
            opener,
            display,
            annotator: Arc::new(annotator),
            frame_interval,
            worker: None,
        }
    }

    /// Capturing while a worker is alive; a worker that ended on its own
    /// (device failure) counts as idle.
    pub fn state(&self) -> SessionState {
        match &self.worker {
            Some(worker) if !worker.handle.is_finished() => SessionState::Capturing,
            _ => SessionState::Idle,
        }
    }

    /// Open the source and start the capture loop. No-op while capturing.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state() == SessionState::Capturing {
            tracing::warn!("capture already running; ignoring start");
            return Ok(());
        }
        if let Some(end) = self.join_worker() {
            tracing::info!(?end, "previous capture run collected");
        }

        let source = (self.opener)()?;
        let stop = Arc::new(AtomicBool::new(false));
        let capture = CaptureLoop {
            engine: Arc::clone(&self.engine),
            display: Arc::clone(&self.display),
            annotator: Arc::clone(&self.annotator),
            frame_interval: self.frame_interval,
            stop: Arc::clone(&stop),
        };

        let handle = std::thread::Builder::new()
            .name("rollcall-capture".into())
            .spawn(move || capture.run(source))
            .map_err(SessionError::Spawn)?;

        self.worker = Some(Worker { stop, handle });
        tracing::info!("capture started");
        Ok(())
    }

    /// Signal the worker and wait for it. Returns `None` when idle.
    pub fn stop(&mut self) -> Option<SessionEnd> {
        if let Some(worker) = &self.worker {
            worker.stop.store(true, Ordering::Release);
        }
        let end = self.join_worker();
        if let Some(end) = &end {
            tracing::info!(?end, "capture stopped");
        }
        end
    }

    /// Block until the worker exits on its own.
    pub fn wait(&mut self) -> Option<SessionEnd> {
        self.join_worker()
    }

    /// Back to the initial state: stop any capture and reload the gallery.
    pub fn reset(&mut self) {
        self.stop();
        match self.engine.reload_gallery() {
            Ok(size) => tracing::info!(size, "session reset"),
            Err(e) => tracing::warn!(error = %e, "session reset without gallery reload"),
        }
        lock_display(&self.display).notify(crate::pipeline::STATUS_IDLE);
    }

    /// Run extraction, matching and annotation once on an image file.
    pub fn process_still(&self, path: &Path) -> Result<FrameReport, SessionError> {
        let mut image = Frame::load(path)?.image;
        let report = self.engine.process_frame(&image, Resolution::Full)?;
        self.annotator.draw(&mut image, &report.faces);
        lock_display(&self.display).show(&image, &report.status);
        Ok(report)
    }

    fn join_worker(&mut self) -> Option<SessionEnd> {
        let worker = self.worker.take()?;
        Some(worker.handle.join().unwrap_or_else(|_| {
            tracing::error!("capture thread panicked");
            SessionEnd::Panicked
        }))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureLoop {
    engine: Arc<Engine>,
    display: SharedDisplay,
    annotator: Arc<Annotator>,
    frame_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl CaptureLoop {
    fn run(self, mut source: Box<dyn FrameSource + Send>) -> SessionEnd {
        tracing::info!("capture loop started");
        let mut frames = 0u64;

        while !self.stop.load(Ordering::Acquire) {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, frames, "frame read failed; ending capture");
                    lock_display(&self.display).notify(&format!("Camera error: {e}"));
                    return SessionEnd::DeviceFailed(e);
                }
            };
            frames += 1;

            let sequence = frame.sequence;
            let mut image = frame.image;
            match self.engine.process_frame(&image, Resolution::Live) {
                Ok(report) => {
                    self.annotator.draw(&mut image, &report.faces);
                    lock_display(&self.display).show(&image, &report.status);
                }
                Err(e) => tracing::warn!(sequence, error = %e, "skipping frame"),
            }

            if !self.frame_interval.is_zero() {
                std::thread::sleep(self.frame_interval);
            }
        }

        tracing::info!(frames, "capture loop exiting");
        SessionEnd::Stopped { frames }
    }
}

fn lock_display(display: &SharedDisplay) -> MutexGuard<'_, dyn Display + Send + 'static> {
    display.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::test_support::RecordingDisplay;
    use crate::engine::test_support::engine;
    use crate::pipeline::test_support::{descriptor, identity};
    use image::RgbImage;
    use rollcall_store::Store;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Yields `frames` frames of the given size, then fails like an unplugged camera.
    /// With `frames == None` it never runs dry.
    struct FakeSource {
        remaining: Option<usize>,
        size: (u32, u32),
        released: Arc<AtomicBool>,
        sequence: u32,
    }

    impl FrameSource for FakeSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if let Some(remaining) = &mut self.remaining {
                if *remaining == 0 {
                    return Err(CameraError::CaptureFailed("device unplugged".into()));
                }
                *remaining -= 1;
            }
            self.sequence += 1;
            let image = RgbImage::new(self.size.0, self.size.1);
            Ok(Frame::from_image(image, self.sequence))
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        session: CaptureSession,
        display: Arc<Mutex<RecordingDisplay>>,
        opened: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
    }

    fn harness(store: Store, values: &[f64], frames: Option<usize>, size: (u32, u32)) -> Harness {
        let display = Arc::new(Mutex::new(RecordingDisplay::default()));
        let opened = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));

        let opener: SourceOpener = {
            let opened = Arc::clone(&opened);
            let released = Arc::clone(&released);
            Box::new(move || -> Result<Box<dyn FrameSource + Send>, CameraError> {
                opened.fetch_add(1, Ordering::SeqCst);
                released.store(false, Ordering::SeqCst);
                Ok(Box::new(FakeSource {
                    remaining: frames,
                    size,
                    released: Arc::clone(&released),
                    sequence: 0,
                }))
            })
        };

        let session = CaptureSession::new(
            engine(store, values),
            opener,
            display.clone(),
            Annotator::without_text(),
            Duration::from_millis(1),
        );
        Harness {
            session,
            display,
            opened,
            released,
        }
    }

    fn enrolled_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.enroll(&identity("s1", "Ada"), &descriptor(0.0)).unwrap();
        store
    }

    fn wait_for_frames(display: &Arc<Mutex<RecordingDisplay>>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while display.lock().unwrap().sizes.len() < n {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_device_failure_ends_session() {
        let mut h = harness(enrolled_store(), &[0.1], Some(3), (64, 48));
        h.session.start().unwrap();

        let end = h.session.wait().unwrap();
        assert!(matches!(end, SessionEnd::DeviceFailed(CameraError::CaptureFailed(_))));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.released.load(Ordering::SeqCst));

        let display = h.display.lock().unwrap();
        assert_eq!(display.sizes.len(), 3);
        assert_eq!(display.statuses[0], "Attendance marked for Ada");
        assert_eq!(display.statuses[1], "Attendance already marked for Ada today");
        assert!(display.statuses.last().unwrap().starts_with("Camera error:"));
        drop(display);

        assert_eq!(h.session.engine.store().all_events().unwrap().len(), 1);
    }

    #[test]
    fn test_restart_after_device_failure() {
        let mut h = harness(enrolled_store(), &[0.1], Some(1), (64, 48));
        h.session.start().unwrap();
        wait_for_frames(&h.display, 1);
        while h.session.state() == SessionState::Capturing {
            std::thread::sleep(Duration::from_millis(2));
        }

        h.session.start().unwrap();
        h.session.wait();
        assert_eq!(h.opened.load(Ordering::SeqCst), 2);
        assert_eq!(h.display.lock().unwrap().sizes.len(), 2);
    }

    #[test]
    fn test_start_while_capturing_is_noop() {
        let mut h = harness(enrolled_store(), &[], None, (32, 32));
        h.session.start().unwrap();
        h.session.start().unwrap();
        assert_eq!(h.session.state(), SessionState::Capturing);
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);

        assert!(matches!(h.session.stop(), Some(SessionEnd::Stopped { .. })));
    }

    #[test]
    fn test_stop_releases_source() {
        let mut h = harness(enrolled_store(), &[], None, (32, 32));
        h.session.start().unwrap();
        wait_for_frames(&h.display, 2);

        match h.session.stop() {
            Some(SessionEnd::Stopped { frames }) => assert!(frames >= 2),
            other => panic!("unexpected end: {other:?}"),
        }
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.released.load(Ordering::SeqCst));
        assert!(h.session.stop().is_none());
    }

    #[test]
    fn test_extraction_errors_skip_frames() {
        let mut h = harness(enrolled_store(), &[0.1], Some(4), (1, 1));
        h.session.start().unwrap();
        let end = h.session.wait().unwrap();

        assert!(matches!(end, SessionEnd::DeviceFailed(_)));
        let display = h.display.lock().unwrap();
        assert!(display.sizes.is_empty());
        assert_eq!(display.statuses.len(), 1);
    }

    #[test]
    fn test_open_failure_leaves_idle() {
        let display = Arc::new(Mutex::new(RecordingDisplay::default()));
        let mut session = CaptureSession::new(
            engine(Store::open_in_memory().unwrap(), &[]),
            Box::new(|| -> Result<Box<dyn FrameSource + Send>, CameraError> {
                Err(CameraError::DeviceBusy)
            }),
            display,
            Annotator::without_text(),
            Duration::ZERO,
        );
        assert!(matches!(
            session.start(),
            Err(SessionError::Device(CameraError::DeviceBusy))
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_reset_stops_and_reloads() {
        let mut h = harness(Store::open_in_memory().unwrap(), &[0.0], None, (32, 32));
        h.session.start().unwrap();
        wait_for_frames(&h.display, 1);
        assert_eq!(
            h.display.lock().unwrap().statuses[0],
            "No registered students"
        );

        h.session
            .engine
            .store()
            .enroll(&identity("s1", "Ada"), &descriptor(0.0))
            .unwrap();
        h.session.reset();

        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.engine.gallery().size(), 1);
        assert_eq!(
            h.display.lock().unwrap().statuses.last().map(String::as_str),
            Some(crate::pipeline::STATUS_IDLE)
        );
    }

    #[test]
    fn test_process_still() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        RgbImage::new(120, 90).save(&path).unwrap();

        let h = harness(enrolled_store(), &[0.05], None, (1, 1));
        let report = h.session.process_still(&path).unwrap();
        assert_eq!(report.status, "Attendance marked for Ada");
        assert_eq!(h.display.lock().unwrap().sizes, vec![(120, 90)]);
        assert_eq!(h.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_process_still_missing_file() {
        let h = harness(enrolled_store(), &[0.05], None, (1, 1));
        assert!(matches!(
            h.session.process_still(Path::new("/nonexistent/upload.png")),
            Err(SessionError::Image(_))
        ));
    }
}
