use image::RgbImage;
use std::path::PathBuf;

/// Receives annotated frames and status lines from the capture loop.
pub trait Display {
    fn show(&mut self, frame: &RgbImage, status: &str);

    /// Status without a frame, e.g. after the device failed.
    fn notify(&mut self, status: &str);
}

/// Writes the latest annotated frame to a PNG and logs status changes.
pub struct SnapshotDisplay {
    path: Option<PathBuf>,
    last_status: Option<String>,
    frames: u64,
}

impl SnapshotDisplay {
    pub fn new(path: Option<PathBuf>) -> Self {
        if let Some(parent) = path.as_ref().and_then(|p| p.parent()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(
                    dir = %parent.display(),
                    error = %e,
                    "cannot create snapshot directory"
                );
            }
        }
        Self {
            path,
            last_status: None,
            frames: 0,
        }
    }

    fn log_status(&mut self, status: &str) {
        if self.last_status.as_deref() != Some(status) {
            tracing::info!(status, frames = self.frames, "status");
            println!("{status}");
            self.last_status = Some(status.to_string());
        }
    }
}

impl Display for SnapshotDisplay {
    fn show(&mut self, frame: &RgbImage, status: &str) {
        self.frames += 1;
        if let Some(path) = &self.path {
            if let Err(e) = frame.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write snapshot");
            }
        }
        self.log_status(status);
    }

    fn notify(&mut self, status: &str) {
        self.log_status(status);
    }
}
