//! rollcall-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access with conversion of the negotiated
//! pixel format to RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
