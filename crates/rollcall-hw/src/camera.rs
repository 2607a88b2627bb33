//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use image::ImageFormat;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Anything that yields RGB frames with a blocking read.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// Packed RGB24, used as-is.
    Rgb3,
    /// Motion JPEG, decoded per frame.
    Mjpeg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"RGB3" => Some(PixelFormat::Rgb3),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

/// V4L2 camera device handle. Dropping it closes the device.
pub struct Camera {
    // Declared before `device` so buffers are unmapped first on drop.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, RGB3 or MJPG)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// Capture a single RGB frame, starting the stream on first use.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream =
                MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| {
                        CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                    })?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        let rgb = to_rgb(self.pixel_format, data, self.width, self.height)?;
        Frame::from_rgb(self.width, self.height, rgb, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}

/// Convert a raw buffer in the negotiated format to RGB24.
fn to_rgb(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CameraError> {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Rgb3 => {
            let expected = pixels * 3;
            if buf.len() < expected {
                return Err(CameraError::CaptureFailed(format!(
                    "RGB3 buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..expected].to_vec())
        }
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPEG decode failed: {e}")))?
                .into_rgb8();
            if decoded.dimensions() != (width, height) {
                return Err(CameraError::CaptureFailed(format!(
                    "MJPEG frame is {}x{}, expected {width}x{height}",
                    decoded.width(),
                    decoded.height()
                )));
            }
            Ok(decoded.into_raw())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"RGB3")), Some(PixelFormat::Rgb3));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), None);
    }

    #[test]
    fn test_rgb3_passthrough_and_short_buffer() {
        let buf: Vec<u8> = (0..12).collect();
        assert_eq!(to_rgb(PixelFormat::Rgb3, &buf, 2, 2).unwrap(), buf);
        assert!(to_rgb(PixelFormat::Rgb3, &buf[..11], 2, 2).is_err());
    }

    #[test]
    fn test_mjpeg_decode() {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([200, 200, 200]));
        let mut jpeg = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let rgb = to_rgb(PixelFormat::Mjpeg, &jpeg, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert!(to_rgb(PixelFormat::Mjpeg, &jpeg, 8, 8).is_err());
        assert!(to_rgb(PixelFormat::Mjpeg, b"garbage", 4, 2).is_err());
    }
}
