//! V4L2 camera capture via the `v4l` crate.
//!
//! [`V4lCamera`] is the blocking device handle. [`V4lCameraSource`] and
//! [`V4lStream`] adapt it to the async camera capability of `rollcall-core`,
//! running every device call on the blocking pool.

use crate::frame;
use async_trait::async_trait;
use rollcall_core::{CameraError, CameraSource, CameraStream, Frame};
use std::io;
use std::path::Path;
use std::sync::Arc;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const DARK_THRESHOLD: f32 = 0.95;
/// Buffers dequeued per capture before giving up on a dark sensor.
const MAX_DEQUEUES: usize = 3;

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
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel kept).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(Self::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(Self::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(Self::Y16)
        } else {
            None
        }
    }
}

fn open_error(device_path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(device_path.to_string())
    } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}

/// V4L2 camera device handle.
pub struct V4lCamera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl V4lCamera {
    /// Open a V4L2 capture device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; drivers for grayscale sensors answer with GREY or Y16.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
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
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Capture one usable frame. `None` when the sensor only delivered
    /// dark frames.
    pub fn capture_frame(&self) -> Result<Option<Frame>, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..MAX_DEQUEUES {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;

            let gray = self.to_grayscale(buf)?;
            if frame::is_dark_frame(&gray, DARK_THRESHOLD) {
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }

            let mut frame = Frame::new(gray, self.width, self.height);
            frame.sequence = meta.sequence;
            return Ok(Some(frame));
        }
        Ok(None)
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_passthrough(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
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
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
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

/// Opens the configured device each time a flow acquires the camera.
#[derive(Debug, Clone)]
pub struct V4lCameraSource {
    device_path: String,
}

impl V4lCameraSource {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl CameraSource for V4lCameraSource {
    async fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        let path = self.device_path.clone();
        let camera = tokio::task::spawn_blocking(move || V4lCamera::open(&path))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("camera open task failed: {e}")))??;
        Ok(Box::new(V4lStream::new(camera)))
    }
}

/// An open device. Dropping the stream closes it.
pub struct V4lStream {
    camera: Option<Arc<V4lCamera>>,
}

impl V4lStream {
    pub fn new(camera: V4lCamera) -> Self {
        Self {
            camera: Some(Arc::new(camera)),
        }
    }
}

#[async_trait]
impl CameraStream for V4lStream {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let camera = self.camera.clone().ok_or(CameraError::Released)?;
        tokio::task::spawn_blocking(move || camera.capture_frame())
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("capture task failed: {e}")))?
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::debug!(device = %camera.device_path, "camera released");
        }
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_error_mapping() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            open_error("/dev/video0", denied),
            CameraError::PermissionDenied("/dev/video0".into())
        );
        let busy = io::Error::new(io::ErrorKind::Other, "Device or resource busy");
        assert_eq!(open_error("/dev/video0", busy), CameraError::DeviceBusy);
    }

    #[tokio::test]
    async fn test_missing_device_is_not_found() {
        let source = V4lCameraSource::new("/dev/rollcall-no-such-camera");
        match source.acquire().await {
            Err(CameraError::DeviceNotFound(path)) => {
                assert_eq!(path, "/dev/rollcall-no-such-camera")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("acquired a camera that does not exist"),
        }
    }
}
