//! Camera capability consumed by the enrollment and verification flows.
//!
//! The host platform supplies an implementation (V4L2 in `rollcall-hw`).
//! A stream must be released on every exit path; implementations also
//! release on drop.

use crate::types::Frame;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("stream already released")]
    Released,
}

/// Something that can hand out a live video stream.
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// An acquired live stream.
#[async_trait]
pub trait CameraStream: Send {
    /// Next readable frame, or `None` if no usable frame is available yet.
    async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Release the underlying device. Safe to call more than once.
    fn release(&mut self);
}
