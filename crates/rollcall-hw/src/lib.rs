//! rollcall-hw — V4L2 camera capture for the verification and enrollment flows.

pub mod camera;
pub mod frame;

pub use camera::{DeviceInfo, PixelFormat, V4lCamera, V4lCameraSource, V4lStream};
pub use frame::FrameError;
