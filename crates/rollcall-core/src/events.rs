use crate::camera::CameraError;
use crate::types::Identity;
use crate::verification::VerificationStatus;

/// Outward signals of the enrollment and verification flows.
///
/// Presentation (toasts, dialogs, navigation) belongs to the implementor.
/// Every method defaults to a no-op.
pub trait FlowEvents: Send + Sync {
    /// Fired exactly once per verification session that matches, after the
    /// camera has been released.
    fn on_verification_success(&self, _identity: &Identity) {}

    /// An enrollment photo contained no detectable face.
    fn on_extraction_failure(&self) {}

    /// The camera could not be acquired; the session has ended.
    fn on_camera_error(&self, _error: &CameraError) {}

    /// Verification phase or status text changed.
    fn on_status(&self, _status: &VerificationStatus) {}
}

/// Discards every event.
pub struct NoopEvents;

impl FlowEvents for NoopEvents {}
