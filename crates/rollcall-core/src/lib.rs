//! rollcall-core — Face verification engine for the employee roster.
//!
//! Turns frames into descriptors (SCRFD detection, five-point alignment and a
//! recognition network, all via ONNX Runtime), matches descriptors against
//! the roster, and drives the enrollment and live verification flows.

pub mod alignment;
pub mod backend;
pub mod camera;
pub mod detector;
pub mod enrollment;
pub mod events;
pub mod extractor;
pub mod matcher;
pub mod photo;
pub mod recognizer;
pub mod roster;
pub mod sampler;
pub mod types;
pub mod verification;

pub use backend::{BackendError, FaceBackend, OnnxBackend, OnnxModelPaths};
pub use camera::{CameraError, CameraSource, CameraStream};
pub use enrollment::{
    EnrollmentError, EnrollmentFlow, EnrollmentPhase, IdentityFields, SubmitOutcome,
    ValidationError,
};
pub use events::{FlowEvents, NoopEvents};
pub use extractor::{spawn_extractor, DescriptorExtractor, ExtractorError, Readiness};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_ACCEPTANCE_THRESHOLD};
pub use photo::PhotoError;
pub use recognizer::RecognizerConfig;
pub use roster::{Roster, RosterChange, SharedRoster};
pub use types::{Descriptor, Frame, Identity, IdentityId, MatchResult, WorkArea};
pub use verification::{
    VerificationConfig, VerificationError, VerificationFlow, VerificationOutcome,
    VerificationPhase, VerificationStatus,
};
