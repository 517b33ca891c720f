//! Live-camera verification: sample frames on a fixed cadence, extract a
//! descriptor, match it against the roster, stop on the first match.

use crate::camera::{CameraError, CameraSource, CameraStream};
use crate::events::FlowEvents;
use crate::extractor::DescriptorExtractor;
use crate::matcher::Matcher;
use crate::roster::SharedRoster;
use crate::sampler::{SampleTask, Sampler, TickOutcome};
use crate::types::{Identity, MatchResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

const MSG_INITIALIZING: &str = "Initializing...";
const MSG_AWAITING_FACE: &str = "Point camera at your face...";
const MSG_VERIFYING: &str = "Face detected, verifying...";
const MSG_NOT_RECOGNIZED: &str = "Face not recognized. Please try again.";
const MSG_CAMERA_UNAVAILABLE: &str = "Camera unavailable";
const MSG_ATTEMPTS_EXHAUSTED: &str = "Too many failed attempts";
const MSG_CANCELLED: &str = "Verification cancelled";

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Time between frame samples.
    pub sample_interval: Duration,
    /// End the session after this many unrecognized faces. `None` runs until
    /// matched or cancelled.
    pub max_failed_attempts: Option<u32>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            max_failed_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPhase {
    Idle,
    Initializing,
    AwaitingFace,
    FaceDetected,
    Success,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationStatus {
    pub phase: VerificationPhase,
    pub message: String,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Success(Identity),
    Cancelled,
    AttemptsExhausted,
    CameraUnavailable,
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("a verification session is already active")]
    AlreadyActive,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
}

struct SessionState {
    status: VerificationStatus,
    outcome: Option<VerificationOutcome>,
}

/// Status and outcome of one session, shared between the flow and its sampler task.
#[derive(Clone)]
struct Session {
    state: Arc<Mutex<SessionState>>,
    events: Arc<dyn FlowEvents>,
}

impl Session {
    fn new(events: Arc<dyn FlowEvents>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                status: VerificationStatus {
                    phase: VerificationPhase::Idle,
                    message: String::new(),
                },
                outcome: None,
            })),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, phase: VerificationPhase, message: impl Into<String>) {
        let status = VerificationStatus {
            phase,
            message: message.into(),
        };
        self.lock().status = status.clone();
        tracing::debug!(?phase, message = %status.message, "verification status");
        self.events.on_status(&status);
    }

    fn status(&self) -> VerificationStatus {
        self.lock().status.clone()
    }

    fn outcome(&self) -> Option<VerificationOutcome> {
        self.lock().outcome.clone()
    }

    fn is_settled(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Record the outcome if none has been recorded yet. First caller wins.
    fn settle(&self, outcome: VerificationOutcome) -> bool {
        let mut state = self.lock();
        if state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        true
    }
}

/// The verification state machine. At most one session is active at a time.
pub struct VerificationFlow {
    camera: Arc<dyn CameraSource>,
    extractor: DescriptorExtractor,
    roster: SharedRoster,
    matcher: Arc<dyn Matcher>,
    events: Arc<dyn FlowEvents>,
    config: VerificationConfig,
    session: Session,
    sampler: Option<Sampler>,
}

impl VerificationFlow {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        extractor: DescriptorExtractor,
        roster: SharedRoster,
        matcher: Arc<dyn Matcher>,
        events: Arc<dyn FlowEvents>,
        config: VerificationConfig,
    ) -> Self {
        let session = Session::new(events.clone());
        Self {
            camera,
            extractor,
            roster,
            matcher,
            events,
            config,
            session,
            sampler: None,
        }
    }

    pub fn status(&self) -> VerificationStatus {
        self.session.status()
    }

    pub fn phase(&self) -> VerificationPhase {
        self.session.status().phase
    }

    /// Outcome of the current or last session, once it has ended.
    pub fn outcome(&self) -> Option<VerificationOutcome> {
        self.session.outcome()
    }

    pub fn is_active(&self) -> bool {
        self.sampler.as_ref().is_some_and(Sampler::is_running)
    }

    /// Acquire the camera and start sampling.
    ///
    /// A camera failure ends the session immediately; it is reported through
    /// [`FlowEvents::on_camera_error`] and the returned error, and never retried.
    pub async fn start(&mut self) -> Result<(), VerificationError> {
        if self.is_active() {
            return Err(VerificationError::AlreadyActive);
        }
        // Make sure a finished session's task has released everything.
        if let Some(mut previous) = self.sampler.take() {
            previous.cancel().await;
        }

        let session = Session::new(self.events.clone());
        self.session = session.clone();
        session.set_status(VerificationPhase::Initializing, MSG_INITIALIZING);

        let stream = match self.camera.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "camera acquisition failed");
                session.settle(VerificationOutcome::CameraUnavailable);
                session.set_status(VerificationPhase::Ended, MSG_CAMERA_UNAVAILABLE);
                self.events.on_camera_error(&e);
                return Err(e.into());
            }
        };

        tracing::info!(
            interval_ms = self.config.sample_interval.as_millis() as u64,
            max_failed_attempts = ?self.config.max_failed_attempts,
            "verification session started"
        );
        session.set_status(VerificationPhase::AwaitingFace, MSG_AWAITING_FACE);

        let task = VerificationTask {
            stream,
            extractor: self.extractor.clone(),
            roster: self.roster.clone(),
            matcher: self.matcher.clone(),
            session,
            failed_attempts: 0,
            max_failed_attempts: self.config.max_failed_attempts,
        };
        self.sampler = Some(Sampler::start(self.config.sample_interval, task));
        Ok(())
    }

    /// Wait for the active session to end and return its outcome.
    ///
    /// Cancel-safe; `None` if no session was ever started.
    pub async fn wait(&mut self) -> Option<VerificationOutcome> {
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.join().await;
        }
        self.outcome()
    }

    /// Stop sampling and release the camera. Safe to call in any phase, any
    /// number of times. A descriptor still being extracted is discarded.
    pub async fn cancel(&mut self) {
        let Some(mut sampler) = self.sampler.take() else {
            return;
        };
        if self.session.settle(VerificationOutcome::Cancelled) {
            tracing::info!("verification cancelled");
        }
        sampler.cancel().await;
    }
}

/// Per-tick work of an active session. Owns the camera stream.
struct VerificationTask {
    stream: Box<dyn CameraStream>,
    extractor: DescriptorExtractor,
    roster: SharedRoster,
    matcher: Arc<dyn Matcher>,
    session: Session,
    failed_attempts: u32,
    max_failed_attempts: Option<u32>,
}

impl VerificationTask {
    fn on_no_match(&mut self) -> TickOutcome {
        self.failed_attempts += 1;
        tracing::debug!(attempts = self.failed_attempts, "face not recognized");

        let exhausted = self
            .max_failed_attempts
            .is_some_and(|max| self.failed_attempts >= max);
        if exhausted && self.session.settle(VerificationOutcome::AttemptsExhausted) {
            tracing::info!(attempts = self.failed_attempts, "verification gave up");
            return TickOutcome::Stop;
        }

        self.session
            .set_status(VerificationPhase::AwaitingFace, MSG_NOT_RECOGNIZED);
        TickOutcome::Continue
    }

    /// The success event is fired from `finish`, once the camera is released.
    fn on_match(&mut self, identity: Identity, distance: f64) -> TickOutcome {
        if !self.session.settle(VerificationOutcome::Success(identity.clone())) {
            return TickOutcome::Stop;
        }
        tracing::info!(id = %identity.id, distance, "identity verified");
        self.session.set_status(
            VerificationPhase::Success,
            format!("Success! Welcome, {}.", identity.first_name),
        );
        TickOutcome::Stop
    }
}

#[async_trait]
impl SampleTask for VerificationTask {
    async fn tick(&mut self, cancel: &CancellationToken) -> TickOutcome {
        if self.session.is_settled() {
            return TickOutcome::Stop;
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TickOutcome::Stop,
            frame = self.stream.next_frame() => frame,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::Continue,
            Err(e) => {
                tracing::warn!(error = %e, "camera read failed, skipping tick");
                return TickOutcome::Continue;
            }
        };

        let descriptor = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TickOutcome::Stop,
            descriptor = self.extractor.extract(frame) => descriptor,
        };
        if cancel.is_cancelled() || self.session.is_settled() {
            tracing::debug!("discarding extraction that resolved after the session ended");
            return TickOutcome::Stop;
        }
        let Some(descriptor) = descriptor else {
            return TickOutcome::Continue;
        };

        self.session
            .set_status(VerificationPhase::FaceDetected, MSG_VERIFYING);
        let result = {
            let roster = self.roster.read().await;
            self.matcher.find_best_match(&descriptor, &roster)
        };

        match result {
            MatchResult::Matched { identity, distance } => self.on_match(identity, distance),
            MatchResult::NoMatch => self.on_no_match(),
        }
    }

    async fn finish(&mut self) {
        self.stream.release();

        // Ended without an explicit outcome means the flow was dropped.
        self.session.settle(VerificationOutcome::Cancelled);
        let message = match self.session.outcome() {
            Some(VerificationOutcome::AttemptsExhausted) => MSG_ATTEMPTS_EXHAUSTED.to_string(),
            Some(VerificationOutcome::Success(identity)) => {
                self.session.events.on_verification_success(&identity);
                self.session.status().message
            }
            _ => MSG_CANCELLED.to_string(),
        };
        self.session.set_status(VerificationPhase::Ended, message);
        tracing::info!(outcome = ?self.session.outcome().map(|o| outcome_label(&o)), "verification session ended");
    }
}

fn outcome_label(outcome: &VerificationOutcome) -> &'static str {
    match outcome {
        VerificationOutcome::Success(_) => "success",
        VerificationOutcome::Cancelled => "cancelled",
        VerificationOutcome::AttemptsExhausted => "attempts_exhausted",
        VerificationOutcome::CameraUnavailable => "camera_unavailable",
    }
}
