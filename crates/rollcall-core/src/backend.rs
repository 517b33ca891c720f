//! Model backend capability: detect a single face and describe it.

use crate::detector::{DetectorConfig, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerConfig, RecognizerError};
use crate::types::{Descriptor, Frame};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("backend error: {0}")]
    Other(String),
}

/// Detection + landmark + recognition pipeline.
///
/// Implementations are driven from a single worker thread (see
/// [`spawn_extractor`](crate::extractor::spawn_extractor)) and may block.
pub trait FaceBackend: Send + 'static {
    fn is_ready(&self) -> bool;

    /// Describe the single dominant face in `frame`, or `Ok(None)` if there is none.
    fn detect_and_describe(&mut self, frame: &Frame) -> Result<Option<Descriptor>, BackendError>;

    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f64 {
        a.euclidean_distance(b)
    }
}

/// Model files for [`OnnxBackend`].
#[derive(Debug, Clone)]
pub struct OnnxModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl OnnxModelPaths {
    pub const DETECTOR_FILE: &'static str = "det_10g.onnx";

    /// Standard file names inside `model_dir` for the given recognition profile.
    pub fn in_dir(model_dir: &Path, recognizer: &RecognizerConfig) -> Self {
        let recognizer_file = match recognizer.descriptor_len {
            512 => "w600k_r50.onnx",
            _ => "face_recognition_sface_2021dec.onnx",
        };
        Self {
            detector: model_dir.join(Self::DETECTOR_FILE),
            recognizer: model_dir.join(recognizer_file),
        }
    }

    pub fn all_present(&self) -> bool {
        self.detector.exists() && self.recognizer.exists()
    }
}

/// SCRFD detection + five-point alignment + recognition network.
pub struct OnnxBackend {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxBackend {
    pub fn load(paths: &OnnxModelPaths, recognizer: RecognizerConfig) -> Result<Self, BackendError> {
        let detector = FaceDetector::load(&paths.detector, DetectorConfig::default())?;
        let recognizer = FaceRecognizer::load(&paths.recognizer, recognizer)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceBackend for OnnxBackend {
    fn is_ready(&self) -> bool {
        true
    }

    fn detect_and_describe(&mut self, frame: &Frame) -> Result<Option<Descriptor>, BackendError> {
        let faces = self.detector.detect(frame)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        if faces.len() > 1 {
            tracing::debug!(
                faces = faces.len(),
                confidence = face.confidence,
                "multiple faces, describing the best scoring one"
            );
        }
        if face.landmarks.is_none() {
            return Ok(None);
        }

        let descriptor = self.recognizer.describe(frame, face)?;
        Ok(Some(descriptor))
    }
}
