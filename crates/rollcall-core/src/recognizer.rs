//! Face recognition network via ONNX Runtime.
//!
//! Turns an aligned 112×112 face crop into an L2-normalized descriptor.
//! The default profile is SFace (128 values); ArcFace w600k_r50 (512 values)
//! is supported through [`RecognizerConfig::arcface_r50`].

use crate::alignment::{self, ALIGNED_SIZE};
use crate::detector::FaceBox;
use crate::types::{Descriptor, Frame};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks, alignment needs all five")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Input normalization and output shape of a recognition model.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerConfig {
    pub mean: f32,
    pub std: f32,
    pub descriptor_len: usize,
    /// Tag stored on every descriptor this model produces.
    pub model_version: String,
}

impl RecognizerConfig {
    /// OpenCV SFace: raw 0–255 input, 128-value output.
    pub fn sface() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
            descriptor_len: 128,
            model_version: "sface_2021dec".into(),
        }
    }

    /// InsightFace ArcFace w600k_r50: symmetric [-1, 1] input, 512-value output.
    pub fn arcface_r50() -> Self {
        Self {
            mean: 127.5,
            std: 127.5,
            descriptor_len: 512,
            model_version: "w600k_r50".into(),
        }
    }

    /// Look up a profile by name ("sface" or "arcface").
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "sface" => Some(Self::sface()),
            "arcface" => Some(Self::arcface_r50()),
            _ => None,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self::sface()
    }
}

pub struct FaceRecognizer {
    session: Session,
    config: RecognizerConfig,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path, config: RecognizerConfig) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %config.model_version,
            descriptor_len = config.descriptor_len,
            "loaded recognition model"
        );

        Ok(Self { session, config })
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    /// Align the detected face and compute its descriptor.
    pub fn describe(&mut self, frame: &Frame, face: &FaceBox) -> Result<Descriptor, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned, &self.config);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor output: {e}")))?;

        if raw.len() != self.config.descriptor_len {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {} descriptor values, got {}",
                self.config.descriptor_len,
                raw.len()
            )));
        }

        Ok(Descriptor::new(
            l2_normalize(raw),
            Some(self.config.model_version.clone()),
        ))
    }
}

/// Aligned grayscale crop → NCHW tensor with the gray channel replicated.
fn preprocess(aligned: &[u8], config: &RecognizerConfig) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, ALIGNED_SIZE, ALIGNED_SIZE), |(_, _, y, x)| {
        let pixel = aligned.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
        (pixel - config.mean) / config.std
    })
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
