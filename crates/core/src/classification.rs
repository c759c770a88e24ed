use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const POTHOLE_LABEL: &str = "pothole";
pub const POTHOLE_CONFIDENCE_THRESHOLD: f32 = 0.8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub label: String,
    pub confidence: f32,
}

impl Concept {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self { label: label.into(), confidence }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationResult {
    pub is_pothole: bool,
    /// Best confidence seen for the pothole label, `0.0` when it was absent.
    pub confidence: f32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("classifier request failed: {0}")]
    Request(String),
    #[error("classifier rejected the request with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("classifier response could not be decoded: {0}")]
    Decode(String),
    #[error("classifier returned no outputs")]
    NoOutputs,
    #[error("classifier returned no concepts")]
    NoConcepts,
    #[error("classifier handshake failed: {0}")]
    Handshake(String),
}

/// Remote image recognition. Implementations perform exactly one attempt per
/// call; retries are never layered on top by callers.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image_url: &str) -> Result<Vec<Concept>, ClassificationError>;
}

pub fn evaluate_concepts(concepts: &[Concept]) -> Result<ClassificationResult, ClassificationError> {
    if concepts.is_empty() {
        return Err(ClassificationError::NoConcepts);
    }

    let confidence = concepts
        .iter()
        .filter(|concept| concept.label == POTHOLE_LABEL)
        .map(|concept| concept.confidence)
        .fold(0.0_f32, f32::max);

    Ok(ClassificationResult { is_pothole: confidence > POTHOLE_CONFIDENCE_THRESHOLD, confidence })
}
