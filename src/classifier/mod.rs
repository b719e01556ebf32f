use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use thiserror::Error;

use crate::classes::LabelMismatch;

mod remote;
#[cfg(feature = "tensorflow")]
mod frozen_graph;

pub use remote::RemoteClassifier;
#[cfg(feature = "tensorflow")]
pub use frozen_graph::TensorFlowClassifier;

/// Raw scores returned by a classifier backend, one per registry class in
/// registry order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierOutput {
    Logits(Vec<f32>),
    Probabilities(Vec<f32>),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("classifier responded with status {0}")]
    Status(u16),
    #[error("could not encode image for classifier: {0}")]
    Encode(#[from] image::ImageError),
    #[error("classifier returned {found} scores, expected {expected}")]
    MalformedOutput { expected: usize, found: usize },
    #[error("classifier returned a non-finite score at index {0}")]
    NonFinite(usize),
    #[error("classifier returned probability {value} at index {index}, outside [0, 1]")]
    ProbabilityOutOfRange { index: usize, value: f32 },
    #[error("classifier probabilities sum to {0}, not 1")]
    NotNormalized(f32),
    #[error("class list does not match the registry: {0}")]
    Labels(#[from] LabelMismatch),
    #[error("classifier backend error: {0}")]
    Backend(String),
}

/// Image classification collaborator. Implementations own their model and
/// any concurrency limits it needs.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, image: DynamicImage) -> Result<ClassifierOutput, ClassifierError>;
}
