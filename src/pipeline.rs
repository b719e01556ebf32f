use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::classes::ClassRegistry;
use crate::classifier::{Classifier, ClassifierError};
use crate::confidence::{ClassProbabilities, ConfidenceGate};
use crate::skin::SkinGate;
use crate::verdict::{PredictionVerdict, Rejection};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("classifier did not answer within {0:?}")]
    ClassifierTimeout(Duration),
    #[error("image analysis task failed: {0}")]
    Task(#[from] JoinError),
}

/// Skin gate, classifier and confidence gate wired together. Holds no
/// per-request state, so one instance serves all requests concurrently.
pub struct Pipeline {
    skin_gate: SkinGate,
    confidence_gate: ConfidenceGate,
    classifier: Arc<dyn Classifier>,
    registry: &'static ClassRegistry,
    classifier_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        skin_gate: SkinGate,
        confidence_gate: ConfidenceGate,
        classifier: Arc<dyn Classifier>,
        registry: &'static ClassRegistry,
        classifier_timeout: Duration,
    ) -> Self {
        Self {
            skin_gate,
            confidence_gate,
            classifier,
            registry,
            classifier_timeout,
        }
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Runs an encoded upload through the full pipeline. Business rejections
    /// come back as `Ok(PredictionVerdict::Rejected)`; only collaborator
    /// failures are errors.
    pub async fn run(&self, bytes: Vec<u8>) -> Result<PredictionVerdict, PipelineError> {
        let skin_gate = self.skin_gate.clone();
        let (image, skin) = tokio::task::spawn_blocking(move || skin_gate.decode_and_assess(&bytes))
            .await?;

        let image = match image {
            Some(image) if skin.is_skin => image,
            _ => {
                info!(reason = %skin.reason, "rejected: not skin");
                return Ok(PredictionVerdict::Rejected(Rejection::not_skin(skin)));
            }
        };

        let output = tokio::time::timeout(self.classifier_timeout, self.classifier.classify(image))
            .await
            .map_err(|_| {
                error!(timeout = ?self.classifier_timeout, "classifier timed out");
                PipelineError::ClassifierTimeout(self.classifier_timeout)
            })?
            .map_err(|err| {
                error!(error = %err, classifier = self.classifier.name(), "classifier failed");
                err
            })?;

        let probabilities = ClassProbabilities::from_output(self.registry, output)?;
        let verdict = match self.confidence_gate.evaluate(&probabilities) {
            PredictionVerdict::Accepted(mut acceptance) => {
                info!(
                    label = acceptance.label,
                    confidence = acceptance.confidence,
                    warned = acceptance.warning.is_some(),
                    "accepted"
                );
                acceptance.skin_validation = Some(skin);
                PredictionVerdict::Accepted(acceptance)
            }
            PredictionVerdict::Rejected(rejection) => {
                info!(reason = %rejection.reason, "rejected: low confidence");
                PredictionVerdict::Rejected(rejection)
            }
        };

        Ok(verdict)
    }
}
