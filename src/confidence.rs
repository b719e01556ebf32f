//! Classification-confidence gate: turns a class probability distribution
//! into a reject / accept-with-warning / accept verdict.

use serde::Serialize;
use tracing::debug;

use crate::classes::ClassRegistry;
use crate::classifier::{ClassifierError, ClassifierOutput};
use crate::verdict::{Acceptance, PredictionVerdict, Rejection};

/// Below this the prediction is rejected outright.
pub const REJECT_BELOW: f32 = 0.35;
/// Below this (and at or above `REJECT_BELOW`) the prediction carries a warning.
pub const WARN_BELOW: f32 = 0.75;
/// How far a probability vector may sum away from 1.
const SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassProbability {
    pub label: &'static str,
    pub probability: f32,
}

/// Softmax output over the full class vocabulary, in registry order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    entries: Vec<ClassProbability>,
}

impl ClassProbabilities {
    pub fn from_output(
        registry: &ClassRegistry,
        output: ClassifierOutput,
    ) -> Result<Self, ClassifierError> {
        let (scores, logits) = match output {
            ClassifierOutput::Logits(scores) => (scores, true),
            ClassifierOutput::Probabilities(scores) => (scores, false),
        };

        if scores.len() != registry.len() || registry.is_empty() {
            return Err(ClassifierError::MalformedOutput {
                expected: registry.len(),
                found: scores.len(),
            });
        }
        if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
            return Err(ClassifierError::NonFinite(index));
        }

        let probabilities = if logits {
            softmax(&scores)
        } else {
            check_distribution(&scores)?;
            scores
        };
        let entries = registry
            .names()
            .iter()
            .zip(probabilities)
            .map(|(&label, probability)| ClassProbability { label, probability })
            .collect();

        Ok(Self { entries })
    }

    /// Index and entry of the most probable class. The earliest class wins
    /// ties.
    pub fn best(&self) -> Option<(usize, ClassProbability)> {
        let mut best: Option<(usize, ClassProbability)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            match best {
                Some((_, current)) if entry.probability <= current.probability => {}
                _ => best = Some((index, *entry)),
            }
        }
        best
    }

    /// The `n` most probable classes, descending, ties in registry order.
    pub fn top(&self, n: usize) -> Vec<TopPrediction> {
        let mut ranked: Vec<&ClassProbability> = self.entries.iter().collect();
        // sort_by is stable, so equal probabilities keep registry order
        ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        ranked
            .into_iter()
            .take(n)
            .map(|entry| TopPrediction {
                label: entry.label,
                confidence_percent: percent(entry.probability),
            })
            .collect()
    }
}

fn check_distribution(probabilities: &[f32]) -> Result<(), ClassifierError> {
    if let Some((index, &value)) = probabilities
        .iter()
        .enumerate()
        .find(|(_, p)| !(0.0..=1.0).contains(*p))
    {
        return Err(ClassifierError::ProbabilityOutOfRange { index, value });
    }
    let sum: f32 = probabilities.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(ClassifierError::NotNormalized(sum));
    }
    Ok(())
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Probability as a percentage rounded to one decimal.
pub fn percent(probability: f32) -> f64 {
    (probability as f64 * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPrediction {
    pub label: &'static str,
    #[serde(rename = "confidence")]
    pub confidence_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    pub reject_below: f32,
    pub warn_below: f32,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            reject_below: REJECT_BELOW,
            warn_below: WARN_BELOW,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceGate {
    policy: ConfidencePolicy,
}

impl ConfidenceGate {
    pub fn evaluate(&self, probabilities: &ClassProbabilities) -> PredictionVerdict {
        let top_3 = probabilities.top(3);
        let Some((class_index, best)) = probabilities.best() else {
            return PredictionVerdict::Rejected(Rejection::low_confidence(0.0, top_3));
        };
        let confidence = best.probability;
        debug!(label = best.label, confidence, "confidence gate");

        if confidence < self.policy.reject_below {
            return PredictionVerdict::Rejected(Rejection::low_confidence(confidence, top_3));
        }

        let warning = (confidence < self.policy.warn_below).then(|| {
            format!(
                "AI confidence is low ({:.1}%). The result may be inaccurate.",
                confidence as f64 * 100.0
            )
        });

        PredictionVerdict::Accepted(Acceptance {
            label: best.label,
            confidence,
            class_index,
            top_3,
            warning,
            skin_validation: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classes::CLASS_REGISTRY;
    use crate::verdict::RejectionCode;

    /// Distribution with `top` on `label` and the remainder spread evenly
    /// over every other class.
    pub(crate) fn peaked(label: &str, top: f32) -> Vec<f32> {
        let index = CLASS_REGISTRY
            .names()
            .iter()
            .position(|name| *name == label)
            .unwrap();
        let rest = (1.0 - top) / (CLASS_REGISTRY.len() - 1) as f32;
        (0..CLASS_REGISTRY.len())
            .map(|i| if i == index { top } else { rest })
            .collect()
    }

    fn probabilities(scores: Vec<f32>) -> ClassProbabilities {
        ClassProbabilities::from_output(&CLASS_REGISTRY, ClassifierOutput::Probabilities(scores))
            .unwrap()
    }

    fn accepted(verdict: PredictionVerdict) -> Acceptance {
        match verdict {
            PredictionVerdict::Accepted(acceptance) => acceptance,
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn confident_melanoma_is_accepted_without_warning() {
        let verdict = ConfidenceGate::default().evaluate(&probabilities(peaked("Melanoma", 0.82)));
        let acceptance = accepted(verdict);
        assert_eq!(acceptance.label, "Melanoma");
        assert_eq!(acceptance.class_index, 12);
        assert_eq!(percent(acceptance.confidence), 82.0);
        assert_eq!(acceptance.warning, None);
        assert_eq!(acceptance.top_3[0].label, "Melanoma");
        assert_eq!(acceptance.top_3.len(), 3);
    }

    #[test]
    fn middling_confidence_carries_warning() {
        let verdict = ConfidenceGate::default().evaluate(&probabilities(peaked("Psoriasis", 0.40)));
        let acceptance = accepted(verdict);
        assert_eq!(acceptance.label, "Psoriasis");
        let warning = acceptance.warning.unwrap();
        assert!(warning.contains("40.0%"), "{}", warning);
    }

    #[test]
    fn low_confidence_is_rejected_with_top_3() {
        let verdict = ConfidenceGate::default().evaluate(&probabilities(peaked("nevus", 0.20)));
        match verdict {
            PredictionVerdict::Rejected(rejection) => {
                assert_eq!(rejection.code, RejectionCode::LowConfidence);
                assert!(rejection.reason.contains("20.0%"), "{}", rejection.reason);
                let top_3 = rejection.top_3.unwrap();
                assert_eq!(top_3.len(), 3);
                assert_eq!(top_3[0].label, "nevus");
                assert_eq!(top_3[0].confidence_percent, 20.0);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn reject_boundary_is_accepted_with_warning() {
        let acceptance =
            accepted(ConfidenceGate::default().evaluate(&probabilities(peaked("Impetigo", 0.35))));
        assert_eq!(acceptance.confidence, 0.35);
        assert!(acceptance.warning.is_some());
    }

    #[test]
    fn warn_boundary_has_no_warning() {
        let acceptance =
            accepted(ConfidenceGate::default().evaluate(&probabilities(peaked("Impetigo", 0.75))));
        assert_eq!(acceptance.confidence, 0.75);
        assert_eq!(acceptance.warning, None);
    }

    #[test]
    fn custom_policy_moves_thresholds() {
        let gate = ConfidenceGate {
            policy: ConfidencePolicy {
                reject_below: 0.5,
                warn_below: 0.9,
            },
        };
        assert!(matches!(
            gate.evaluate(&probabilities(peaked("Impetigo", 0.45))),
            PredictionVerdict::Rejected(_)
        ));
        let acceptance = accepted(gate.evaluate(&probabilities(peaked("Impetigo", 0.82))));
        assert!(acceptance.warning.is_some());
    }

    #[test]
    fn top_3_is_descending() {
        let mut scores = vec![0.0; CLASS_REGISTRY.len()];
        scores[30] = 0.5;
        scores[2] = 0.3;
        scores[17] = 0.15;
        scores[4] = 0.05;

        let top = probabilities(scores).top(3);
        let labels: Vec<_> = top.iter().map(|t| t.label).collect();
        assert_eq!(
            labels,
            ["vascular lesion", "Epidermolysis Bullosa Pruriginosa", "Pediculosis Capitis"]
        );
        assert_eq!(
            top.iter().map(|t| t.confidence_percent).collect::<Vec<_>>(),
            [50.0, 30.0, 15.0]
        );
    }

    #[test]
    fn ties_keep_registry_order() {
        let uniform = vec![1.0 / CLASS_REGISTRY.len() as f32; CLASS_REGISTRY.len()];
        let probabilities = probabilities(uniform);

        let labels: Vec<_> = probabilities.top(3).iter().map(|t| t.label).collect();
        assert_eq!(
            labels,
            ["Basal Cell Carcinoma", "Darier_s Disease", "Epidermolysis Bullosa Pruriginosa"]
        );
        assert_eq!(probabilities.best().unwrap().0, 0);
    }

    #[test]
    fn logits_go_through_softmax() {
        let mut logits = vec![0.0; CLASS_REGISTRY.len()];
        logits[12] = 10.0;
        let probabilities =
            ClassProbabilities::from_output(&CLASS_REGISTRY, ClassifierOutput::Logits(logits))
                .unwrap();

        let total: f32 = probabilities.entries.iter().map(|e| e.probability).sum();
        assert!((total - 1.0).abs() < 1e-5);
        let (index, best) = probabilities.best().unwrap();
        assert_eq!(index, 12);
        assert!(best.probability > 0.99);
    }

    #[test]
    fn wrong_length_is_malformed() {
        let err = ClassProbabilities::from_output(
            &CLASS_REGISTRY,
            ClassifierOutput::Probabilities(vec![0.5, 0.5]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::MalformedOutput {
                expected: 31,
                found: 2
            }
        ));
    }

    #[test]
    fn nan_scores_are_rejected() {
        let mut scores = peaked("Melanoma", 0.9);
        scores[3] = f32::NAN;
        let err = ClassProbabilities::from_output(
            &CLASS_REGISTRY,
            ClassifierOutput::Probabilities(scores),
        )
        .unwrap_err();
        assert!(matches!(err, ClassifierError::NonFinite(3)));
    }

    #[test]
    fn probability_above_one_is_rejected() {
        let mut scores = vec![0.9; CLASS_REGISTRY.len()];
        scores[12] = 3.0;
        let err = ClassProbabilities::from_output(
            &CLASS_REGISTRY,
            ClassifierOutput::Probabilities(scores),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::ProbabilityOutOfRange { index: 12, .. }
        ));
    }

    #[test]
    fn negative_probability_is_rejected() {
        let mut scores = peaked("Melanoma", 0.9);
        scores[5] = -0.01;
        let err = ClassProbabilities::from_output(
            &CLASS_REGISTRY,
            ClassifierOutput::Probabilities(scores),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::ProbabilityOutOfRange { index: 5, .. }
        ));
    }

    #[test]
    fn unnormalized_probabilities_are_rejected() {
        let mut scores = vec![0.0; CLASS_REGISTRY.len()];
        scores[12] = 0.6;
        scores[0] = 0.1;
        let err = ClassProbabilities::from_output(
            &CLASS_REGISTRY,
            ClassifierOutput::Probabilities(scores),
        )
        .unwrap_err();
        match err {
            ClassifierError::NotNormalized(sum) => assert!((sum - 0.7).abs() < 1e-6),
            other => panic!("expected NotNormalized, got {:?}", other),
        }
    }

    #[test]
    fn rounding_noise_in_sum_is_tolerated() {
        let mut scores = peaked("Melanoma", 0.82);
        scores[0] += 0.0005;
        let probabilities = probabilities(scores);
        assert_eq!(probabilities.best().unwrap().0, 12);
    }
}
