use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::classes::{disease_info, Severity};
use crate::confidence::{percent, TopPrediction};
use crate::skin::SkinVerdict;

const NOT_SKIN_MESSAGE: &str = "The uploaded image is not a skin photo";
const NOT_SKIN_SUGGESTION: &str = "Please upload a clear photo of skin. Make sure the photo focuses on the skin area and is well lit.";
const LOW_CONFIDENCE_MESSAGE: &str = "The prediction result cannot be trusted";
const LOW_CONFIDENCE_SUGGESTION: &str = "Try uploading a better quality photo: enough lighting, sharp focus, and the skin area clearly visible.";

/// Terminal output of the prediction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionVerdict {
    Rejected(Rejection),
    Accepted(Acceptance),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    NotSkin,
    LowConfidence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub code: RejectionCode,
    pub message: String,
    pub reason: String,
    pub suggestion: String,
    pub top_3: Option<Vec<TopPrediction>>,
    pub skin_validation: Option<SkinVerdict>,
}

impl Rejection {
    pub fn not_skin(skin: SkinVerdict) -> Self {
        Self {
            code: RejectionCode::NotSkin,
            message: NOT_SKIN_MESSAGE.to_string(),
            reason: skin.reason.clone(),
            suggestion: NOT_SKIN_SUGGESTION.to_string(),
            top_3: None,
            skin_validation: Some(skin),
        }
    }

    pub fn low_confidence(confidence: f32, top_3: Vec<TopPrediction>) -> Self {
        Self {
            code: RejectionCode::LowConfidence,
            message: LOW_CONFIDENCE_MESSAGE.to_string(),
            reason: format!(
                "AI confidence is too low ({:.1}%)",
                confidence as f64 * 100.0
            ),
            suggestion: LOW_CONFIDENCE_SUGGESTION.to_string(),
            top_3: Some(top_3),
            skin_validation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub label: &'static str,
    pub confidence: f32,
    pub class_index: usize,
    pub top_3: Vec<TopPrediction>,
    pub warning: Option<String>,
    pub skin_validation: Option<SkinVerdict>,
}

#[derive(Debug, Serialize)]
pub struct RejectionBody<'a> {
    status: &'static str,
    error: RejectionCode,
    message: &'a str,
    reason: &'a str,
    suggestion: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_3: Option<&'a [TopPrediction]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skin_validation: Option<&'a SkinVerdict>,
}

#[derive(Debug, Serialize)]
pub struct PredictionBody {
    label: &'static str,
    confidence: f32,
    confidence_percent: f64,
    class_index: usize,
    severity: Severity,
    description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AcceptanceBody<'a> {
    status: &'static str,
    prediction: PredictionBody,
    top_3_predictions: &'a [TopPrediction],
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skin_validation: Option<&'a SkinVerdict>,
}

impl Rejection {
    pub fn body(&self) -> RejectionBody<'_> {
        RejectionBody {
            status: "error",
            error: self.code,
            message: &self.message,
            reason: &self.reason,
            suggestion: &self.suggestion,
            top_3: self.top_3.as_deref(),
            skin_validation: self.skin_validation.as_ref(),
        }
    }
}

impl Acceptance {
    pub fn body(&self) -> AcceptanceBody<'_> {
        let info = disease_info(self.label);
        AcceptanceBody {
            status: "success",
            prediction: PredictionBody {
                label: self.label,
                confidence: self.confidence,
                confidence_percent: percent(self.confidence),
                class_index: self.class_index,
                severity: info.severity,
                description: info.description,
            },
            top_3_predictions: &self.top_3,
            warning: self.warning.as_deref(),
            skin_validation: self.skin_validation.as_ref(),
        }
    }
}

impl IntoResponse for PredictionVerdict {
    fn into_response(self) -> Response {
        match self {
            PredictionVerdict::Rejected(rejection) => {
                (StatusCode::BAD_REQUEST, Json(rejection.body())).into_response()
            }
            PredictionVerdict::Accepted(acceptance) => {
                (StatusCode::OK, Json(acceptance.body())).into_response()
            }
        }
    }
}
