use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, instrument, warn};

use crate::classes::CLASS_REGISTRY;
use crate::pipeline::{Pipeline, PipelineError};
use crate::verdict::PredictionVerdict;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const SERVICE_NAME: &str = "SkinCheck AI Backend";

pub struct AppState {
    pub pipeline: Pipeline,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file in request. Use the 'file' field.")]
    MissingFile,
    #[error("No file selected")]
    NoFileSelected,
    #[error("Unsupported file format. Use JPG, JPEG, or PNG.")]
    UnsupportedFormat,
    #[error("{0}")]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile | ApiError::NoFileSelected | ApiError::UnsupportedFormat => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Multipart(err) => err.status(),
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Multipart(_) if status == StatusCode::PAYLOAD_TOO_LARGE => {
                "File is too large.".to_string()
            }
            ApiError::Pipeline(err) => {
                error!(error = %err, "prediction failed");
                format!("Prediction failed: {}", err)
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

pub fn allowed_file(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, extension)| {
            let extension = extension.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&extension.as_str())
        })
        .unwrap_or(false)
}

/// CORS for the configured origins. A `*` entry allows any origin, and
/// credentials are then switched off since browsers refuse them with a
/// wildcard.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, header::InvalidHeaderValue> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(AllowOrigin::any()));
    }

    let origins = origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

pub fn router(state: Arc<AppState>, body_limit_bytes: usize, cors: CorsLayer) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .route("/classes", get(classes_handler))
        .route("/model-info", get(model_info_handler))
        .with_state(state)
        .route("/", get(root))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[instrument(skip_all)]
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<PredictionVerdict, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await?;
            upload = Some((file_name, bytes));
            break;
        }
    }

    let (file_name, bytes) = upload.ok_or(ApiError::MissingFile)?;
    if file_name.is_empty() {
        return Err(ApiError::NoFileSelected);
    }
    if !allowed_file(&file_name) {
        warn!(%file_name, "unsupported upload extension");
        return Err(ApiError::UnsupportedFormat);
    }

    Ok(state.pipeline.run(bytes.to_vec()).await?)
}

async fn classes_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "total": CLASS_REGISTRY.len(),
        "classes": CLASS_REGISTRY.names(),
    }))
}

async fn model_info_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "success",
        "data": {
            "model_name": state.model_name,
            "total_classes": CLASS_REGISTRY.len(),
            "class_names": CLASS_REGISTRY.names(),
            "backend": state.pipeline.classifier_name(),
        }
    }))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierOutput;
    use crate::confidence::tests::peaked;
    use crate::pipeline::tests::{pipeline, png, FixedClassifier, SKIN_TONE};
    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "skincheck-test-boundary";

    fn app(output: ClassifierOutput, body_limit_bytes: usize) -> Router {
        let classifier = Arc::new(FixedClassifier::new(output));
        let state = Arc::new(AppState {
            pipeline: pipeline(classifier, Duration::from_secs(5)),
            model_name: "test-model".to_string(),
        });
        router(state, body_limit_bytes, CorsLayer::new())
    }

    fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn melanoma() -> ClassifierOutput {
        ClassifierOutput::Probabilities(peaked("Melanoma", 0.82))
    }

    #[test]
    fn extension_filter() {
        assert!(allowed_file("lesion.png"));
        assert!(allowed_file("lesion.backup.JPEG"));
        assert!(!allowed_file("lesion.gif"));
        assert!(!allowed_file("png"));
    }

    #[tokio::test]
    async fn health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(melanoma(), 1024), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn root_reports_service() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(app(melanoma(), 1024), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok(), "{}", timestamp);
    }

    fn cors_app(origins: &[&str]) -> Router {
        let origins: Vec<String> = origins.iter().map(|s| s.to_string()).collect();
        let classifier = Arc::new(FixedClassifier::new(melanoma()));
        let state = Arc::new(AppState {
            pipeline: pipeline(classifier, Duration::from_secs(5)),
            model_name: "test-model".to_string(),
        });
        router(state, 1024, cors_layer(&origins).unwrap())
    }

    fn from_origin(origin: &str) -> Request<Body> {
        Request::builder()
            .uri("/health")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn wildcard_origin_allows_any_without_credentials() {
        let response = cors_app(&["*"])
            .oneshot(from_origin("https://clinic.example"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[tokio::test]
    async fn listed_origin_is_echoed_with_credentials() {
        let response = cors_app(&["http://localhost:5173"])
            .oneshot(from_origin("http://localhost:5173"))
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn invalid_origin_is_an_error() {
        assert!(cors_layer(&["http://bad\norigin".to_string()]).is_err());
    }

    #[tokio::test]
    async fn classes_are_listed_in_order() {
        let request = Request::builder().uri("/classes").body(Body::empty()).unwrap();
        let (status, body) = send(app(melanoma(), 1024), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 31);
        assert_eq!(body["classes"][12], "Melanoma");
    }

    #[tokio::test]
    async fn model_info_reports_backend() {
        let request = Request::builder().uri("/model-info").body(Body::empty()).unwrap();
        let (_, body) = send(app(melanoma(), 1024), request).await;
        assert_eq!(body["data"]["model_name"], "test-model");
        assert_eq!(body["data"]["backend"], "fixed");
        assert_eq!(body["data"]["total_classes"], 31);
    }

    #[tokio::test]
    async fn predict_accepts_skin_photo() {
        let request = multipart_request("file", "arm.png", &png(SKIN_TONE));
        let (status, body) = send(app(melanoma(), 1024 * 1024), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["prediction"]["label"], "Melanoma");
        assert_eq!(body["prediction"]["confidence_percent"], 82.0);
        assert_eq!(body["prediction"]["severity"], "high");
        assert_eq!(body["top_3_predictions"].as_array().unwrap().len(), 3);
        assert!(body.get("warning").is_none());
        assert_eq!(body["skin_validation"]["is_skin"], true);
    }

    #[tokio::test]
    async fn predict_warns_on_middling_confidence() {
        let output = ClassifierOutput::Probabilities(peaked("Psoriasis", 0.40));
        let request = multipart_request("file", "arm.jpg", &png(SKIN_TONE));
        let (status, body) = send(app(output, 1024 * 1024), request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["warning"].as_str().unwrap().contains("40.0%"));
    }

    #[tokio::test]
    async fn predict_rejects_low_confidence() {
        let output = ClassifierOutput::Probabilities(peaked("Psoriasis", 0.20));
        let request = multipart_request("file", "arm.png", &png(SKIN_TONE));
        let (status, body) = send(app(output, 1024 * 1024), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "low_confidence");
        assert_eq!(body["top_3"].as_array().unwrap().len(), 3);
        assert!(body.get("prediction").is_none());
    }

    #[tokio::test]
    async fn predict_rejects_gray_image() {
        let request = multipart_request("file", "wall.png", &png([128, 128, 128]));
        let (status, body) = send(app(melanoma(), 1024 * 1024), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "not_skin");
        assert!(body["reason"].as_str().unwrap().contains("128,128,128"));
        assert!(body.get("top_3").is_none());
    }

    #[tokio::test]
    async fn predict_validates_upload() {
        let (status, body) = send(
            app(melanoma(), 1024 * 1024),
            multipart_request("image", "arm.png", &png(SKIN_TONE)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], ApiError::MissingFile.to_string());

        let (status, body) = send(
            app(melanoma(), 1024 * 1024),
            multipart_request("file", "", &png(SKIN_TONE)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], ApiError::NoFileSelected.to_string());

        let (status, body) = send(
            app(melanoma(), 1024 * 1024),
            multipart_request("file", "arm.gif", &png(SKIN_TONE)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], ApiError::UnsupportedFormat.to_string());
    }

    #[tokio::test]
    async fn predict_enforces_body_limit() {
        let request = multipart_request("file", "big.png", &vec![0u8; 64 * 1024]);
        let (status, body) = send(app(melanoma(), 1024), request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn classifier_failure_is_server_error() {
        let output = ClassifierOutput::Logits(vec![0.0; 3]);
        let request = multipart_request("file", "arm.png", &png(SKIN_TONE));
        let (status, body) = send(app(output, 1024 * 1024), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("3 scores"));
    }
}
