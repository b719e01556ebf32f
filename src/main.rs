use std::{net::SocketAddr, sync::Arc};

use tracing::info;
use tracing_subscriber::EnvFilter;

mod classes;
mod classifier;
mod confidence;
mod config;
mod pipeline;
mod routes;
mod skin;
mod verdict;

use classes::CLASS_REGISTRY;
use classifier::{Classifier, ClassifierError, RemoteClassifier};
use confidence::ConfidenceGate;
use config::{BackendKind, Config};
use pipeline::Pipeline;
use routes::AppState;
use skin::SkinGate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let classifier = build_classifier(&config).await?;
    info!(
        backend = classifier.name(),
        classes = CLASS_REGISTRY.len(),
        timeout = ?config.classifier_timeout,
        "classifier ready"
    );

    let pipeline = Pipeline::new(
        SkinGate::default(),
        ConfidenceGate::default(),
        classifier,
        &CLASS_REGISTRY,
        config.classifier_timeout,
    );
    let state = Arc::new(AppState {
        pipeline,
        model_name: config.model_name.clone(),
    });

    let cors = routes::cors_layer(&config.cors_origins)?;
    let app = routes::router(state, config.body_limit_bytes, cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_classifier(config: &Config) -> Result<Arc<dyn Classifier>, ClassifierError> {
    match config.backend {
        BackendKind::Remote => {
            info!(url = %config.classifier_url, "using remote classifier");
            Ok(Arc::new(RemoteClassifier::new(
                config.classifier_url.clone(),
                config.classifier_token.clone(),
            )))
        }
        #[cfg(feature = "tensorflow")]
        BackendKind::TensorFlow => Ok(Arc::new(
            classifier::TensorFlowClassifier::load(&config.tensorflow).await?,
        )),
        #[cfg(not(feature = "tensorflow"))]
        BackendKind::TensorFlow => Err(ClassifierError::Backend(format!(
            "tensorflow backend not compiled in (model {})",
            config.tensorflow.model_path.display()
        ))),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
