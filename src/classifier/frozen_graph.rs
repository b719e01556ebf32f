use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor};
use tokio::sync::Mutex;
use tracing::info;

use super::{Classifier, ClassifierError, ClassifierOutput};
use crate::classes::CLASS_REGISTRY;
use crate::config::TensorFlowConfig;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const INPUT_OPERATION: &str = "x";
const OUTPUT_OPERATION: &str = "Identity";

fn backend<E: std::fmt::Display>(err: E) -> ClassifierError {
    ClassifierError::Backend(err.to_string())
}

struct Model {
    session: Session,
    graph: Graph,
    input_size: u32,
}

impl Model {
    fn load(model_path: &Path, labels_path: &Path, input_size: u32) -> Result<Self, ClassifierError> {
        let model_bytes = std::fs::read(model_path).map_err(backend)?;
        let mut graph = Graph::new();
        graph
            .import_graph_def(&model_bytes, &ImportGraphDefOptions::new())
            .map_err(backend)?;
        let session = Session::new(&SessionOptions::new(), &graph).map_err(backend)?;

        let labels: Vec<String> = std::fs::read_to_string(labels_path)
            .map_err(backend)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        CLASS_REGISTRY.verify_labels(&labels)?;

        Ok(Self {
            session,
            graph,
            input_size,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor<f32>, ClassifierError> {
        let size = self.input_size;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifierError::Backend("image has no pixels".to_string()));
        }

        let (resized_width, resized_height) = shortest_edge_resize(width, height, size);
        let cropped = image
            .resize_exact(resized_width, resized_height, FilterType::CatmullRom)
            .crop_imm(
                (resized_width - size) / 2,
                (resized_height - size) / 2,
                size,
                size,
            )
            .to_rgb8();

        let mut flat = Vec::with_capacity((size * size * 3) as usize);
        for pixel in cropped.pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                flat.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }

        let mut tensor = Tensor::new(&[1, size as u64, size as u64, 3]);
        tensor.copy_from_slice(&flat);
        Ok(tensor)
    }

    fn run(&self, image: &DynamicImage) -> Result<Vec<f32>, ClassifierError> {
        let input = self.preprocess(image)?;

        let input_operation = self
            .graph
            .operation_by_name(INPUT_OPERATION)
            .map_err(backend)?
            .ok_or_else(|| backend(format!("input operation '{}' not found", INPUT_OPERATION)))?;
        let output_operation = self
            .graph
            .operation_by_name(OUTPUT_OPERATION)
            .map_err(backend)?
            .ok_or_else(|| backend(format!("output operation '{}' not found", OUTPUT_OPERATION)))?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &input);
        let token = args.request_fetch(&output_operation, 0);
        self.session.run(&mut args).map_err(backend)?;
        let output: Tensor<f32> = args.fetch(token).map_err(backend)?;

        Ok(output.to_vec())
    }
}

/// Dimensions after scaling the shortest edge to `size`, never below `size`
/// on either axis.
fn shortest_edge_resize(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = size as f32 / width.min(height) as f32;
    (
        ((width as f32 * scale).round() as u32).max(size),
        ((height as f32 * scale).round() as u32).max(size),
    )
}

/// Frozen TensorFlow graph producing logits over the class registry.
pub struct TensorFlowClassifier {
    model: Arc<Mutex<Model>>,
}

impl TensorFlowClassifier {
    pub async fn load(config: &TensorFlowConfig) -> Result<Self, ClassifierError> {
        ensure_file(&config.model_path, config.model_url.as_deref()).await?;
        ensure_file(&config.class_list_path, config.class_list_url.as_deref()).await?;

        let model_path = config.model_path.clone();
        let labels_path = config.class_list_path.clone();
        let input_size = config.input_size;
        let model = tokio::task::spawn_blocking(move || {
            Model::load(&model_path, &labels_path, input_size)
        })
        .await
        .map_err(backend)??;

        info!(path = %config.model_path.display(), "tensorflow model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Classifier for TensorFlowClassifier {
    fn name(&self) -> &'static str {
        "tensorflow"
    }

    async fn classify(&self, image: DynamicImage) -> Result<ClassifierOutput, ClassifierError> {
        let model = Arc::clone(&self.model);
        let logits = tokio::task::spawn_blocking(move || model.blocking_lock().run(&image))
            .await
            .map_err(backend)??;
        Ok(ClassifierOutput::Logits(logits))
    }
}

async fn ensure_file(path: &Path, url: Option<&str>) -> Result<(), ClassifierError> {
    if path.exists() {
        return Ok(());
    }
    let url = url.ok_or_else(|| {
        backend(format!(
            "{} is missing and no download URL is configured",
            path.display()
        ))
    })?;
    download_file(url, path).await
}

async fn download_file(url: &str, path: &Path) -> Result<(), ClassifierError> {
    info!(%url, path = %path.display(), "downloading model file");

    let mut headers = HeaderMap::new();
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(backend)?;
        headers.insert(AUTHORIZATION, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let response = reqwest::Client::new()
        .get(url)
        .headers(headers)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(ClassifierError::Status(response.status().as_u16()));
    }

    let bytes = response.bytes().await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(backend)?;
    }
    tokio::fs::write(path, bytes).await.map_err(backend)?;
    Ok(())
}
