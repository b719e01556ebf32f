use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error};

use super::{Classifier, ClassifierError, ClassifierOutput};

/// Classifier served over HTTP. The image is posted as a PNG body and the
/// service answers with `{"logits": [...]}` or `{"probabilities": [...]}`.
pub struct RemoteClassifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl RemoteClassifier {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token,
        }
    }
}

fn encode_png(image: DynamicImage) -> Result<Vec<u8>, ClassifierError> {
    let rgb = DynamicImage::ImageRgb8(image.into_rgb8());
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn classify(&self, image: DynamicImage) -> Result<ClassifierOutput, ClassifierError> {
        let body = encode_png(image)?;
        debug!(url = %self.url, bytes = body.len(), "sending image to classifier");

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/png")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            error!(url = %self.url, %status, "classifier rejected request");
            return Err(ClassifierError::Status(status.as_u16()));
        }

        Ok(response.json::<ClassifierOutput>().await?)
    }
}
