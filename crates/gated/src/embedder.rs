//! Client for the external face embedding service.
//!
//! The service owns detection and embedding extraction. It receives the
//! image as multipart field `image` and answers `{"faces": [[f32, ...], ...]}`,
//! one vector per detected face.

use gate_core::{ClassifyError, Embedding, FaceEmbedder};
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    faces: Vec<Vec<f32>>,
    #[serde(default)]
    model: Option<String>,
}

/// Blocking embedding-service client. Must be built and used off the async
/// runtime (the classifier thread).
pub struct RemoteEmbedder {
    client: Client,
    url: String,
}

impl RemoteEmbedder {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifyError::Embedder(format!("building http client: {e}")))?;
        tracing::info!(url, timeout_secs = timeout.as_secs(), "embedding service client ready");
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, ClassifyError> {
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .map_err(|e| ClassifyError::Embedder(format!("encoding image: {e}")))?;
        Ok(jpeg)
    }
}

impl FaceEmbedder for RemoteEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<Embedding>, ClassifyError> {
        let jpeg = Self::encode_jpeg(image)?;
        let part = multipart::Part::bytes(jpeg)
            .file_name("capture.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ClassifyError::Embedder(e.to_string()))?;
        let form = multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(|e| ClassifyError::Embedder(format!("request to {}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassifyError::Embedder(format!(
                "embedding service returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| ClassifyError::Embedder(format!("bad embedding response: {e}")))?;
        tracing::debug!(faces = parsed.faces.len(), "embedding service answered");

        Ok(parsed
            .faces
            .into_iter()
            .map(|values| Embedding {
                values,
                model_version: parsed.model.clone(),
            })
            .collect())
    }
}
