//! One recognition request, end to end: validate, decode, classify,
//! actuate on a match, answer.

use crate::dispatcher::Actuator;
use crate::engine::EngineHandle;
use crate::error::RequestError;
use axum::body::Bytes;
use gate_core::IdentityOutcome;
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

const RECOGNIZED: &str = "Visage reconnu";
const NOT_RECOGNIZED: &str = "Visage non reconnu";

/// The `image` field of an upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Successful recognition answer.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResponse {
    pub status: ResponseStatus,
    #[serde(rename = "match")]
    pub outcome: IdentityOutcome,
    pub message: &'static str,
}

#[derive(Clone)]
pub struct RecognitionHandler {
    engine: EngineHandle,
    actuator: Arc<dyn Actuator>,
}

impl RecognitionHandler {
    pub fn new(engine: EngineHandle, actuator: Arc<dyn Actuator>) -> Self {
        Self { engine, actuator }
    }

    /// Processing runs on its own task and completes even if the caller
    /// stops polling (client disconnect).
    pub async fn handle(
        &self,
        upload: Option<ImageUpload>,
    ) -> Result<RecognitionResponse, RequestError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("recognition", %request_id);
        let this = self.clone();
        tokio::spawn(async move { this.process(upload).await }.instrument(span))
            .await
            .map_err(|e| RequestError::Internal(format!("recognition task failed: {e}")))?
    }

    async fn process(
        &self,
        upload: Option<ImageUpload>,
    ) -> Result<RecognitionResponse, RequestError> {
        let upload = upload.ok_or(RequestError::MissingImage)?;
        match upload.file_name.as_deref() {
            // A part without a filename is a plain form value, not a file.
            None => return Err(RequestError::MissingImage),
            Some("") => return Err(RequestError::NoFileSelected),
            Some(_) => {}
        }
        if upload.data.is_empty() {
            return Err(RequestError::EmptyImage);
        }

        let image = decode(upload.data).await?;
        tracing::debug!(width = image.width(), height = image.height(), "image decoded");

        let outcome = match self.engine.classify(image).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "classifier unavailable");
                IdentityOutcome::ClassificationError
            }
        };

        match outcome {
            IdentityOutcome::ClassificationError => Err(RequestError::Classification),
            IdentityOutcome::Matched(identity) => {
                tracing::info!(%identity, "face recognized; opening door");
                let command = self.actuator.dispatch(&identity).await;
                let delivered = command.channel_results;
                if !delivered.broker && !delivered.controller {
                    tracing::warn!(
                        identity = %command.identity,
                        action = ?command.action,
                        "no actuation channel delivered the command"
                    );
                }
                Ok(RecognitionResponse {
                    status: ResponseStatus::Success,
                    outcome: IdentityOutcome::Matched(identity),
                    message: RECOGNIZED,
                })
            }
            other => {
                tracing::info!(outcome = %other, "face not recognized");
                Ok(RecognitionResponse {
                    status: ResponseStatus::Success,
                    outcome: other,
                    message: NOT_RECOGNIZED,
                })
            }
        }
    }
}

/// Decode on the blocking pool; large JPEGs take a while.
async fn decode(data: Bytes) -> Result<DynamicImage, RequestError> {
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&data))
        .await
        .map_err(|e| RequestError::Internal(format!("decode task failed: {e}")))?;
    Ok(decoded?)
}
