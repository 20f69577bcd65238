//! Request-level failures and their HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::handler::ResponseStatus;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("no image field in request")]
    MissingImage,
    #[error("image field has an empty file name")]
    NoFileSelected,
    #[error("image is empty")]
    EmptyImage,
    #[error("image could not be decoded: {0}")]
    Undecodable(#[from] image::ImageError),
    #[error("malformed multipart body: {0}")]
    MalformedUpload(String),
    #[error("upload exceeds the size limit")]
    PayloadTooLarge,
    #[error("classification failed")]
    Classification,
    #[error("internal error: {0}")]
    Internal(String),
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::MissingImage
            | RequestError::NoFileSelected
            | RequestError::EmptyImage
            | RequestError::Undecodable(_)
            | RequestError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            RequestError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::Classification | RequestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message.
    fn message(&self) -> &'static str {
        match self {
            RequestError::MissingImage => "Aucune image fournie",
            RequestError::NoFileSelected => "Aucun fichier sélectionné",
            RequestError::EmptyImage => "Image vide",
            RequestError::Undecodable(_) => "Impossible de décoder l'image",
            RequestError::MalformedUpload(_) => "Requête multipart invalide",
            RequestError::PayloadTooLarge => "Image trop volumineuse",
            RequestError::Classification => "classification failed",
            RequestError::Internal(_) => "internal error",
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        } else {
            tracing::warn!(status = %status, error = %self, "request rejected");
        }

        let body = match &self {
            RequestError::Classification => json!({
                "status": ResponseStatus::Error,
                "match": gate_core::IdentityOutcome::ClassificationError,
                "message": self.message(),
            }),
            _ => json!({
                "status": ResponseStatus::Error,
                "message": self.message(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Response for a panic caught anywhere below the router.
pub fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    RequestError::Internal("handler panicked".into()).into_response()
}
