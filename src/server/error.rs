//! HTTP error mapping for the webhook and query endpoints

use crate::error::{AggregationFailed, IngestionFailed};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Ingestion(#[from] IngestionFailed),

    #[error(transparent)]
    Aggregation(#[from] AggregationFailed),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSignature | Self::InvalidSignatureFormat | Self::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::Ingestion(_) | Self::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message; never carries storage details
    fn public_message(&self) -> &'static str {
        match self {
            Self::MissingSignature => "Missing signature header",
            Self::InvalidSignatureFormat => "Invalid signature format",
            Self::InvalidSignature => "Invalid signature",
            Self::InvalidPayload(_) => "Invalid payload",
            Self::Ingestion(_) => "Failed to process event",
            Self::Aggregation(_) => "Failed to retrieve data",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Ingestion(_) | Self::Aggregation(_) => {}
            _ => log::warn!("⚠️  Rejected request: {}", self),
        }

        let body = Json(json!({ "error": self.public_message() }));
        (self.status_code(), body).into_response()
    }
}
