//! Request handlers

use super::error::ApiError;
use super::signature::{verify_signature, SIGNATURE_HEADER};
use super::AppState;
use crate::pipeline::aggregation::ALL_PERIODS_ALIAS;
use crate::types::{DemandSnapshot, WorkflowJobEvent};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const FORM_FIELD: &str = "payload";

pub async fn root() -> &'static str {
    "runnerflow: CI runner demand tracker\n"
}

pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .ok_or(ApiError::MissingSignature)?
            .to_str()
            .map_err(|_| ApiError::InvalidSignatureFormat)?;
        verify_signature(secret.as_bytes(), &body, header)?;
    }

    let event = parse_event(&body)?;
    state.ingestion.ingest(&event).await?;

    Ok(Json(json!({ "status": "success" })))
}

#[derive(Debug, Deserialize)]
pub struct RunningCountParams {
    pub period: Option<String>,
}

pub async fn running_count(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunningCountParams>,
) -> Result<Json<DemandSnapshot>, ApiError> {
    let period = params.period.as_deref().unwrap_or(ALL_PERIODS_ALIAS);
    let snapshot = state.aggregation.get_snapshot(period).await?;
    Ok(Json(snapshot))
}

/// Decode a webhook body: raw JSON, or a form body carrying `payload=<json>`
pub fn parse_event(body: &[u8]) -> Result<WorkflowJobEvent, ApiError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ApiError::InvalidPayload(format!("body is not UTF-8: {}", e)))?;

    let trimmed = text.trim_start();
    let event = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed)
    } else {
        let json = form_payload(text)?;
        serde_json::from_str(&json)
    };

    event.map_err(|e| ApiError::InvalidPayload(e.to_string()))
}

fn form_payload(text: &str) -> Result<String, ApiError> {
    let encoded = text
        .split('&')
        .find_map(|pair| {
            pair.strip_prefix(FORM_FIELD)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .ok_or_else(|| ApiError::InvalidPayload("missing payload parameter".to_string()))?;

    // Form encoding carries spaces as '+'
    let spaced = encoded.replace('+', " ");
    let decoded = urlencoding::decode(&spaced)
        .map_err(|e| ApiError::InvalidPayload(format!("invalid URL encoding: {}", e)))?;

    Ok(decoded.into_owned())
}
