use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read as IoRead;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;
use utoipa::OpenApi;

use super::service::SentryIngestionService;
use super::types::{SentryEnvelopeResponse, SentryEventPayload, SentryEventResponse};
use crate::services::types::ErrorTrackingError;

#[derive(OpenApi)]
#[openapi(
    paths(
        ingest_sentry_event,
        ingest_sentry_envelope,
    ),
    components(schemas(
        SentryEventPayload,
        SentryEventResponse,
        SentryEnvelopeResponse,
    )),
    tags(
        (name = "sentry-ingestor", description = "Sentry-compatible ingest endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub sentry_ingestion: Arc<SentryIngestionService>,
}

pub fn configure_routes() -> Router<Arc<AppState>> {
    // SDKs post from browsers on any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/{project}/store/", post(ingest_sentry_event))
        .route("/{project}/envelope/", post(ingest_sentry_envelope))
        .layer(cors)
}

/// Ingest a Sentry event (JSON payload)
#[utoipa::path(
    post,
    path = "/api/{project}/store/",
    params(
        ("project" = String, Path, description = "Project UUID or public key")
    ),
    request_body = SentryEventPayload,
    responses(
        (status = 200, description = "Event stored", body = SentryEventResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Invalid project ID or authentication"),
    ),
    tag = "sentry-ingestor"
)]
async fn ingest_sentry_event(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SentryEventResponse>, ErrorTrackingError> {
    let dsn_key = extract_dsn_key(&headers, &params);
    let project_id = state
        .sentry_ingestion
        .authenticate(&project, dsn_key.as_deref())
        .await?;

    let body = decompress_if_needed(&headers, &body)?;
    let id = state
        .sentry_ingestion
        .process_json_event(project_id, &body)
        .await?;

    Ok(Json(SentryEventResponse { id }))
}

/// Ingest a Sentry envelope (binary payload)
#[utoipa::path(
    post,
    path = "/api/{project}/envelope/",
    params(
        ("project" = String, Path, description = "Project UUID or public key")
    ),
    request_body(content = String, description = "Sentry envelope as binary data", content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Envelope ingested", body = SentryEnvelopeResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Invalid project ID or authentication"),
    ),
    tag = "sentry-ingestor"
)]
async fn ingest_sentry_envelope(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SentryEnvelopeResponse>, ErrorTrackingError> {
    let dsn_key = extract_dsn_key(&headers, &params);
    let project_id = state
        .sentry_ingestion
        .authenticate(&project, dsn_key.as_deref())
        .await?;

    let body = decompress_if_needed(&headers, &body)?;
    let id = state
        .sentry_ingestion
        .process_envelope(project_id, &body)
        .await?;

    Ok(Json(SentryEnvelopeResponse { id }))
}

/// Sentry SDKs may gzip the body and say so in `Content-Encoding`
fn decompress_if_needed(headers: &HeaderMap, body: &Bytes) -> Result<Bytes, ErrorTrackingError> {
    let is_gzip = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase().contains("gzip"))
        .unwrap_or(false);

    if !is_gzip {
        return Ok(body.clone());
    }

    let mut decoder = GzDecoder::new(&body[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).map_err(|e| {
        ErrorTrackingError::Validation(format!("Failed to decompress gzip data: {}", e))
    })?;

    debug!(
        "Decompressed request body: {} bytes -> {} bytes",
        body.len(),
        decompressed.len()
    );

    Ok(Bytes::from(decompressed))
}

/// Extract DSN key from Sentry auth headers or query parameters
fn extract_dsn_key(headers: &HeaderMap, query_params: &HashMap<String, String>) -> Option<String> {
    if let Some(key) = query_params.get("sentry_key") {
        return Some(key.clone());
    }

    // X-Sentry-Auth: Sentry sentry_key=PUBLIC_KEY,sentry_version=7,...
    if let Some(auth_str) = headers.get("x-sentry-auth").and_then(|h| h.to_str().ok()) {
        let auth_str = auth_str.strip_prefix("Sentry ").unwrap_or(auth_str);
        for part in auth_str.split(',') {
            if let Some(key) = part.trim().strip_prefix("sentry_key=") {
                return Some(key.to_string());
            }
        }
    }

    if let Some(auth_str) = headers.get("authorization").and_then(|h| h.to_str().ok()) {
        if let Some(key) = auth_str.strip_prefix("DSN ") {
            return Some(key.trim().to_string());
        }
    }

    None
}
