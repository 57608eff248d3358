use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Json, Router,
    routing::{get, post},
};

use super::dto::{
    HashRequest, HashResponse, HealthResponse, ValidationRequest, ValidationResponse,
};
use super::response::ApiError;
use crate::hash::LocalHasher;
use crate::staleness;

pub const WORKER_NAME: &str = "lingosync-compute";

pub struct AppState {
    /// Upper bound on values or translations accepted in one request.
    pub max_batch: usize,
}

impl Default for AppState {
    fn default() -> Self {
        Self { max_batch: 200_000 }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        worker: WORKER_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn hash(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HashRequest>,
) -> Result<Json<HashResponse>, ApiError> {
    if request.values.len() > state.max_batch {
        return Err(ApiError::too_large(format!(
            "{} values exceeds batch limit of {}",
            request.values.len(),
            state.max_batch
        )));
    }
    Ok(Json(HashResponse {
        hashes: LocalHasher.hash_all(&request.values),
    }))
}

async fn validate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidationRequest>,
) -> Result<Json<ValidationResponse>, ApiError> {
    if request.translations.len() > state.max_batch {
        return Err(ApiError::too_large(format!(
            "{} translations exceeds batch limit of {}",
            request.translations.len(),
            state.max_batch
        )));
    }
    if let Some(t) = request.translations.iter().find(|t| t.id.is_empty()) {
        return Err(ApiError::bad_request(format!(
            "translation for key '{}' has no id",
            t.key
        )));
    }
    Ok(Json(ValidationResponse {
        results: staleness::validate(&request.translations, &request.source_hashes),
    }))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/hash", post(hash))
        .route("/validate", post(validate))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
