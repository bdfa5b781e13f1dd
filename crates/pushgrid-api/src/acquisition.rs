//! Client-facing routes: update checks, status reports, downloads, health.

use axum::Json;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use pushgrid_metrics::{DeployReport, DownloadReport};
use pushgrid_state::BlobError;
use pushgrid_update::{UpdateCheckRequest, UpdateError, UpdateResolution};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::ApiState;
use crate::handlers::error_response;

/// Query parameters of `GET /updateCheck`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckQuery {
    pub deployment_key: Option<String>,
    pub app_version: Option<String>,
    pub package_hash: Option<String>,
    pub label: Option<String>,
    pub is_companion: Option<String>,
    pub client_unique_id: Option<String>,
}

impl From<UpdateCheckQuery> for UpdateCheckRequest {
    fn from(query: UpdateCheckQuery) -> Self {
        Self {
            deployment_key: query.deployment_key.unwrap_or_default(),
            app_version: query.app_version.unwrap_or_default(),
            package_hash: query.package_hash,
            label: query.label,
            is_companion: query
                .is_companion
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            client_unique_id: query.client_unique_id,
        }
    }
}

/// Cache key for an update check: the path and query minus the client id,
/// which only matters after the cached resolution is read.
pub fn cache_url(uri: &Uri) -> String {
    let query = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some("clientUniqueId"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", uri.path(), query)
}

fn update_error(e: UpdateError) -> Response {
    let status = match &e {
        UpdateError::NotFound(_) => StatusCode::NOT_FOUND,
        UpdateError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        UpdateError::State(_) => {
            error!(error = %e, "update check failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

// ── Update check ───────────────────────────────────────────────

/// GET /updateCheck
pub async fn update_check(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<UpdateCheckQuery>,
) -> Response {
    let request = UpdateCheckRequest::from(query);
    let validated = match request.validate() {
        Ok(v) => v,
        Err(e) => return update_error(e),
    };

    let metrics = state.ledger.metrics();
    let url = cache_url(&uri);
    let cached = metrics
        .cached_response(&validated.deployment_key, &url)
        .await
        .and_then(|body| serde_json::from_str::<UpdateResolution>(&body).ok());

    let resolution = match cached {
        Some(resolution) => {
            debug!(%url, "update check served from cache");
            resolution
        }
        None => {
            // Read before resolving so an invalidation in between refuses the write.
            let generation = metrics.cache_generation(&validated.deployment_key).await;
            let resolution = match state.engine.check(&validated) {
                Ok(r) => r,
                Err(e) => return update_error(e),
            };
            if let Some(generation) = generation {
                match serde_json::to_string(&resolution) {
                    Ok(body) => {
                        metrics
                            .cache_response(&validated.deployment_key, &url, body, generation)
                            .await
                    }
                    Err(e) => warn!(error = %e, "failed to serialize update check for caching"),
                }
            }
            resolution
        }
    };

    let decision = resolution.choose(request.client_unique_id());
    Json(serde_json::json!({ "updateInfo": decision.to_response() })).into_response()
}

// ── Status reports ─────────────────────────────────────────────

/// POST /reportStatus/deploy
pub async fn report_deploy(
    State(state): State<ApiState>,
    Json(report): Json<DeployReport>,
) -> Response {
    match report.validate() {
        Ok(status) => {
            state
                .ledger
                .metrics()
                .record_deploy_report(&report, status)
                .await;
            (StatusCode::OK, "OK").into_response()
        }
        Err(msg) => error_response(&msg, StatusCode::BAD_REQUEST),
    }
}

/// POST /reportStatus/download
pub async fn report_download(
    State(state): State<ApiState>,
    Json(report): Json<DownloadReport>,
) -> Response {
    match report.validate() {
        Ok(()) => {
            state
                .ledger
                .metrics()
                .record_download(&report.deployment_key, &report.label)
                .await;
            (StatusCode::OK, "OK").into_response()
        }
        Err(msg) => error_response(&msg, StatusCode::BAD_REQUEST),
    }
}

// ── Blobs ──────────────────────────────────────────────────────

/// GET /blobs/{id}
pub async fn download_blob(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let Some(downloads) = &state.downloads else {
        return error_response("blob not found", StatusCode::NOT_FOUND);
    };
    match downloads.read(&id).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(BlobError::NotFound(_)) => error_response("blob not found", StatusCode::NOT_FOUND),
        Err(BlobError::InvalidId(_)) => error_response("invalid blob id", StatusCode::BAD_REQUEST),
        Err(e) => {
            error!(error = %e, blob = %id, "blob read failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Response {
    if let Err(e) = state.ledger.list_deployments() {
        error!(error = %e, "storage health check failed");
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    if let Err(e) = state.ledger.metrics().health().await {
        error!(error = %e, "counter store health check failed");
        return error_response(&e, StatusCode::INTERNAL_SERVER_ERROR);
    }
    (StatusCode::OK, "Healthy").into_response()
}
