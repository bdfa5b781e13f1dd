//! Release management handlers.
//!
//! Deployments are addressed by name. Every handler goes through the
//! `Ledger` and returns the `{ success, data, error }` JSON envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use pushgrid_ledger::{
    LedgerError, PromoteOverrides, ReleaseDescriptor, ReleasePatch, ReleaseUpload,
};
use pushgrid_metrics::{DeploymentMetricsSnapshot, render_prometheus};
use pushgrid_rollout::RolloutPercent;
use serde::Deserialize;
use tracing::error;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn ledger_error(e: LedgerError) -> Response {
    let status = match &e {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
        _ => {
            error!(error = %e, "ledger operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

// ── Deployments ────────────────────────────────────────────────

/// Create deployment request body.
#[derive(Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: String,
}

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> Response {
    match state.ledger.list_deployments() {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// POST /api/v1/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Response {
    match state.ledger.create_deployment(&req.name) {
        Ok(deployment) => (StatusCode::CREATED, ApiResponse::ok(deployment)).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// GET /api/v1/deployments/{name}
pub async fn get_deployment(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.ledger.deployment_by_name(&name) {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => ledger_error(e),
    }
}

// ── History ────────────────────────────────────────────────────

/// GET /api/v1/deployments/{name}/history
pub async fn get_history(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let history = state
        .ledger
        .deployment_by_name(&name)
        .and_then(|d| state.ledger.history(&d.id));
    match history {
        Ok(history) => ApiResponse::ok(history).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// DELETE /api/v1/deployments/{name}/history
pub async fn clear_history(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let deployment = match state.ledger.deployment_by_name(&name) {
        Ok(d) => d,
        Err(e) => return ledger_error(e),
    };
    match state.ledger.clear_history(&deployment.id).await {
        Ok(()) => ApiResponse::ok("cleared").into_response(),
        Err(e) => ledger_error(e),
    }
}

// ── Releases ───────────────────────────────────────────────────

/// Release metadata carried in the query string of a release upload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseQuery {
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub is_mandatory: Option<bool>,
    pub is_disabled: Option<bool>,
    /// Kept as text so leading zeros and fractions can be rejected.
    pub rollout: Option<String>,
}

/// POST /api/v1/deployments/{name}/release
///
/// The request body is the package itself: a zip archive or a single file.
pub async fn release(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<ReleaseQuery>,
    body: Bytes,
) -> Response {
    let Some(app_version) = query.app_version.filter(|v| !v.is_empty()) else {
        return error_response(
            "a release must specify the targeted appVersion",
            StatusCode::BAD_REQUEST,
        );
    };
    let rollout = match query.rollout.as_deref().map(RolloutPercent::parse).transpose() {
        Ok(rollout) => rollout,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };
    let deployment = match state.ledger.deployment_by_name(&name) {
        Ok(d) => d,
        Err(e) => return ledger_error(e),
    };
    let upload = ReleaseUpload {
        descriptor: ReleaseDescriptor {
            app_version,
            description: query.description,
            is_mandatory: query.is_mandatory.unwrap_or(false),
            is_disabled: query.is_disabled.unwrap_or(false),
            rollout: rollout.map(RolloutPercent::get),
        },
        artifact: body,
    };
    match state.ledger.release(&deployment.id, upload).await {
        Ok(release) => (StatusCode::CREATED, ApiResponse::ok(release)).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// PATCH /api/v1/deployments/{name}/release
pub async fn patch_release(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(patch): Json<ReleasePatch>,
) -> Response {
    let deployment = match state.ledger.deployment_by_name(&name) {
        Ok(d) => d,
        Err(e) => return ledger_error(e),
    };
    match state.ledger.patch_release(&deployment.id, patch).await {
        Ok(Some(release)) => ApiResponse::ok(release).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ledger_error(e),
    }
}

/// POST /api/v1/deployments/{src}/promote/{dst}
pub async fn promote(
    State(state): State<ApiState>,
    Path((src, dst)): Path<(String, String)>,
    Json(overrides): Json<PromoteOverrides>,
) -> Response {
    let deployments = state
        .ledger
        .deployment_by_name(&src)
        .and_then(|s| Ok((s, state.ledger.deployment_by_name(&dst)?)));
    let (source, destination) = match deployments {
        Ok(pair) => pair,
        Err(e) => return ledger_error(e),
    };
    match state
        .ledger
        .promote(&source.id, &destination.id, overrides)
        .await
    {
        Ok(release) => (StatusCode::CREATED, ApiResponse::ok(release)).into_response(),
        Err(e) => ledger_error(e),
    }
}

/// POST /api/v1/deployments/{name}/rollback
pub async fn rollback(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    rollback_release(&state, &name, None).await
}

/// POST /api/v1/deployments/{name}/rollback/{label}
pub async fn rollback_to(
    State(state): State<ApiState>,
    Path((name, label)): Path<(String, String)>,
) -> Response {
    rollback_release(&state, &name, Some(&label)).await
}

async fn rollback_release(state: &ApiState, name: &str, label: Option<&str>) -> Response {
    let deployment = match state.ledger.deployment_by_name(name) {
        Ok(d) => d,
        Err(e) => return ledger_error(e),
    };
    match state.ledger.rollback(&deployment.id, label).await {
        Ok(release) => (StatusCode::CREATED, ApiResponse::ok(release)).into_response(),
        Err(e) => ledger_error(e),
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /api/v1/deployments/{name}/metrics
pub async fn get_metrics(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.ledger.deployment_by_name(&name) {
        Ok(deployment) => {
            let metrics = state.ledger.metrics().deployment_metrics(&deployment.key).await;
            ApiResponse::ok(metrics).into_response()
        }
        Err(e) => ledger_error(e),
    }
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let deployments = state.ledger.list_deployments().unwrap_or_default();
    let mut snapshots = Vec::with_capacity(deployments.len());
    for d in deployments {
        let labels = state.ledger.metrics().deployment_metrics(&d.key).await;
        snapshots.push(DeploymentMetricsSnapshot {
            deployment: d.name,
            labels,
        });
    }

    let body = render_prometheus(&snapshots);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pushgrid_ledger::Ledger;
    use pushgrid_metrics::{MemoryCounterStore, MetricsManager};
    use pushgrid_state::{MemoryBlobStore, StateStore};

    use super::*;

    fn test_state() -> ApiState {
        let ledger = Ledger::new(
            StateStore::open_in_memory().unwrap(),
            Arc::new(MemoryBlobStore::new()),
            MetricsManager::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(60)),
        );
        ApiState::new(ledger)
    }

    fn release_query(app_version: &str) -> Query<ReleaseQuery> {
        Query(ReleaseQuery {
            app_version: Some(app_version.to_string()),
            ..Default::default()
        })
    }

    async fn create(state: &ApiState, name: &str) {
        let resp = create_deployment(
            State(state.clone()),
            Json(CreateDeploymentRequest {
                name: name.to_string(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn list_deployments_empty() {
        let resp = list_deployments(State(test_state())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_get_deployment() {
        let state = test_state();
        create(&state, "Staging").await;

        let resp = get_deployment(State(state.clone()), Path("Staging".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = create_deployment(
            State(state),
            Json(CreateDeploymentRequest {
                name: "Staging".to_string(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_nonexistent_deployment() {
        let resp = get_deployment(State(test_state()), Path("nope".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn release_requires_app_version() {
        let state = test_state();
        create(&state, "Staging").await;
        let resp = release(
            State(state),
            Path("Staging".to_string()),
            Query(ReleaseQuery::default()),
            Bytes::from_static(b"bundle"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn release_rollout_must_be_a_plain_percentage() {
        let state = test_state();
        create(&state, "Staging").await;
        for bad in ["0", "050", "101", "12.5", "-5", ""] {
            let resp = release(
                State(state.clone()),
                Path("Staging".to_string()),
                Query(ReleaseQuery {
                    app_version: Some("1.0.0".to_string()),
                    rollout: Some(bad.to_string()),
                    ..Default::default()
                }),
                Bytes::from_static(b"bundle"),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "rollout {bad:?}");
        }

        let resp = release(
            State(state.clone()),
            Path("Staging".to_string()),
            Query(ReleaseQuery {
                app_version: Some("1.0.0".to_string()),
                rollout: Some("100".to_string()),
                ..Default::default()
            }),
            Bytes::from_static(b"bundle"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let deployment = state.ledger.deployment_by_name("Staging").unwrap();
        assert_eq!(state.ledger.history(&deployment.id).unwrap()[0].rollout, None);
    }

    #[tokio::test]
    async fn duplicate_release_conflicts() {
        let state = test_state();
        create(&state, "Staging").await;
        let resp = release(
            State(state.clone()),
            Path("Staging".to_string()),
            release_query("1.0.0"),
            Bytes::from_static(b"bundle"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = release(
            State(state),
            Path("Staging".to_string()),
            release_query("1.0.0"),
            Bytes::from_static(b"bundle"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn patch_without_changes_is_no_content() {
        let state = test_state();
        create(&state, "Staging").await;
        release(
            State(state.clone()),
            Path("Staging".to_string()),
            release_query("1.0.0"),
            Bytes::from_static(b"bundle"),
        )
        .await;

        let resp = patch_release(
            State(state.clone()),
            Path("Staging".to_string()),
            Json(ReleasePatch {
                is_mandatory: Some(false),
                ..Default::default()
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = patch_release(
            State(state),
            Path("Staging".to_string()),
            Json(ReleasePatch {
                is_mandatory: Some(true),
                ..Default::default()
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rollback_without_prior_release_is_not_found() {
        let state = test_state();
        create(&state, "Staging").await;
        let resp = rollback(State(state), Path("Staging".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn promote_between_deployments() {
        let state = test_state();
        create(&state, "Staging").await;
        create(&state, "Production").await;
        release(
            State(state.clone()),
            Path("Staging".to_string()),
            release_query("1.0.0"),
            Bytes::from_static(b"bundle"),
        )
        .await;

        let resp = promote(
            State(state.clone()),
            Path(("Staging".to_string(), "Production".to_string())),
            Json(PromoteOverrides::default()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = promote(
            State(state),
            Path(("Staging".to_string(), "Missing".to_string())),
            Json(PromoteOverrides::default()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_lists_deployment_counters() {
        let state = test_state();
        create(&state, "Staging").await;
        let deployment = state.ledger.deployment_by_name("Staging").unwrap();
        state
            .ledger
            .metrics()
            .record_download(&deployment.key, "v1")
            .await;

        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(
            "pushgrid_release_downloaded{deployment=\"Staging\",label=\"v1\"} 1"
        ));
    }
}
