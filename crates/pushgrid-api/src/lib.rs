//! pushgrid-api: REST API for pushgrid.
//!
//! Serves the client-facing update protocol at the root and the release
//! management surface under `/api/v1`. Management routes carry no
//! authentication of their own and are meant to sit behind one.
//!
//! # Client routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/updateCheck` | Resolve an update check |
//! | POST | `/reportStatus/deploy` | Record an install outcome |
//! | POST | `/reportStatus/download` | Record a package download |
//! | GET | `/blobs/{id}` | Download a stored package or diff |
//! | GET | `/health` | Storage and counter store health |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! # Management routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/deployments` | List deployments |
//! | POST | `/api/v1/deployments` | Create a deployment |
//! | GET | `/api/v1/deployments/{name}` | Get a deployment |
//! | GET | `/api/v1/deployments/{name}/history` | Release history |
//! | DELETE | `/api/v1/deployments/{name}/history` | Clear release history |
//! | POST | `/api/v1/deployments/{name}/release` | Release an uploaded package |
//! | PATCH | `/api/v1/deployments/{name}/release` | Patch release metadata |
//! | POST | `/api/v1/deployments/{src}/promote/{dst}` | Promote a release |
//! | POST | `/api/v1/deployments/{name}/rollback[/{label}]` | Roll back |
//! | GET | `/api/v1/deployments/{name}/metrics` | Per-label counters |

pub mod acquisition;
pub mod handlers;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use pushgrid_ledger::Ledger;
use pushgrid_state::FsBlobStore;
use pushgrid_update::UpdateEngine;

/// Largest package accepted by the release route.
pub const MAX_PACKAGE_BYTES: usize = 200 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub ledger: Ledger,
    pub engine: UpdateEngine,
    /// Local blob store to serve `/blobs/{id}` from, when blobs live on disk.
    pub downloads: Option<FsBlobStore>,
}

impl ApiState {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            engine: UpdateEngine::new(ledger.store().clone()),
            ledger,
            downloads: None,
        }
    }

    pub fn with_downloads(mut self, downloads: FsBlobStore) -> Self {
        self.downloads = Some(downloads);
        self
    }
}

/// Build the complete router (client protocol + management + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/deployments",
            get(handlers::list_deployments).post(handlers::create_deployment),
        )
        .route("/deployments/{name}", get(handlers::get_deployment))
        .route(
            "/deployments/{name}/history",
            get(handlers::get_history).delete(handlers::clear_history),
        )
        .route(
            "/deployments/{name}/release",
            post(handlers::release)
                .patch(handlers::patch_release)
                .layer(DefaultBodyLimit::max(MAX_PACKAGE_BYTES)),
        )
        .route("/deployments/{src}/promote/{dst}", post(handlers::promote))
        .route("/deployments/{name}/rollback", post(handlers::rollback))
        .route(
            "/deployments/{name}/rollback/{label}",
            post(handlers::rollback_to),
        )
        .route("/deployments/{name}/metrics", get(handlers::get_metrics))
        .with_state(state.clone());

    Router::new()
        .route("/updateCheck", get(acquisition::update_check))
        .route("/reportStatus/deploy", post(acquisition::report_deploy))
        .route("/reportStatus/download", post(acquisition::report_download))
        .route("/blobs/{id}", get(acquisition::download_blob))
        .route("/health", get(acquisition::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
