//! HTTP server assembly.
//!
//! Wires storage, the notification sender, and the two pipelines into the
//! shared API state, builds the router, and serves it.

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{self, ApiState};
use crate::build_worker::BuildPipeline;
use crate::checks::{CheckRunner, StubCheckRunner};
use crate::config::ServiceConfig;
use crate::eval_worker::EvalPipeline;
use crate::github::GithubClient;
use crate::llm::QualityReviewer;
use crate::notify::NotifySender;
use crate::storage::Storage;

/// Request bodies above this size are rejected outright.
const MAX_BODY_BYTES: usize = 1_048_576;

/// Build the shared API state from storage and service configuration.
///
/// The GitHub token is read from the instructor configuration at startup;
/// without one every GitHub interaction runs its deterministic stub.
pub fn create_state(storage: Arc<Storage>, config: &ServiceConfig) -> Arc<ApiState> {
    let notifier =
        NotifySender::with_policy(config.notify.max_attempts, config.notify.initial_backoff());
    let github_token = storage
        .instructor_config()
        .ok()
        .flatten()
        .and_then(|c| c.github_token);
    let github = GithubClient::new(github_token);
    let reviewer = QualityReviewer::new(config.llm.clone());
    let runner: Arc<dyn CheckRunner> = Arc::new(StubCheckRunner);

    let build = BuildPipeline::new(storage.clone(), github.clone(), notifier.clone());
    let eval = EvalPipeline::new(storage.clone(), github, reviewer, runner);

    Arc::new(ApiState {
        storage,
        notifier,
        build,
        eval,
    })
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        // Student-system webhooks
        .route("/api/build", post(api::receive_build_request))
        .route("/api/evaluate", post(api::receive_evaluate_request))
        // Instructor dashboard
        .route("/api/submissions", get(api::list_submissions))
        .route("/api/evaluations", get(api::list_evaluations))
        .route(
            "/api/templates",
            post(api::create_template).get(api::list_templates),
        )
        .route("/api/templates/:id", delete(api::deactivate_template))
        .route("/api/templates/:id/dispatch", post(api::dispatch_template))
        .route(
            "/api/config",
            get(api::get_instructor_config).put(api::update_instructor_config),
        )
        .route("/api/logs", get(api::list_logs))
        .route("/health", get(api::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn run_server(state: Arc<ApiState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Classforge server listening on {}", addr);
    info!("  POST /api/build      - student build requests");
    info!("  POST /api/evaluate   - deployment notifications");
    info!("  GET  /api/submissions, /api/evaluations, /api/logs");
    info!("  CRUD /api/templates, /api/config");

    axum::serve(listener, app).await?;
    Ok(())
}
