//! Saga orchestrator process.
//!
//! Exposes an HTTP API to start sagas and inspect executions, and wires the
//! workflow registry, coordinator and consume loop together.

pub mod config;
pub mod error;
pub mod routes;
pub mod workflows;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    ExecutionRepository, InMemoryBroker, InMemoryExecutionRepository, Publisher, SagaCoordinator,
    WorkflowRegistry,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::sagas::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas/{workflow}", post(routes::sagas::start))
        .route("/executions/{id}", get(routes::executions::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds handler state over the given repository and transport.
pub fn create_state(
    registry: Arc<WorkflowRegistry>,
    repository: Arc<dyn ExecutionRepository>,
    publisher: Arc<dyn Publisher>,
) -> Arc<AppState> {
    let coordinator = Arc::new(SagaCoordinator::new(repository, publisher));
    Arc::new(AppState {
        registry,
        coordinator,
    })
}

/// In-memory state: the built-in workflows, an in-memory repository, and
/// the broker requests are published to.
pub fn create_default_state() -> saga::Result<(Arc<AppState>, InMemoryBroker)> {
    let registry = Arc::new(workflows::registry()?);
    let broker = InMemoryBroker::new();
    let state = create_state(
        registry,
        Arc::new(InMemoryExecutionRepository::new()),
        Arc::new(broker.clone()),
    );
    Ok((state, broker))
}
