//! Saga start endpoint and shared handler state.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use saga::{ExecutionRepository, Publisher, SagaCoordinator, WorkflowRegistry};
use serde::Serialize;

use crate::error::ApiError;

/// Coordinator over whichever repository and transport the process runs with.
pub type Coordinator = SagaCoordinator<Arc<dyn ExecutionRepository>, Arc<dyn Publisher>>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub registry: Arc<WorkflowRegistry>,
    pub coordinator: Arc<Coordinator>,
}

#[derive(Serialize)]
pub struct SagaStartedResponse {
    pub global_id: String,
    pub workflow: String,
}

/// POST /sagas/{workflow}: start a saga with the JSON body as its input.
#[tracing::instrument(skip(state, input))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(workflow): Path<String>,
    Json(input): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError> {
    if !input.is_object() {
        return Err(ApiError::BadRequest(
            "saga input must be a JSON object".to_string(),
        ));
    }

    let definition = state
        .registry
        .get(&workflow)
        .ok_or_else(|| ApiError::NotFound(format!("Workflow not found: {workflow}")))?;

    let global_id = state.coordinator.start(definition, &input).await?;
    metrics::counter!("http_sagas_started_total").increment(1);
    tracing::info!(%global_id, %workflow, "saga started via API");

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaStartedResponse {
            global_id: global_id.to_string(),
            workflow,
        }),
    ))
}
