//! Execution inspection endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::GlobalId;
use serde::Serialize;

use super::sagas::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct ExecutionResponse {
    pub global_id: String,
    pub workflow: String,
    pub status: String,
    pub version: i64,
    pub state: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// GET /executions/{id}: the stored state of one saga run.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionResponse>, ApiError> {
    let global_id: GlobalId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid execution id: {e}")))?;

    let execution = state
        .coordinator
        .get_execution(global_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Execution not found: {global_id}")))?;

    let snapshot = execution.snapshot();
    Ok(Json(ExecutionResponse {
        global_id: snapshot.id.to_string(),
        workflow: snapshot.workflow,
        status: snapshot.status.to_string(),
        version: snapshot.version.as_i64(),
        state: snapshot.state,
        created_at: snapshot.created_at,
        updated_at: snapshot.updated_at,
    }))
}
