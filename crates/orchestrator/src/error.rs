//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga engine error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        // the input did not carry what the first step needs
        SagaError::PayloadBuild { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, err.to_string()),
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::GlobalId;
    use saga::Version;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(ApiError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::BadRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::WorkflowNotFound("w".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                SagaError::ConcurrencyConflict {
                    id: GlobalId::new(),
                    expected: Version::new(1),
                    actual: Version::new(2),
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::payload_build("create_order", "missing amount").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::Persistence("down".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
