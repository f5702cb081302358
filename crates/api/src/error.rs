//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_store::StoreError;
use serde_json::json;
use workflow::WorkflowError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// The request conflicts with a running pipeline.
    #[error("{0}")]
    Conflict(String),

    /// A pipeline ended in an error.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The order store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::Workflow(err) => workflow_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
        };

        (status, Json(body)).into_response()
    }
}

fn workflow_error_to_response(err: WorkflowError) -> (StatusCode, serde_json::Value) {
    match err {
        WorkflowError::Rejected { order_id, reason } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": "rejected",
                "order_id": order_id,
                "reason": reason.to_string(),
                "detail": reason,
            }),
        ),
        WorkflowError::RetriesExhausted {
            order_id,
            step,
            attempts,
            last_cause,
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "error": "retries_exhausted",
                "order_id": order_id,
                "step": step,
                "attempts": attempts,
                "last_cause": last_cause,
            }),
        ),
        WorkflowError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, json!({ "error": err.to_string() }))
        }
        WorkflowError::AlreadyRunning(_) | WorkflowError::Cancelled(_) => (
            StatusCode::CONFLICT,
            json!({ "error": err.kind(), "message": err.to_string() }),
        ),
        WorkflowError::Store(err) => store_error_to_response(err),
        WorkflowError::IntegrityViolation { .. } | WorkflowError::Join(_) => {
            tracing::error!(error = %err, "pipeline failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": err.kind(), "message": err.to_string() }),
            )
        }
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        StoreError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        _ if err.is_conflict() => StatusCode::CONFLICT,
        _ => {
            tracing::error!(error = %err, "store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, json!({ "error": err.to_string() }))
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use domain::{RejectionReason, Step};

    use super::*;

    #[test]
    fn rejection_maps_to_unprocessable_entity() {
        let response = ApiError::from(WorkflowError::Rejected {
            order_id: OrderId::new(),
            reason: RejectionReason::NoItems,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn exhaustion_maps_to_service_unavailable() {
        let response = ApiError::from(WorkflowError::RetriesExhausted {
            order_id: OrderId::new(),
            step: Step::Ship,
            attempts: 3,
            last_cause: "Forced failure for testing".to_string(),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn store_errors_map_by_kind() {
        let id = OrderId::new();
        let missing = ApiError::from(StoreError::OrderNotFound(id)).into_response();
        let conflict = ApiError::from(StoreError::PaymentAlreadyCharged(id)).into_response();
        let corrupt = ApiError::from(StoreError::Corrupt("bad".into())).into_response();

        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(corrupt.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn running_pipeline_is_a_conflict() {
        let response =
            ApiError::from(WorkflowError::AlreadyRunning(OrderId::new())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
