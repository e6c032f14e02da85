use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::models::{ChargeStatus, InvalidStateTransition};

/// Service-level error taxonomy.
///
/// Caller mistakes and legitimate races (`ChargeNotFound`, `IllegalState`,
/// `OperationAlreadyInProgress`, `Conflict`, refund errors) propagate to the
/// boundary as typed failures and are never retried automatically. Gateway
/// communication failures are not represented here: post-operation records
/// them as a charge status so the charge always ends in a queryable state.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("charge {0} not found")]
    ChargeNotFound(String),

    #[error("refund {0} not found")]
    RefundNotFound(String),

    #[error("charge {external_id} in status {status} is not eligible for this operation")]
    IllegalState {
        external_id: String,
        status: ChargeStatus,
    },

    #[error("operation already in progress for charge {0}")]
    OperationAlreadyInProgress(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient refund amount available: requested {requested}, available {available}")]
    InsufficientRefundAmount { requested: i64, available: i64 },

    #[error("charge {external_id} not available for refund: {availability}")]
    RefundUnavailable {
        external_id: String,
        availability: String,
    },

    #[error(transparent)]
    InvalidStateTransition(#[from] InvalidStateTransition),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("operation executor queue is full")]
    ExecutorQueueFull,

    #[error("database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ChargeNotFound(_) | ServiceError::RefundNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::IllegalState { .. }
            | ServiceError::InsufficientRefundAmount { .. }
            | ServiceError::RefundUnavailable { .. }
            | ServiceError::InvalidStateTransition(_)
            | ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::OperationAlreadyInProgress(_) | ServiceError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ServiceError::ExecutorQueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Do not leak database or internal detail past the boundary.
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.public_message(),
            "timestamp": Utc::now().to_rfc3339(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_client_status_codes() {
        assert_eq!(
            ServiceError::ChargeNotFound("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::OperationAlreadyInProgress("abc".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Conflict("stale version".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientRefundAmount {
                requested: 300,
                available: 100
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ExecutorQueueFull.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.public_message(), "internal server error");
    }
}
