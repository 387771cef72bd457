//! HTTP error mapping
//!
//! Converts domain errors into OSB-compliant JSON error bodies carrying
//! `error` and `description`, with the status codes the protocol expects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use sm_core::{ConflictKind, SmError};
use tracing::{error, warn};

/// OSB error body.
#[derive(Debug, Serialize)]
pub struct OsbErrorBody {
    pub error: String,
    pub description: String,
}

pub struct ApiError(pub SmError);

impl From<SmError> for ApiError {
    fn from(err: SmError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            SmError::Broker { .. } => (StatusCode::BAD_GATEWAY, "BrokerError"),
            SmError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            SmError::Conflict { kind, .. } => match kind {
                ConflictKind::AsyncOperationInProgress => {
                    (StatusCode::CONFLICT, "AsyncOperationInProgress")
                }
                ConflictKind::CatalogUsesReservedPlanName => {
                    (StatusCode::BAD_REQUEST, "CatalogUsesReservedPlanName")
                }
                ConflictKind::PlanMustBeBindable => {
                    (StatusCode::BAD_REQUEST, "PlanMustBeBindable")
                }
            },
            SmError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            SmError::Concurrency(_) => (StatusCode::CONFLICT, "ConcurrentResourceModification"),
            SmError::InvalidStateTransition { .. }
            | SmError::Internal(_)
            | SmError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, "request rejected");
        }
        let body = OsbErrorBody {
            error: kind.to_string(),
            description: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
