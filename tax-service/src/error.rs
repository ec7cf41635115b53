//! Error taxonomy for tax estimation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use uuid::Uuid;

use crate::dtos::ApiResponse;
use crate::models::TaxTableKind;

#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No active {kind} tax table effective on {as_of}")]
    TableNotFound { kind: TaxTableKind, as_of: NaiveDate },

    #[error("Import case {0} not found")]
    CaseNotFound(Uuid),

    #[error("Tax estimation {0} not found")]
    EstimationNotFound(Uuid),

    #[error("Tax estimation {0} is already final")]
    AlreadyFinal(Uuid),

    #[error("Tax estimation {0} is final and cannot be modified")]
    Finalized(Uuid),

    #[error("Invalid tax table: {0}")]
    InvalidTable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Persistence round trip timed out")]
    Timeout,
}

impl EstimationError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::TableNotFound { .. } => "table_not_found",
            Self::CaseNotFound(_) => "case_not_found",
            Self::EstimationNotFound(_) => "estimation_not_found",
            Self::AlreadyFinal(_) => "already_final",
            Self::Finalized(_) => "finalized",
            Self::InvalidTable(_) => "invalid_table",
            Self::Persistence(_) => "persistence_error",
            Self::Timeout => "timeout",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidTable(_) => StatusCode::BAD_REQUEST,
            Self::TableNotFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::CaseNotFound(_) | Self::EstimationNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyFinal(_) | Self::Finalized(_) => StatusCode::CONFLICT,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<validator::ValidationErrors> for EstimationError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<axum::extract::rejection::JsonRejection> for EstimationError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        Self::Validation(err.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for EstimationError {
    fn from(err: axum::extract::rejection::PathRejection) -> Self {
        Self::Validation(err.body_text())
    }
}

impl From<sqlx::Error> for EstimationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl IntoResponse for EstimationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (status, Json(ApiResponse::<()>::failure(self.to_string()))).into_response()
    }
}
