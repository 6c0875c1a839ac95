use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use shared::error::ReconcileError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request rejected by the reconciliation model
    #[error("{0}")]
    Rejected(ReconcileError),

    /// Body could not be decoded into the request type
    #[error("{}", .0.body_text())]
    InvalidBody(JsonRejection),

    #[error("service {0} not found")]
    NotFound(String),

    /// The external scanner could not produce a report
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Internal(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection)
    }
}

impl From<ReconcileError> for ApiError {
    fn from(error: ReconcileError) -> Self {
        ApiError::Rejected(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidBody(rejection) => rejection.status(),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Discovery(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(e) => {
                tracing::error!("Request failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorResponse {
            field: match &self {
                ApiError::Rejected(e) => e.field().map(str::to_string),
                _ => None,
            },
            message: match &self {
                ApiError::Internal(_) => "internal error".to_string(),
                other => other.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}
