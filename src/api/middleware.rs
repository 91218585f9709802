use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Fatal for the whole invocation: raised before any extraction happens.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Data lake error: {0}")]
    DataLake(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invocation cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code used in error responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Extraction(_) => "EXTRACTION_ERROR",
            AppError::DataLake(_) => "DATA_LAKE_ERROR",
            AppError::Execution(_) => "EXECUTION_ERROR",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error_detail) = match self {
            AppError::Configuration(msg) => {
                let detail = ErrorDetail::new(code, msg.clone());
                // Point the caller at the settings they can fix
                let detail = if msg.contains("manifest URL") {
                    detail.with_details(
                        "ManifestURL must end in cdm.json or model.json. Pass it as a header, query parameter or setting.",
                    )
                } else {
                    detail
                };
                (StatusCode::BAD_REQUEST, detail)
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, ErrorDetail::new(code, msg)),
            AppError::Extraction(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new(code, msg),
            ),
            AppError::DataLake(msg) => (StatusCode::BAD_GATEWAY, ErrorDetail::new(code, msg)),
            AppError::Execution(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new(code, msg),
            ),
            AppError::Cancelled(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new(code, msg),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorDetail::new(code, msg)),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new(code, msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Extraction(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::DataLake(err.to_string())
    }
}
