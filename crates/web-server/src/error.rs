use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use calculations::RegistryError;
use compiler::CompileError;
use database::DbError;
use reporting::{ExecutionError, ReportError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{message}")]
    Conflict { message: String, names: Vec<String> },
    #[error("{0}")]
    BadRequest(String),
    /// A store write failed and the matching registry change could not be undone.
    #[error("{message}")]
    Inconsistent { message: String, names: Vec<String> },
}

impl From<CompileError> for AppError {
    fn from(e: CompileError) -> Self {
        AppError::Report(ReportError::Compile(e))
    }
}

fn registry_status(e: &RegistryError) -> StatusCode {
    match e {
        RegistryError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::UnknownCalculation(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyExists(_)
        | RegistryError::Conflict { .. }
        | RegistryError::Cycle(_) => StatusCode::CONFLICT,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Registry(e) => registry_status(e),
            AppError::Report(ReportError::Compile(e)) => match e {
                CompileError::Registry(e) => registry_status(e),
                CompileError::LevelMismatch { .. } => StatusCode::CONFLICT,
                CompileError::InvalidRequest { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            },
            AppError::Report(ReportError::Execution(ExecutionError::DeadlineExceeded { .. })) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::Report(ReportError::Execution(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(DbError::NotFound) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Inconsistent { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn names(&self) -> Vec<String> {
        match self {
            AppError::Registry(e) => e.names(),
            AppError::Report(e) => e.names(),
            AppError::Conflict { names, .. } | AppError::Inconsistent { names, .. } => {
                names.clone()
            }
            _ => Vec::new(),
        }
    }
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            tracing::error!(error = ?self, "Request failed.");
            match &self {
                AppError::Database(_) => "An internal database error occurred".to_string(),
                _ => self.to_string(),
            }
        } else {
            self.to_string()
        };

        let body = Json(json!({ "error": error_message, "names": self.names() }));
        (status, body).into_response()
    }
}
