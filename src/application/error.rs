use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::application::store::StoreError;
use crate::domain::path::PathError;
use crate::infra::error::InfraError;

/// Diagnostic detail for a failed response, attached to response extensions
/// so the logging middleware can emit the full source chain without leaking
/// it to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::InvalidArgument { .. }) => StatusCode::BAD_REQUEST,
            AppError::Store(StoreError::Path(PathError::Empty)) => StatusCode::BAD_REQUEST,
            AppError::Store(StoreError::Path(_)) => StatusCode::FORBIDDEN,
            AppError::Store(StoreError::Configuration { .. })
            | AppError::Infra(InfraError::Configuration { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Store(StoreError::Io(_)) | AppError::Infra(InfraError::Io(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Store(StoreError::Persistence(_))
            | AppError::Infra(InfraError::Database { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(InfraError::Telemetry(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn presentation_message(&self) -> &'static str {
        match self {
            AppError::NotFound => "Resource not found",
            AppError::Store(StoreError::InvalidArgument { .. }) => {
                "Request could not be processed"
            }
            AppError::Store(StoreError::Path(PathError::Empty)) => "Content path is required",
            AppError::Store(StoreError::Path(_)) => "Content path is not allowed",
            AppError::Store(StoreError::Configuration { .. })
            | AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Store(StoreError::Io(_)) | AppError::Infra(InfraError::Io(_)) => {
                "I/O failure during request"
            }
            AppError::Store(StoreError::Persistence(_))
            | AppError::Infra(InfraError::Database { .. }) => "Service temporarily unavailable",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Unexpected(_) => "Unexpected server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_expected_statuses() {
        let invalid = AppError::from(StoreError::invalid_argument("data is required"));
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let escape = AppError::from(StoreError::Path(PathError::EscapesRoot {
            path: "/etc/passwd".to_string(),
        }));
        assert_eq!(escape.status_code(), StatusCode::FORBIDDEN);

        let unavailable = AppError::from(StoreError::from_persistence("pool exhausted"));
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn report_walks_the_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = AppError::from(StoreError::Io(io));
        let report =
            ErrorReport::from_error("application::error::tests", err.status_code(), &err);
        assert!(report.messages.len() >= 2, "chain: {:?}", report.messages);
        assert!(report.messages.iter().any(|m| m.contains("denied")));
    }
}
