//! API error handling.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

/// API error type that converts to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }

    /// Create a 503 Service Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "SERVICE_UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<crate::error::DirError> for ApiError {
    fn from(err: crate::error::DirError) -> Self {
        use crate::error::DirError;
        match err {
            DirError::PackageNotFound(name) => {
                ApiError::bad_request(format!("Package '{}' not found", name))
            }
            DirError::NameCollision { new, existing } => ApiError::bad_request(format!(
                "Package name '{}' collides with existing package '{}'",
                new, existing
            )),
            DirError::InvalidSignature => {
                ApiError::bad_request("Update signature verification failed")
            }
            DirError::InvalidDocPath(p) => ApiError::bad_request(format!("Invalid doc path: {}", p)),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

/// An error page for the HTML surface: same taxonomy, browser-friendly body.
pub fn html_error(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><head><title>nimpkgdir</title></head><body><h1>{}</h1><p>{}</p></body></html>",
        status.as_u16(),
        crate::ansi::html_escape(message)
    );
    (status, Html(body)).into_response()
}
