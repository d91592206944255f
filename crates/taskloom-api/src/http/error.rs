//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use taskloom_core::queue::EnqueueError;
use taskloom_core::registry::RegistryError;
use taskloom_core::schema::SchemaError;
use taskloom_types::error::StoreError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Enqueue rejected or failed.
    Enqueue(EnqueueError),
    /// Job store failure.
    Store(StoreError),
    /// Resource missing.
    NotFound(String),
    /// Access policy denied the request.
    Unauthorized(String),
    /// Malformed request parameters.
    Validation(String),
}

impl From<EnqueueError> for AppError {
    fn from(e: EnqueueError) -> Self {
        AppError::Enqueue(e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, Option<Value>) {
        match self {
            AppError::Enqueue(EnqueueError::Definition(e @ RegistryError::UnknownDefinition { .. })) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_DEFINITION", e.to_string(), None)
            }
            AppError::Enqueue(EnqueueError::Definition(e)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "DEFINITION_ERROR", e.to_string(), None)
            }
            AppError::Enqueue(EnqueueError::Schema(e)) => {
                let SchemaError::SchemaValidation { errors, .. } = e;
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "SCHEMA_VALIDATION_ERROR",
                    e.to_string(),
                    Some(json!(errors)),
                )
            }
            AppError::Enqueue(EnqueueError::Store(e)) | AppError::Store(e) => match e {
                StoreError::NotFound => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", "Job not found".to_string(), None)
                }
                StoreError::Unavailable(msg) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", msg.clone(), None)
                }
                e => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string(), None),
            },
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None)
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();

        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
                "details": details,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
