//! Request-path errors and their JSON envelopes.
//!
//! Webhook and operator endpoints answer `{code: 1, message, ...}`, the
//! shape the hub and the dashboard both expect. The schema-validated
//! telemetry endpoints answer `{status: "error", message, errors}` instead;
//! handlers opt into that envelope by returning `StructuredError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::error;

use crate::commands::CommandError;
use crate::store::StoreError;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    /// The IoT Hub refused the command or could not be reached.
    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        details: Value,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// A 400 with a flat message and no field detail.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream { status, .. } => *status,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal failures are logged here and never
    /// echoed back.
    fn public_message(&self) -> String {
        match self {
            Self::Storage(e) => {
                error!("Storage failure: {e}");
                "Internal server error".to_string()
            }
            Self::Internal(e) => {
                error!("Internal failure: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = Map::new();
        body.insert("code".into(), json!(1));
        body.insert("message".into(), json!(self.public_message()));
        match self {
            Self::Validation { errors, .. } if !errors.is_empty() => {
                body.insert("errors".into(), json!(errors));
            }
            Self::Upstream { details, .. } => {
                body.insert("details".into(), details);
            }
            _ => {}
        }
        (status, Json(Value::Object(body))).into_response()
    }
}

/// `ApiError` rendered in the `{status: "error"}` envelope.
#[derive(Debug)]
pub struct StructuredError(pub ApiError);

impl From<ApiError> for StructuredError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for StructuredError {
    fn from(err: StoreError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for StructuredError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let message = self.0.public_message();
        let errors = match self.0 {
            ApiError::Validation { errors, .. } => errors,
            _ => Vec::new(),
        };
        (
            status,
            Json(json!({
                "status": "error",
                "message": message,
                "errors": errors,
            })),
        )
            .into_response()
    }
}
