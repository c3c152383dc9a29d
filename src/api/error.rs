use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthError;
use crate::email::gmail::GmailError;

/// Errors surfaced by the HTTP API as `{success: false, error}`
#[derive(Debug, Clone)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    InternalError(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized(m) => m,
            ApiError::BadRequest(m) => m,
            ApiError::NotFound(m) => m,
            ApiError::InternalError(m) => m,
        }
    }

    pub fn not_authenticated() -> Self {
        ApiError::Unauthorized("Not authenticated".to_string())
    }

    /// Map a failure to 401 when it came from authorization, otherwise 500 with `prefix`
    pub fn from_operation(prefix: &str, err: anyhow::Error) -> Self {
        if is_auth_failure(&err) {
            ApiError::Unauthorized(err.to_string())
        } else {
            ApiError::InternalError(format!("{}: {:#}", prefix, err))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self.message());
        }
        let body = json!({ "success": false, "error": self.message() });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::from_operation("Internal server error", err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

/// True if any error in the chain says the user must (re)authorize
pub fn is_auth_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<AuthError>().is_some()
            || matches!(cause.downcast_ref::<GmailError>(), Some(GmailError::Unauthorized))
    })
}
