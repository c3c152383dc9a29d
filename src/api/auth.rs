use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::AppState;

/// GET /api/auth-status
pub async fn auth_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "authenticated": state.session.is_authenticated().await }))
}

/// POST /api/auth: reuses the saved token or runs the browser consent flow
pub async fn authenticate(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.session.authorize().await.map_err(|e| {
        tracing::error!(
            "Authentication error: {:#} (credentials file: {})",
            e,
            state.config.gmail.credentials_path.display()
        );
        ApiError::InternalError(format!("Authentication failed: {:#}", e))
    })?;

    Ok(Json(json!({
        "success": true,
        "message": "Authentication successful"
    })))
}

/// Reject the request with 401 unless a credential is available
pub async fn require_auth(state: &AppState) -> Result<(), ApiError> {
    if state.session.is_authenticated().await {
        Ok(())
    } else {
        Err(ApiError::not_authenticated())
    }
}
