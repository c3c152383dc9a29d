use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::auth::require_auth;
use crate::api::error::ApiError;
use crate::email::message::Message;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub emails: Vec<Message>,
    pub total_found: usize,
    pub with_attachments: usize,
}

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    require_auth(&state).await?;
    let Json(request) = payload?;

    let outcome = state
        .search
        .search(&state.session, &request.query)
        .await
        .map_err(|e| ApiError::from_operation("Search failed", e))?;

    Ok(Json(SearchResponse {
        success: true,
        with_attachments: outcome.with_attachments(),
        total_found: outcome.total_found,
        emails: outcome.emails,
    }))
}
