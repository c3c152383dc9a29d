use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

use crate::api::auth::require_auth;
use crate::api::error::ApiError;
use crate::email::filename::sanitize_filename;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub message_id: String,
    pub attachment_id: String,
    #[serde(default)]
    pub filename: String,
}

/// POST /api/download-attachment: streams one attachment back to the browser
pub async fn download_attachment(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_auth(&state).await?;
    let Json(request) = payload?;

    if request.message_id.is_empty() || request.attachment_id.is_empty() {
        return Err(ApiError::BadRequest(
            "messageId and attachmentId are required".to_string(),
        ));
    }

    let data = state
        .provider
        .get_attachment(&state.session, &request.message_id, &request.attachment_id)
        .await
        .map_err(|e| ApiError::from_operation("Download failed", e))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition(&request.filename))
        .header(header::CONTENT_LENGTH, data.len().to_string())
        .body(Body::from(data))
        .map_err(|e| ApiError::InternalError(e.to_string()))
}

/// `attachment; filename="<ascii>"; filename*=UTF-8''<encoded>` built from the sanitized name.
/// Sanitizing removes quotes and control characters, so the quoted form cannot be broken out of.
pub fn content_disposition(filename: &str) -> HeaderValue {
    let safe = sanitize_filename(filename);
    let ascii: String = safe
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let encoded = utf8_percent_encode(&safe, NON_ALPHANUMERIC);

    let value = if ascii == safe {
        format!("attachment; filename=\"{}\"", ascii)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            ascii, encoded
        )
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
