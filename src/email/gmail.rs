use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::message::{AttachmentBody, GmailMessage, MessagesListResponse};
use super::provider::MailProvider;
use crate::auth::session::AuthSession;

/// Gmail caps `maxResults` per page at 500
const MAX_PAGE_SIZE: u32 = 500;

/// Attachment data is base64url; Gmail usually pads it, other clients don't
const ATTACHMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Failures reported by the Gmail API itself
#[derive(Debug, thiserror::Error)]
pub enum GmailError {
    #[error("Gmail rejected the access token")]
    Unauthorized,
    #[error("Gmail API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

/// Gmail REST API v1 provider, acting as the authorized user (`me`).
pub struct GmailProvider {
    client: Client,
    api_base: String,
}

impl GmailProvider {
    pub fn new(client: Client, api_base: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Shared HTTP client with the configured timeouts
    pub fn http_client(timeout_secs: u64) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &AuthSession,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let token = session.access_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .query(params)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GmailError::Unauthorized.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GmailError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            }
            .into());
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// Pull `error.message` out of a Google API error body, falling back to the raw text
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Encode an id as exactly one URL path segment. Ids arrive from API clients,
/// so `/`, `?` and dot segments must not reshape the request path.
fn path_segment(id: &str) -> Result<String> {
    if id.is_empty() || id.chars().all(|c| c == '.') {
        bail!("Invalid id {:?}", id);
    }
    Ok(utf8_percent_encode(id, NON_ALPHANUMERIC).to_string())
}

pub fn decode_attachment_data(data: &str) -> Result<Vec<u8>> {
    ATTACHMENT_ENGINE
        .decode(data.trim())
        .context("Attachment data is not valid base64url")
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn list_message_ids(
        &self,
        session: &AuthSession,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>> {
        let url = format!("{}/users/me/messages", self.api_base);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while (ids.len() as u32) < max_results {
            let remaining = max_results - ids.len() as u32;
            let mut params = vec![
                ("q", query.to_string()),
                ("maxResults", remaining.min(MAX_PAGE_SIZE).to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: MessagesListResponse = self.get_json(session, &url, &params).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        ids.truncate(max_results as usize);
        tracing::debug!("Query {:?} matched {} messages", query, ids.len());
        Ok(ids)
    }

    async fn get_message(&self, session: &AuthSession, message_id: &str) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}",
            self.api_base,
            path_segment(message_id)?
        );
        self.get_json(session, &url, &[("format", "full".to_string())])
            .await
            .with_context(|| format!("Failed to get message {}", message_id))
    }

    async fn get_attachment(
        &self,
        session: &AuthSession,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.api_base,
            path_segment(message_id)?,
            path_segment(attachment_id)?
        );
        let body: AttachmentBody = self
            .get_json(session, &url, &[])
            .await
            .with_context(|| format!("Failed to get attachment of message {}", message_id))?;

        let data = decode_attachment_data(&body.data)?;
        if let Some(size) = body.size {
            if size != data.len() as u64 {
                tracing::debug!(
                    "Attachment of {} declared {} bytes, decoded {}",
                    message_id,
                    size,
                    data.len()
                );
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::testing::{authorized_session, spawn_stub};
    use axum::{
        extract::{Query, State},
        http::{HeaderMap, Uri},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn provider(base: &str) -> GmailProvider {
        GmailProvider::new(Client::new(), format!("{}/gmail/v1", base))
    }

    fn gmail_error(err: &anyhow::Error) -> Option<&GmailError> {
        err.chain().find_map(|cause| cause.downcast_ref::<GmailError>())
    }

    #[test]
    fn test_decode_padded_and_unpadded() {
        // "hello?>" encodes with both url-safe specials
        assert_eq!(decode_attachment_data("aGVsbG8_Pg==").unwrap(), b"hello?>");
        assert_eq!(decode_attachment_data("aGVsbG8_Pg").unwrap(), b"hello?>");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_attachment_data("not base64!").is_err());
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#;
        assert_eq!(api_error_message(body), "Requested entity was not found.");
        assert_eq!(api_error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let provider = GmailProvider::new(Client::new(), "http://localhost:9/gmail/v1/".to_string());
        assert_eq!(provider.api_base, "http://localhost:9/gmail/v1");
    }

    #[tokio::test]
    async fn test_ids_stay_inside_the_message_path() {
        let log: Log = Arc::default();
        let app = Router::new()
            .fallback(|State(log): State<Log>, uri: Uri| async move {
                log.lock().unwrap().push(uri.to_string());
                Json(json!({ "size": 2, "data": "aGk=" }))
            })
            .with_state(log.clone());
        let base = spawn_stub(app).await;
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;
        let gmail = provider(&base);

        let data = gmail
            .get_attachment(&session, "m1/../../../../../settings", "x?alt=media&")
            .await
            .unwrap();
        assert_eq!(data, b"hi");

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("/gmail/v1/users/me/messages/m1%2F"), "{}", seen[0]);
        assert!(seen[0].ends_with("/attachments/x%3Falt%3Dmedia%26"), "{}", seen[0]);
        assert!(!seen[0].contains('?'));

        // Dot segments would still be collapsed after encoding
        let err = gmail.get_message(&session, "..").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid id"));
        assert!(gmail.get_attachment(&session, "m1", ".").await.is_err());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listing_follows_page_tokens_up_to_cap() {
        let log: Log = Arc::default();
        let app = Router::new()
            .route(
                "/gmail/v1/users/me/messages",
                get(
                    |State(log): State<Log>, Query(params): Query<HashMap<String, String>>| async move {
                        let page = params.get("pageToken").cloned().unwrap_or_default();
                        log.lock().unwrap().push(format!(
                            "{}|{}|{}",
                            page,
                            params.get("maxResults").cloned().unwrap_or_default(),
                            params.get("q").cloned().unwrap_or_default()
                        ));
                        let (ids, next) = match page.as_str() {
                            "" => (["a1", "a2", "a3"], Some("p2")),
                            "p2" => (["b1", "b2", "b3"], Some("p3")),
                            _ => (["c1", "c2", "c3"], None),
                        };
                        let messages: Vec<_> = ids
                            .iter()
                            .map(|id| json!({ "id": id, "threadId": id }))
                            .collect();
                        Json(json!({
                            "messages": messages,
                            "nextPageToken": next,
                            "resultSizeEstimate": 9
                        }))
                    },
                ),
            )
            .with_state(log.clone());
        let base = spawn_stub(app).await;
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;

        let ids = provider(&base)
            .list_message_ids(&session, "from:billing", 5)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a1", "a2", "a3", "b1", "b2"]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["|5|from:billing".to_string(), "p2|2|from:billing".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let app = Router::new().fallback(|headers: HeaderMap| async move {
            let bearer = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            if bearer == "Bearer ya29.test" {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::BAD_REQUEST
            }
        });
        let base = spawn_stub(app).await;
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;

        let err = provider(&base).get_message(&session, "m1").await.unwrap_err();
        assert!(matches!(gmail_error(&err), Some(GmailError::Unauthorized)));
        assert!(crate::api::error::is_auth_failure(&err));
    }

    #[tokio::test]
    async fn test_api_error_carries_status_and_message() {
        let app = Router::new().fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "code": 404, "message": "Requested entity was not found." } })),
            )
        });
        let base = spawn_stub(app).await;
        let dir = tempfile::tempdir().unwrap();
        let session = authorized_session(dir.path()).await;

        let err = provider(&base).get_message(&session, "gone").await.unwrap_err();
        match gmail_error(&err) {
            Some(GmailError::Api { status, message }) => {
                assert_eq!(*status, 404);
                assert_eq!(message, "Requested entity was not found.");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!crate::api::error::is_auth_failure(&err));
    }
}
