use anyhow::{bail, Context, Result};
use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

use super::store::{AuthorizedUser, ClientSecrets, GOOGLE_TOKEN_URI};
use super::AuthError;

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

const CALLBACK_PATH: &str = "/oauth2callback";
const FLOW_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// A bearer token and the instant it stops being accepted
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Usable for at least another `margin`
    pub fn is_fresh(&self, margin: Duration) -> bool {
        self.expires_at - margin > Utc::now()
    }
}

/// Result of a completed interactive authorization
#[derive(Debug)]
pub struct Grant {
    pub refresh_token: String,
    pub access: AccessToken,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Installed-app OAuth2 against Google's endpoints: loopback redirect with PKCE,
/// and refresh-token exchange.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    refresh_endpoint: String,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            refresh_endpoint: GOOGLE_TOKEN_URI.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.refresh_endpoint = endpoint.into();
        self
    }

    /// Run the browser consent flow and exchange the resulting code.
    pub async fn authorize_interactive(&self, secrets: &ClientSecrets) -> Result<Grant> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind OAuth callback listener")?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH);

        let verifier = generate_code_verifier();
        let state = random_token(16);
        let auth_url = build_auth_url(secrets, &redirect_uri, &state, &code_challenge(&verifier))?;

        let (code_tx, code_rx) = oneshot::channel();
        let callback = CallbackState {
            expected_state: state,
            code_tx: Arc::new(Mutex::new(Some(code_tx))),
        };
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(callback);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tracing::info!("Waiting for authorization on {}", redirect_uri);
        println!("Open this URL in your browser to authorize access:\n\n  {}\n", auth_url);

        let outcome = tokio::time::timeout(FLOW_TIMEOUT, code_rx).await;
        let _ = stop_tx.send(());
        if let Err(e) = server.await {
            tracing::warn!("OAuth callback server task failed: {}", e);
        }

        let code = match outcome {
            Err(_) => return Err(AuthError::Flow("timed out waiting for consent".into()).into()),
            Ok(Err(_)) => return Err(AuthError::Flow("callback channel closed".into()).into()),
            Ok(Ok(Err(reason))) => return Err(AuthError::Flow(reason).into()),
            Ok(Ok(Ok(code))) => code,
        };

        let params = [
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];

        tracing::info!("Exchanging authorization code for tokens");
        let response = self.post_token_form(&secrets.token_uri, &params).await?;
        let access = access_token_from(&response)?;
        let refresh_token = response.refresh_token.context(
            "Token response carried no refresh_token; revoke the app's access and authorize again",
        )?;

        Ok(Grant {
            refresh_token,
            access,
        })
    }

    /// Exchange the saved refresh token for a new access token.
    /// An `invalid_grant` answer becomes [`AuthError::Revoked`].
    pub async fn refresh(&self, user: &AuthorizedUser) -> Result<AccessToken> {
        let params = [
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", user.refresh_token.as_str()),
        ];

        let response = self.post_token_form(&self.refresh_endpoint, &params).await?;
        if response.error.as_deref() == Some("invalid_grant") {
            return Err(AuthError::Revoked.into());
        }
        access_token_from(&response)
    }

    async fn post_token_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenEndpointResponse> {
        let response = self
            .http
            .post(endpoint)
            .form(params)
            .send()
            .await
            .context("Token request failed")?;

        // Errors come back as JSON bodies with a 4xx status, parse either way
        response
            .json::<TokenEndpointResponse>()
            .await
            .context("Failed to parse token response")
    }
}

fn access_token_from(response: &TokenEndpointResponse) -> Result<AccessToken> {
    if let Some(err) = &response.error {
        let desc = response.error_description.as_deref().unwrap_or("no description");
        bail!("Token endpoint returned {}: {}", err, desc);
    }
    let secret = response
        .access_token
        .clone()
        .context("No access_token in token response")?;
    let expires_in = response.expires_in.unwrap_or(3600);

    Ok(AccessToken {
        secret,
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}

fn build_auth_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<url::Url> {
    url::Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", GMAIL_READONLY_SCOPE),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .context("Invalid auth_uri in credentials file")
}

// ── PKCE helpers ────────────────────────────────────────────────────────────

fn random_token(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_code_verifier() -> String {
    random_token(32)
}

fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// ── Loopback callback ───────────────────────────────────────────────────────

type CodeSender = oneshot::Sender<Result<String, String>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    code_tx: Arc<Mutex<Option<CodeSender>>>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn handle_callback(
    State(callback): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    if params.state.as_deref() != Some(callback.expected_state.as_str()) {
        tracing::warn!("Ignoring OAuth callback with unexpected state");
        return Html("<html><body><h2>Invalid request</h2></body></html>");
    }

    let outcome = match (params.code, params.error) {
        (_, Some(err)) => Err(params.error_description.unwrap_or(err)),
        (Some(code), None) => Ok(code),
        (None, None) => Err("callback carried neither code nor error".to_string()),
    };
    let succeeded = outcome.is_ok();

    if let Some(tx) = callback.code_tx.lock().await.take() {
        let _ = tx.send(outcome);
    }

    if succeeded {
        Html("<html><body><h2>Authorization complete</h2><p>You can close this window.</p></body></html>")
    } else {
        Html("<html><body><h2>Authorization failed</h2><p>You can close this window.</p></body></html>")
    }
}
