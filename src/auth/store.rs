use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Contents of the token file. Same layout Google's client libraries read
/// with `fromJSON`, so the file stays interchangeable with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedUser {
    #[serde(rename = "type")]
    pub kind: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl AuthorizedUser {
    pub fn new(secrets: &ClientSecrets, refresh_token: String) -> Self {
        Self {
            kind: "authorized_user".to_string(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            refresh_token,
        }
    }
}

/// Client identity from the console-downloaded credentials file
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// The credentials file nests the identity under `installed` (desktop apps) or `web`
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

pub fn parse_client_secrets(json: &[u8]) -> Result<ClientSecrets> {
    let file: ClientSecretsFile =
        serde_json::from_slice(json).context("Failed to parse credentials file")?;
    file.installed
        .or(file.web)
        .context("Credentials file has neither an 'installed' nor a 'web' section")
}

pub async fn load_client_secrets(path: &Path) -> Result<ClientSecrets> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
    parse_client_secrets(&content)
}

/// Load the saved token. A missing file is `Ok(None)`.
pub async fn load_authorized_user(path: &Path) -> Result<Option<AuthorizedUser>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read token file {}", path.display()))
        }
    };

    let user = serde_json::from_slice(&content)
        .with_context(|| format!("Malformed token file {}", path.display()))?;
    Ok(Some(user))
}

pub async fn save_authorized_user(path: &Path, user: &AuthorizedUser) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec(user).context("Failed to serialize token")?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("Failed to write token file {}", path.display()))?;
    tracing::info!("Saved authorization to {}", path.display());
    Ok(())
}

/// Delete the token file. A missing file is not an error.
pub async fn remove_authorized_user(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove token file {}", path.display())),
    }
}
