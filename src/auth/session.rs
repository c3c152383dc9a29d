use anyhow::{Context, Result};
use chrono::Duration;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::oauth::{AccessToken, OAuthClient};
use super::store::{self, AuthorizedUser};
use super::AuthError;

/// Refresh when less than this much validity is left
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct Authorized {
    user: AuthorizedUser,
    access: Option<AccessToken>,
}

/// The process-wide authorization handle.
///
/// Empty until a token file is found or the interactive flow completes, then
/// cached for the life of the process. Re-authorization replaces it wholesale;
/// [`AuthSession::clear`] drops it. The lock is never held across a network call.
pub struct AuthSession {
    token_path: PathBuf,
    credentials_path: PathBuf,
    oauth: OAuthClient,
    state: RwLock<Option<Authorized>>,
}

impl AuthSession {
    pub fn new(token_path: PathBuf, credentials_path: PathBuf, oauth: OAuthClient) -> Self {
        Self {
            token_path,
            credentials_path,
            oauth,
            state: RwLock::new(None),
        }
    }

    /// True if a credential is cached or can be loaded from the token file
    pub async fn is_authenticated(&self) -> bool {
        if self.state.read().await.is_some() {
            return true;
        }
        self.load_saved().await.is_some()
    }

    /// Reuse the saved authorization, or run the interactive flow and persist its result
    pub async fn authorize(&self) -> Result<()> {
        if self.is_authenticated().await {
            tracing::info!("Using saved authorization from {}", self.token_path.display());
            return Ok(());
        }

        let secrets = store::load_client_secrets(&self.credentials_path).await?;
        let grant = self.oauth.authorize_interactive(&secrets).await?;
        let user = AuthorizedUser::new(&secrets, grant.refresh_token);

        store::save_authorized_user(&self.token_path, &user).await?;
        self.install(user, Some(grant.access)).await;
        tracing::info!("Authorization complete");
        Ok(())
    }

    /// Replace the cached handle
    pub async fn install(&self, user: AuthorizedUser, access: Option<AccessToken>) {
        *self.state.write().await = Some(Authorized { user, access });
    }

    /// Drop the cached handle. The token file is left in place.
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }

    /// A bearer token for the Gmail API, refreshed when close to expiry
    pub async fn access_token(&self) -> Result<String> {
        let margin = Duration::seconds(EXPIRY_MARGIN_SECS);

        let cached = {
            let guard = self.state.read().await;
            guard
                .as_ref()
                .map(|auth| (auth.user.clone(), auth.access.clone()))
        };
        let user = match cached {
            Some((_, Some(access))) if access.is_fresh(margin) => return Ok(access.secret),
            Some((user, _)) => user,
            None => self
                .load_saved()
                .await
                .ok_or(AuthError::NotAuthenticated)?,
        };

        let access = match self.oauth.refresh(&user).await {
            Ok(access) => access,
            Err(e) => {
                if matches!(e.downcast_ref::<AuthError>(), Some(AuthError::Revoked)) {
                    tracing::warn!("Refresh token rejected, discarding saved authorization");
                    self.clear().await;
                    if let Err(err) = store::remove_authorized_user(&self.token_path).await {
                        tracing::warn!("Failed to remove token file: {:#}", err);
                    }
                }
                return Err(e).context("Failed to refresh access token");
            }
        };
        let secret = access.secret.clone();

        let mut guard = self.state.write().await;
        if let Some(auth) = guard.as_mut() {
            // Skip the write if the handle was replaced while refreshing
            if auth.user.refresh_token == user.refresh_token {
                auth.access = Some(access);
            }
        }
        Ok(secret)
    }

    async fn load_saved(&self) -> Option<AuthorizedUser> {
        match store::load_authorized_user(&self.token_path).await {
            Ok(Some(user)) => {
                let mut guard = self.state.write().await;
                // Another request may have authorized in the meantime
                let auth = guard.get_or_insert_with(|| Authorized {
                    user,
                    access: None,
                });
                Some(auth.user.clone())
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Ignoring unreadable token file: {:#}", e);
                None
            }
        }
    }
}
