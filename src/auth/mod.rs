pub mod oauth;
pub mod session;
pub mod store;

/// Authorization failures. The HTTP layer maps all of these to 401.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Authorization was revoked or has expired, sign in again")]
    Revoked,
    #[error("Authorization flow failed: {0}")]
    Flow(String),
}
