use anyhow::Result;
use async_trait::async_trait;

use super::message::GmailMessage;
use crate::auth::session::AuthSession;

/// Read-only access to a hosted mailbox.
/// Every call takes the session that authorizes it.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Ids of messages matching `query`, in the provider's order, at most `max_results`.
    async fn list_message_ids(
        &self,
        session: &AuthSession,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>>;

    /// Full message including its part tree.
    async fn get_message(&self, session: &AuthSession, message_id: &str) -> Result<GmailMessage>;

    /// Decoded bytes of one attachment of `message_id`.
    async fn get_attachment(
        &self,
        session: &AuthSession,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>>;
}
