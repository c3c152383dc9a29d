use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::auth::session::AuthSession;
use crate::email::extractor;
use crate::email::message::Message;
use crate::email::provider::MailProvider;

/// Query used when the caller supplies none
pub const DEFAULT_QUERY: &str = "has:attachment";

/// Messages with attachments out of everything the query matched
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub emails: Vec<Message>,
    pub total_found: usize,
}

impl SearchOutcome {
    pub fn with_attachments(&self) -> usize {
        self.emails.len()
    }
}

/// Orchestrates a search: list ids → fetch details concurrently → extract attachments → filter.
pub struct SearchPipeline {
    provider: Arc<dyn MailProvider>,
    max_results: u32,
    concurrency: usize,
}

impl SearchPipeline {
    pub fn new(provider: Arc<dyn MailProvider>, max_results: u32, concurrency: usize) -> Self {
        Self {
            provider,
            max_results,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// Run `query` and keep the messages that carry attachments, in the provider's order.
    ///
    /// A failed detail fetch drops that message; only a failed listing fails the search.
    pub async fn search(&self, session: &AuthSession, query: &str) -> Result<SearchOutcome> {
        let query = effective_query(query);
        tracing::info!("Searching for emails with query: {:?}", query);

        let ids = self
            .provider
            .list_message_ids(session, query, self.max_results)
            .await
            .context("Failed to list messages")?;
        tracing::info!("Found {} matching emails", ids.len());

        // buffered() keeps at most `concurrency` fetches in flight and yields in input order
        let emails: Vec<Message> = stream::iter(ids.iter().cloned())
            .map(|id| async move { self.message_with_attachments(session, &id).await })
            .buffered(self.concurrency)
            .collect::<Vec<Option<Message>>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        tracing::info!("{} emails have attachments", emails.len());

        Ok(SearchOutcome {
            emails,
            total_found: ids.len(),
        })
    }

    async fn message_with_attachments(&self, session: &AuthSession, id: &str) -> Option<Message> {
        match self.provider.get_message(session, id).await {
            Ok(raw) => {
                let message = extractor::summarize(&raw);
                if message.attachments.is_empty() {
                    None
                } else {
                    Some(message)
                }
            }
            Err(e) => {
                tracing::warn!("Error getting email details for {}: {:#}", id, e);
                None
            }
        }
    }
}

/// Blank queries fall back to [`DEFAULT_QUERY`]; anything else passes through verbatim
pub fn effective_query(query: &str) -> &str {
    if query.trim().is_empty() {
        DEFAULT_QUERY
    } else {
        query
    }
}
