use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::message::{GmailMessage, Header, MessagePart, MessagePartBody};
use super::provider::MailProvider;
use crate::auth::session::AuthSession;

/// In-memory mailbox for tests. Records calls and peak concurrency.
#[derive(Default)]
pub struct MockProvider {
    pub ids: Vec<String>,
    pub messages: HashMap<String, GmailMessage>,
    pub attachments: HashMap<(String, String), Vec<u8>>,
    pub failing: HashSet<String>,
    pub fail_listing: bool,
    pub delay: Option<Duration>,
    pub last_query: Mutex<Option<String>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message dated 2024-03-05 with the given attachments as `(filename, attachment_id, content)`
    pub fn with_message(mut self, id: &str, attachments: &[(&str, &str, &str)]) -> Self {
        let parts = attachments
            .iter()
            .map(|(filename, attachment_id, data)| {
                self.attachments.insert(
                    (id.to_string(), attachment_id.to_string()),
                    data.as_bytes().to_vec(),
                );
                MessagePart {
                    mime_type: Some("application/pdf".to_string()),
                    filename: Some(filename.to_string()),
                    body: Some(MessagePartBody {
                        attachment_id: Some(attachment_id.to_string()),
                        size: Some(data.len() as u64),
                        data: None,
                    }),
                    ..Default::default()
                }
            })
            .collect();

        let payload = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            headers: vec![
                Header {
                    name: "Subject".to_string(),
                    value: format!("Message {}", id),
                },
                Header {
                    name: "From".to_string(),
                    value: "billing@example.com".to_string(),
                },
                Header {
                    name: "Date".to_string(),
                    value: "Tue, 5 Mar 2024 10:00:00 +0000".to_string(),
                },
            ],
            parts,
            ..Default::default()
        };

        self.ids.push(id.to_string());
        self.messages.insert(
            id.to_string(),
            GmailMessage {
                id: id.to_string(),
                payload: Some(payload),
                ..Default::default()
            },
        );
        self
    }

    /// List `id` but fail when its detail is fetched
    pub fn with_failing(mut self, id: &str) -> Self {
        self.ids.push(id.to_string());
        self.failing.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for MockProvider {
    async fn list_message_ids(
        &self,
        _session: &AuthSession,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.to_string());
        if self.fail_listing {
            bail!("listing failed");
        }
        Ok(self.ids.iter().take(max_results as usize).cloned().collect())
    }

    async fn get_message(&self, _session: &AuthSession, message_id: &str) -> Result<GmailMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.failing.contains(message_id) {
            Err(anyhow::anyhow!("detail fetch failed for {}", message_id))
        } else {
            self.messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no message {}", message_id))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get_attachment(
        &self,
        _session: &AuthSession,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self
            .attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
        {
            Some(data) => Ok(data.clone()),
            None => bail!("no attachment {} on {}", attachment_id, message_id),
        }
    }
}
