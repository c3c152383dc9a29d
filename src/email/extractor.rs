use chrono::{DateTime, Utc};

use super::filename;
use super::message::{AttachmentDescriptor, GmailMessage, Message, MessagePart};

const DEFAULT_SUBJECT: &str = "No Subject";
const DEFAULT_SENDER: &str = "Unknown Sender";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Collect every attachment in the part tree, depth-first pre-order.
///
/// A qualifying part is emitted and its children are still visited.
pub fn extract_attachments(root: &MessagePart) -> Vec<AttachmentDescriptor> {
    let mut found = Vec::new();
    collect(root, &mut found);
    found
}

fn collect(part: &MessagePart, found: &mut Vec<AttachmentDescriptor>) {
    if let Some(descriptor) = descriptor_for(part) {
        found.push(descriptor);
    }
    for child in &part.parts {
        collect(child, found);
    }
}

/// A part is an attachment iff it has a non-empty filename and a body with a non-empty attachmentId
fn descriptor_for(part: &MessagePart) -> Option<AttachmentDescriptor> {
    let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
    let body = part.body.as_ref()?;
    let attachment_id = body.attachment_id.as_deref().filter(|id| !id.is_empty())?;

    Some(AttachmentDescriptor {
        filename: filename.to_string(),
        attachment_id: attachment_id.to_string(),
        mime_type: part
            .mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        size: body.size.unwrap_or(0),
    })
}

/// Build the search-result view of a message, defaulting missing headers
pub fn summarize(message: &GmailMessage) -> Message {
    summarize_at(message, Utc::now())
}

/// Like [`summarize`], with `now` used when the message has no usable date
pub fn summarize_at(message: &GmailMessage, now: DateTime<Utc>) -> Message {
    let payload = message.payload.as_ref();
    let header = |name: &str| payload.and_then(|p| p.header(name));

    let date = header("Date")
        .and_then(parse_date_header)
        .or_else(|| internal_date(message))
        .unwrap_or(now);

    Message {
        id: message.id.clone(),
        subject: header("Subject").unwrap_or(DEFAULT_SUBJECT).to_string(),
        sender: header("From").unwrap_or(DEFAULT_SENDER).to_string(),
        date,
        date_string: filename::date_key(&date),
        attachments: payload.map(extract_attachments).unwrap_or_default(),
    }
}

/// Parse a `Date:` header. Accepts RFC 2822 (with a trailing `(UTC)`-style
/// comment) and RFC 3339.
pub fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let without_comment = match value.rfind('(') {
        Some(idx) if value.ends_with(')') => value[..idx].trim_end(),
        _ => value,
    };

    DateTime::parse_from_rfc2822(without_comment)
        .or_else(|_| DateTime::parse_from_rfc3339(without_comment))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn internal_date(message: &GmailMessage) -> Option<DateTime<Utc>> {
    let millis = message.internal_date.as_deref()?.parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}
