//! Chat messages and the ordered message log for one conversation context.
//!
//! Position in the log is identity: messages carry no id, and timestamps are display-only
//! (they may collide). The serialized form is what the memory endpoint and local cache store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Starter message for a context with no stored history.
pub const GREETING: &str = "👋 **Hello — I'm your Health Assistant.**\nHow can I help today?";

/// Notice appended when the backend rejects the bearer token.
pub const UNAUTHORIZED_NOTICE: &str = "Unauthorized — please login to use AI features.";

/// Reply text used when the endpoint answered but nothing usable was in the payload.
pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, no response.";

/// Optimistic user message for an attachment upload.
pub const ATTACHMENT_SENT: &str = "📷 Sent an image";

pub const UPLOAD_FAILED_NOTICE: &str = "⚠️ Image upload failed. Try again.";

pub const UPLOAD_ACK_NOTICE: &str = "✅ Image uploaded (no AI reply).";

/// Notice for a transport-level failure (unreachable, timeout, reset).
pub fn network_error_notice(reason: &str) -> String {
    format!("⚠️ Sorry — I couldn't reach the server right now. ({})", reason)
}

/// Notice for a non-success status that is not an authorization failure.
pub fn server_error_notice(code: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("⚠️ Server error: {}", code)
    } else {
        format!("⚠️ Server error: {}\n{}", code, body)
    }
}

/// Opaque identity that scopes one conversation (a family member name, or "Self").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext(String);

impl ConversationContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationContext {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConversationContext {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who authored a message. Serialized as "user" / "ai" to match stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai")]
    Assistant,
}

/// A single chat entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    /// Display-only; ordering is by position in the log.
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Reference to a local preview of an uploaded attachment (e.g. a file path or URI).
    #[serde(rename = "attachment", default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }

    /// User message that references an attachment preview.
    pub fn user_attachment(text: impl Into<String>, attachment_ref: impl Into<String>) -> Self {
        Self {
            attachment_ref: Some(attachment_ref.into()),
            ..Self::user(text)
        }
    }

    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
            attachment_ref: None,
        }
    }
}

/// Ordered message sequence for one context. Append order is the sole source of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-element log (greeting, unauthorized notice).
    pub fn single(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }

    pub fn greeting() -> Self {
        Self::single(Message::assistant(GREETING))
    }

    pub fn unauthorized() -> Self {
        Self::single(Message::assistant(UNAUTHORIZED_NOTICE))
    }

    /// Append a message; returns its position.
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Append every message of `other`, preserving its order.
    pub fn extend(&mut self, other: MessageLog) {
        self.messages.extend(other.messages);
    }

    /// Point deletion by position. Later messages shift down by one.
    pub fn remove(&mut self, index: usize) -> Option<Message> {
        if index < self.messages.len() {
            Some(self.messages.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Messages whose text contains `query` (case-insensitive), in log order.
    /// An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<&Message> {
        let needle = query.trim().to_lowercase();
        self.messages
            .iter()
            .filter(|m| needle.is_empty() || m.text.to_lowercase().contains(&needle))
            .collect()
    }

    /// Plain-text transcript: "You:" / "Assistant:" prefixes, markdown emphasis stripped,
    /// a blank line between messages.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let who = match m.sender {
                    Sender::User => "You",
                    Sender::Assistant => "Assistant",
                };
                format!("{}: {}", who, m.text.replace('*', ""))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl From<Vec<Message>> for MessageLog {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
