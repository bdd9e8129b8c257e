//! Remote endpoints consumed by the chat core, and their HTTP implementation.
//!
//! The traits are the boundary the session controller and synchronizer depend on; tests
//! substitute in-memory fakes. [`HttpBackend`] talks to the family-health backend:
//! `POST /api/ai`, `GET|POST /api/ai/memory`, `POST /api/ai/attachments`.

use crate::config::ApiConfig;
use crate::error::TransportError;
use crate::message::{ConversationContext, MessageLog};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Conversational endpoint: one message in, one raw reply body out.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Returns the raw body of a successful response; see `reply::extract_reply`.
    async fn post(
        &self,
        context: &ConversationContext,
        text: &str,
    ) -> Result<String, TransportError>;
}

/// Canonical (remote) tier of conversation memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// `Ok(None)` when the backend has no stored messages for the context.
    async fn get(
        &self,
        context: &ConversationContext,
    ) -> Result<Option<MessageLog>, TransportError>;

    async fn put(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), TransportError>;
}

/// A file selected for upload. `preview_ref` is local (no network) and is what the
/// optimistic user message points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub preview_ref: String,
}

/// Attachment endpoint: uploads a binary, optionally answered with a reply.
#[async_trait]
pub trait AttachmentEndpoint: Send + Sync {
    async fn upload(
        &self,
        context: &ConversationContext,
        attachment: &Attachment,
    ) -> Result<Option<String>, TransportError>;
}

/// HTTP client for the backend. Sends `Authorization: Bearer` when a token is configured.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    member: &'a str,
}

#[derive(Debug, Serialize)]
struct MemoryWrite<'a> {
    member: &'a str,
    messages: &'a MessageLog,
}

#[derive(Debug, Deserialize)]
struct MemoryResponse {
    #[serde(default)]
    messages: Option<MessageLog>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    reply: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    /// Build from the `api` config section; `token` is the already-resolved bearer token.
    pub fn from_config(api: &ApiConfig, token: Option<String>) -> Result<Self, TransportError> {
        Self::new(
            Some(api.base_url.clone()),
            token,
            Duration::from_secs(api.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }
}

/// Classify the status and read the body of a response.
async fn read_success(res: reqwest::Response) -> Result<String, TransportError> {
    let status = res.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            code: status.as_u16(),
            body,
        });
    }
    Ok(res.text().await?)
}

#[async_trait]
impl ChatEndpoint for HttpBackend {
    /// POST /api/ai with `{ message, member }`.
    async fn post(
        &self,
        context: &ConversationContext,
        text: &str,
    ) -> Result<String, TransportError> {
        let url = format!("{}/api/ai", self.base_url);
        let body = ChatRequest {
            message: text,
            member: context.as_str(),
        };
        let res = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await?;
        read_success(res).await
    }
}

#[async_trait]
impl MemoryStore for HttpBackend {
    /// GET /api/ai/memory?member=X.
    async fn get(
        &self,
        context: &ConversationContext,
    ) -> Result<Option<MessageLog>, TransportError> {
        let url = format!("{}/api/ai/memory", self.base_url);
        let res = self
            .authorized(self.client.get(&url).query(&[("member", context.as_str())]))
            .send()
            .await?;
        let body = read_success(res).await?;
        let data: MemoryResponse = match serde_json::from_str(&body) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("memory: unreadable record for {}: {}", context, e);
                return Ok(None);
            }
        };
        Ok(data.messages.filter(|m| !m.is_empty()))
    }

    /// POST /api/ai/memory with `{ member, messages }`.
    async fn put(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), TransportError> {
        let url = format!("{}/api/ai/memory", self.base_url);
        let body = MemoryWrite {
            member: context.as_str(),
            messages: log,
        };
        let res = self
            .authorized(self.client.post(&url).json(&body))
            .send()
            .await?;
        read_success(res).await.map(|_| ())
    }
}

#[async_trait]
impl AttachmentEndpoint for HttpBackend {
    /// POST /api/ai/attachments (multipart: `file`, `member`).
    async fn upload(
        &self,
        context: &ConversationContext,
        attachment: &Attachment,
    ) -> Result<Option<String>, TransportError> {
        let url = format!("{}/api/ai/attachments", self.base_url);
        let part = reqwest::multipart::Part::bytes(attachment.bytes.clone())
            .file_name(attachment.file_name.clone());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("member", context.to_string());
        let res = self
            .authorized(self.client.post(&url).multipart(form))
            .send()
            .await?;
        let body = read_success(res).await?;
        Ok(serde_json::from_str::<UploadResponse>(&body)
            .ok()
            .and_then(|r| r.reply)
            .filter(|r| !r.trim().is_empty()))
    }
}
