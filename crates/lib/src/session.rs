//! Session controller: owns the message log of the active context and the single
//! in-flight request, appends optimistically, and applies settlements as they arrive.
//!
//! Asynchronous work (load, chat request, upload) runs on spawned tasks that report back
//! over a channel. The host drains that channel with [`SessionController::next_update`],
//! so the log is only ever mutated on the host's task. Each settlement is tagged with the
//! activation it belongs to and dropped if the context changed in the meantime.

use crate::api::{Attachment, AttachmentEndpoint, ChatEndpoint, HttpBackend};
use crate::config::ChatConfig;
use crate::error::TransportError;
use crate::message::{self, ConversationContext, Message, MessageLog};
use crate::request::{Outcome, RequestLifecycle, RequestTicket};
use crate::sync::{LoadSource, Persistence, SyncHandle};
use crate::viewport::{ViewportHost, ViewportState, ViewportTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Remote endpoints used by a session.
#[derive(Clone)]
pub struct Endpoints {
    pub chat: Arc<dyn ChatEndpoint>,
    pub attachments: Arc<dyn AttachmentEndpoint>,
}

impl Endpoints {
    pub fn http(backend: HttpBackend) -> Self {
        let backend = Arc::new(backend);
        Self {
            chat: backend.clone(),
            attachments: backend,
        }
    }
}

/// Tunables handed in by the host; there is no global state.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub debounce: Duration,
    pub scroll_threshold: f32,
    pub initial_context: ConversationContext,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ChatSettings {
    fn from(c: &ChatConfig) -> Self {
        Self {
            debounce: Duration::from_millis(c.debounce_ms),
            scroll_threshold: c.scroll_threshold_px,
            initial_context: ConversationContext::new(c.default_context.clone()),
        }
    }
}

/// Result of an attachment upload, as applied to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Replied(String),
    Acknowledged,
    Unauthorized,
    Failed(String),
    Cancelled,
}

impl UploadOutcome {
    pub fn classify(result: Result<Option<String>, TransportError>) -> Self {
        match result {
            Ok(Some(reply)) => UploadOutcome::Replied(reply),
            Ok(None) => UploadOutcome::Acknowledged,
            Err(TransportError::Unauthorized) => UploadOutcome::Unauthorized,
            Err(e) => UploadOutcome::Failed(e.to_string()),
        }
    }

    fn to_message(&self) -> Option<Message> {
        let text = match self {
            UploadOutcome::Replied(reply) => reply.as_str(),
            UploadOutcome::Acknowledged => message::UPLOAD_ACK_NOTICE,
            UploadOutcome::Unauthorized => message::UNAUTHORIZED_NOTICE,
            UploadOutcome::Failed(_) => message::UPLOAD_FAILED_NOTICE,
            UploadOutcome::Cancelled => return None,
        };
        Some(Message::assistant(text))
    }
}

/// What applying one settlement did, for the host to re-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The log was populated from persistence.
    Loaded(LoadSource),
    /// One message was appended at this position.
    Appended(usize),
    /// A stale, superseded, or cancelled settlement was dropped; the log is unchanged.
    Discarded,
}

/// Completion of a spawned operation, delivered back to the controller.
#[derive(Debug)]
pub(crate) enum Settlement {
    Loaded {
        activation: u64,
        log: MessageLog,
        source: LoadSource,
    },
    Replied {
        activation: u64,
        ticket: RequestTicket,
        outcome: Outcome,
    },
    Uploaded {
        activation: u64,
        upload: u64,
        outcome: UploadOutcome,
    },
}

struct UploadSlot {
    id: u64,
    token: CancellationToken,
}

pub struct SessionController {
    context: ConversationContext,
    activation: u64,
    loading: bool,
    unauthorized: bool,
    log: MessageLog,
    compose: String,
    attachment: Option<Attachment>,
    upload: Option<UploadSlot>,
    upload_seq: u64,
    last_error: Option<String>,
    requests: RequestLifecycle,
    endpoints: Endpoints,
    persistence: Persistence,
    sync: SyncHandle,
    viewport: ViewportTracker,
    host: Box<dyn ViewportHost>,
    tx: mpsc::UnboundedSender<Settlement>,
    rx: mpsc::UnboundedReceiver<Settlement>,
}

impl SessionController {
    /// Build a controller and activate `settings.initial_context`. Must be called inside a
    /// tokio runtime: the debounced writer and the initial load are spawned.
    pub fn new(
        endpoints: Endpoints,
        persistence: Persistence,
        settings: ChatSettings,
        host: Box<dyn ViewportHost>,
    ) -> Self {
        let sync = SyncHandle::spawn(persistence.clone(), settings.debounce);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut controller = Self {
            context: settings.initial_context.clone(),
            activation: 0,
            loading: false,
            unauthorized: false,
            log: MessageLog::new(),
            compose: String::new(),
            attachment: None,
            upload: None,
            upload_seq: 0,
            last_error: None,
            requests: RequestLifecycle::new(),
            endpoints,
            persistence,
            sync,
            viewport: ViewportTracker::new(settings.scroll_threshold),
            host,
            tx,
            rx,
        };
        controller.activate(settings.initial_context);
        controller
    }

    /// Switch to `context`: cancel the previous context's request and upload, empty the
    /// log, and start loading. The log is filled when the load settles.
    pub fn activate(&mut self, context: impl Into<ConversationContext>) {
        let context = context.into();
        if self.requests.cancel() {
            log::debug!("session: cancelled in-flight request for {}", self.context);
        }
        self.cancel_upload();
        self.activation += 1;
        self.context = context.clone();
        self.log.clear();
        self.last_error = None;
        self.viewport.reset();
        self.loading = true;
        self.unauthorized = false;
        log::info!("session: activating {}", context);

        // the load must observe this context's latest scheduled write
        let written = self.sync.flush_context(context.clone());
        let persistence = self.persistence.clone();
        let tx = self.tx.clone();
        let activation = self.activation;
        tokio::spawn(async move {
            written.await;
            let (log, source) = persistence.load(&context).await;
            let _ = tx.send(Settlement::Loaded {
                activation,
                log,
                source,
            });
        });
    }

    /// Send `raw_text`. No-op (returns false) when blank after trimming. The user message is
    /// appended before any network activity; any earlier in-flight request is superseded.
    pub fn send(&mut self, raw_text: &str) -> bool {
        let text = raw_text.trim();
        if text.is_empty() {
            return false;
        }
        self.last_error = None;
        self.append(Message::user(text));

        let (ticket, request) = self.requests.dispatch(
            self.endpoints.chat.clone(),
            self.context.clone(),
            text.to_string(),
        );
        let tx = self.tx.clone();
        let activation = self.activation;
        tokio::spawn(async move {
            let outcome = request.await;
            let _ = tx.send(Settlement::Replied {
                activation,
                ticket,
                outcome,
            });
        });
        true
    }

    /// Append a typed or voice-captured fragment to the compose buffer.
    pub fn push_input(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        if !self.compose.is_empty() {
            self.compose.push(' ');
        }
        self.compose.push_str(fragment);
    }

    /// Replace the compose buffer (the host's text field changed).
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.compose = text.into();
    }

    pub fn input(&self) -> &str {
        &self.compose
    }

    /// Send the compose buffer and empty it.
    pub fn submit(&mut self) -> bool {
        let text = std::mem::take(&mut self.compose);
        self.send(&text)
    }

    /// Empty the log and persist the empty log for the active context.
    pub fn clear(&mut self) {
        self.log.clear();
        // a load still in flight must not refill a log the user just cleared
        self.loading = false;
        self.unauthorized = false;
        self.sync.schedule(self.context.clone(), MessageLog::new());
    }

    /// Stage a file for upload. Nothing is sent until [`send_attachment`].
    ///
    /// [`send_attachment`]: SessionController::send_attachment
    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn discard_attachment(&mut self) -> Option<Attachment> {
        self.attachment.take()
    }

    /// Upload the staged attachment. Appends an optimistic user message referencing the
    /// local preview; the draft is cleared whatever the outcome. Independent of the chat
    /// request slot; a newer upload supersedes an older one.
    pub fn send_attachment(&mut self) -> bool {
        let Some(attachment) = self.attachment.take() else {
            return false;
        };
        self.last_error = None;
        self.append(Message::user_attachment(
            message::ATTACHMENT_SENT,
            attachment.preview_ref.clone(),
        ));
        self.cancel_upload();
        self.upload_seq += 1;
        let upload = self.upload_seq;
        let token = CancellationToken::new();
        self.upload = Some(UploadSlot {
            id: upload,
            token: token.clone(),
        });

        let endpoint = self.endpoints.attachments.clone();
        let context = self.context.clone();
        let tx = self.tx.clone();
        let activation = self.activation;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => UploadOutcome::Cancelled,
                res = endpoint.upload(&context, &attachment) => UploadOutcome::classify(res),
            };
            let _ = tx.send(Settlement::Uploaded {
                activation,
                upload,
                outcome,
            });
        });
        true
    }

    /// Cancel the in-flight upload, if any.
    pub fn cancel_upload(&mut self) -> bool {
        match self.upload.take() {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the next settlement and apply it.
    pub async fn next_update(&mut self) -> SessionUpdate {
        match self.rx.recv().await {
            Some(settlement) => self.apply(settlement),
            None => SessionUpdate::Discarded,
        }
    }

    /// Apply every settlement that is already available, without waiting.
    pub fn drain_ready(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(settlement) = self.rx.try_recv() {
            updates.push(self.apply(settlement));
        }
        updates
    }

    pub(crate) fn apply(&mut self, settlement: Settlement) -> SessionUpdate {
        match settlement {
            Settlement::Loaded {
                activation,
                log,
                source,
            } => {
                if activation != self.activation || !self.loading {
                    log::debug!("session: dropping stale load");
                    return SessionUpdate::Discarded;
                }
                self.loading = false;
                self.unauthorized = source == LoadSource::Unauthorized;
                let early = std::mem::replace(&mut self.log, log);
                if !early.is_empty() {
                    self.log.extend(early);
                    self.persist();
                }
                self.viewport.on_append(self.host.as_mut());
                SessionUpdate::Loaded(source)
            }
            Settlement::Replied {
                activation,
                ticket,
                outcome,
            } => {
                if activation != self.activation || !self.requests.settle(ticket) {
                    log::debug!("session: dropping superseded reply");
                    return SessionUpdate::Discarded;
                }
                if let Some(reason) = outcome.failure_reason() {
                    log::warn!("session: request for {} failed: {}", self.context, reason);
                    self.last_error = Some(reason);
                }
                match outcome.to_message() {
                    Some(m) => SessionUpdate::Appended(self.append(m)),
                    None => SessionUpdate::Discarded,
                }
            }
            Settlement::Uploaded {
                activation,
                upload,
                outcome,
            } => {
                let current = self.upload.as_ref().map(|s| s.id) == Some(upload);
                if activation != self.activation || !current {
                    log::debug!("session: dropping stale upload result");
                    return SessionUpdate::Discarded;
                }
                self.upload = None;
                match &outcome {
                    UploadOutcome::Failed(reason) => {
                        log::warn!("session: upload for {} failed: {}", self.context, reason);
                        self.last_error = Some(reason.clone());
                    }
                    UploadOutcome::Unauthorized => {
                        self.last_error = Some("unauthorized".to_string());
                    }
                    _ => {}
                }
                match outcome.to_message() {
                    Some(m) => SessionUpdate::Appended(self.append(m)),
                    None => SessionUpdate::Discarded,
                }
            }
        }
    }

    fn append(&mut self, message: Message) -> usize {
        let index = self.log.push(message);
        self.persist();
        self.viewport.on_append(self.host.as_mut());
        index
    }

    /// Schedule a write of the current log. Deferred while loading so a partial log never
    /// overwrites stored history; the load settlement schedules it instead. Skipped after an
    /// unauthorized load: that log starts with the notice, not with stored history.
    fn persist(&self) {
        if !self.loading && !self.unauthorized {
            self.sync.schedule(self.context.clone(), self.log.clone());
        }
    }

    /// Feed a scroll sample from the host.
    pub fn on_scroll(&mut self, distance_from_bottom: f32) {
        self.viewport.on_scroll(distance_from_bottom);
    }

    /// Re-read the host's scroll distance.
    pub fn sample_viewport(&mut self) {
        self.viewport.sample(self.host.as_ref());
    }

    pub fn jump_to_bottom(&mut self) {
        self.viewport.jump_to_bottom(self.host.as_mut());
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport.state()
    }

    /// Write any pending debounced log now (host shutdown).
    pub async fn flush(&self) {
        self.sync.flush().await;
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// True while a chat request is in flight.
    pub fn is_awaiting_reply(&self) -> bool {
        self.requests.is_busy()
    }

    /// Text of the message whose reply is awaited.
    pub fn awaiting_text(&self) -> Option<&str> {
        self.requests.pending_text()
    }

    pub fn is_uploading(&self) -> bool {
        self.upload.is_some()
    }

    /// Reason of the most recent failed send or upload; cleared by the next one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
