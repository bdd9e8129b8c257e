//! In-memory doubles for the remote endpoints, the local tier, and the viewport host.

use crate::api::{Attachment, AttachmentEndpoint, ChatEndpoint, MemoryStore};
use crate::error::{PersistError, TransportError};
use crate::message::{ConversationContext, MessageLog};
use crate::store::LocalCache;
use crate::viewport::ViewportHost;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) type Puts = mpsc::UnboundedReceiver<(ConversationContext, MessageLog)>;

/// Remote memory with a fixed `get` answer; every `put` attempt is reported on a channel.
pub(crate) struct FakeRemote {
    get: Mutex<Result<Option<MessageLog>, TransportError>>,
    fail_puts: bool,
    puts: mpsc::UnboundedSender<(ConversationContext, MessageLog)>,
}

impl FakeRemote {
    pub(crate) fn new(get: Result<Option<MessageLog>, TransportError>) -> (Arc<Self>, Puts) {
        Self::build(get, false)
    }

    pub(crate) fn failing_puts(
        get: Result<Option<MessageLog>, TransportError>,
    ) -> (Arc<Self>, Puts) {
        Self::build(get, true)
    }

    fn build(
        get: Result<Option<MessageLog>, TransportError>,
        fail_puts: bool,
    ) -> (Arc<Self>, Puts) {
        let (tx, rx) = mpsc::unbounded_channel();
        let remote = Self {
            get: Mutex::new(get),
            fail_puts,
            puts: tx,
        };
        (Arc::new(remote), rx)
    }
}

#[async_trait]
impl MemoryStore for FakeRemote {
    async fn get(&self, _: &ConversationContext) -> Result<Option<MessageLog>, TransportError> {
        self.get.lock().unwrap().clone()
    }

    async fn put(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), TransportError> {
        let _ = self.puts.send((context.clone(), log.clone()));
        if self.fail_puts {
            Err(TransportError::Network("memory endpoint down".into()))
        } else {
            Ok(())
        }
    }
}

/// Remote memory that serves back whatever was last written for a context.
#[derive(Default)]
pub(crate) struct StoredRemote {
    logs: Mutex<HashMap<ConversationContext, MessageLog>>,
}

impl StoredRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn stored(&self, context: &str) -> Option<MessageLog> {
        self.logs
            .lock()
            .unwrap()
            .get(&ConversationContext::from(context))
            .cloned()
    }
}

#[async_trait]
impl MemoryStore for StoredRemote {
    async fn get(
        &self,
        context: &ConversationContext,
    ) -> Result<Option<MessageLog>, TransportError> {
        Ok(self.logs.lock().unwrap().get(context).cloned())
    }

    async fn put(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), TransportError> {
        self.logs.lock().unwrap().insert(context.clone(), log.clone());
        Ok(())
    }
}

/// Local tier whose writes always fail.
pub(crate) struct FailingCache;

#[async_trait]
impl LocalCache for FailingCache {
    async fn get(&self, _: &ConversationContext) -> Option<MessageLog> {
        None
    }

    async fn put(&self, _: &ConversationContext, _: &MessageLog) -> Result<(), PersistError> {
        Err(PersistError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )))
    }
}

/// Chat endpoint that answers after `delay` with `{"reply":"reply to <text>"}` unless a
/// scripted result exists for the text.
pub(crate) struct FakeChat {
    delay: Duration,
    scripted: Mutex<HashMap<String, Result<String, TransportError>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeChat {
    pub(crate) fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn script(&self, text: &str, result: Result<String, TransportError>) {
        self.scripted.lock().unwrap().insert(text.to_string(), result);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatEndpoint for FakeChat {
    async fn post(&self, _: &ConversationContext, text: &str) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.delay).await;
        let scripted = self.scripted.lock().unwrap().remove(text);
        scripted.unwrap_or_else(|| {
            Ok(serde_json::json!({ "reply": format!("reply to {}", text) }).to_string())
        })
    }
}

/// Attachment endpoint with a fixed answer after `delay`.
pub(crate) struct FakeUploads {
    delay: Duration,
    result: Mutex<Result<Option<String>, TransportError>>,
}

impl FakeUploads {
    pub(crate) fn new(
        delay: Duration,
        result: Result<Option<String>, TransportError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            delay,
            result: Mutex::new(result),
        })
    }
}

#[async_trait]
impl AttachmentEndpoint for FakeUploads {
    async fn upload(
        &self,
        _: &ConversationContext,
        _: &Attachment,
    ) -> Result<Option<String>, TransportError> {
        tokio::time::sleep(self.delay).await;
        self.result.lock().unwrap().clone()
    }
}

/// Viewport host that counts scroll-to-bottom commands.
#[derive(Clone, Default)]
pub(crate) struct CountingHost {
    pub(crate) scrolls: Arc<AtomicUsize>,
}

impl CountingHost {
    pub(crate) fn scrolls(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }
}

impl ViewportHost for CountingHost {
    fn distance_from_bottom(&self) -> f32 {
        0.0
    }

    fn scroll_to_bottom(&mut self) {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
    }
}
