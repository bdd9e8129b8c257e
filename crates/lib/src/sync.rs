//! Persistence synchronizer: loads a context's log on activation and mirrors log changes
//! to the two storage tiers through a debounced background writer.
//!
//! Load precedence: an unauthorized remote short-circuits to the unauthorized notice; a
//! non-empty remote log wins over anything local; otherwise the local record; otherwise
//! the greeting. Writes go to the remote tier first and are then mirrored locally
//! whatever the remote outcome. Write failures are logged, never surfaced.

use crate::api::MemoryStore;
use crate::debounce::Debouncer;
use crate::error::{PersistError, TransportError};
use crate::message::{ConversationContext, MessageLog};
use crate::store::LocalCache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

/// Quiet window before a scheduled write goes out.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(800);

/// Where a loaded log came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    Greeting,
    Unauthorized,
}

/// The two tiers, shared by the load path and the writer task.
#[derive(Clone)]
pub struct Persistence {
    remote: Arc<dyn MemoryStore>,
    local: Arc<dyn LocalCache>,
}

impl Persistence {
    pub fn new(remote: Arc<dyn MemoryStore>, local: Arc<dyn LocalCache>) -> Self {
        Self { remote, local }
    }

    /// Produce the initial log for `context`. Never fails and never returns an empty log.
    pub async fn load(&self, context: &ConversationContext) -> (MessageLog, LoadSource) {
        match self.remote.get(context).await {
            Ok(Some(log)) if !log.is_empty() => {
                log::debug!("memory: loaded {} messages for {} from remote", log.len(), context);
                return (log, LoadSource::Remote);
            }
            Ok(_) => log::debug!("memory: remote has no messages for {}", context),
            Err(TransportError::Unauthorized) => {
                log::warn!("memory: unauthorized loading {}", context);
                return (MessageLog::unauthorized(), LoadSource::Unauthorized);
            }
            Err(e) => log::warn!("memory: remote load for {} failed, using local: {}", context, e),
        }
        match self.local.get(context).await {
            Some(log) if !log.is_empty() => {
                log::debug!("memory: loaded {} messages for {} from local", log.len(), context);
                (log, LoadSource::Local)
            }
            _ => (MessageLog::greeting(), LoadSource::Greeting),
        }
    }

    /// Write `log` to the remote tier, then mirror it to the local tier.
    /// Errors only when both tiers failed.
    pub async fn write(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), PersistError> {
        let remote = self.remote.put(context, log).await;
        if let Err(e) = &remote {
            log::warn!("memory: remote write for {} failed: {}", context, e);
        }
        let local = self.local.put(context, log).await;
        if let Err(e) = &local {
            log::warn!("memory: local write for {} failed: {}", context, e);
        }
        if remote.is_err() && local.is_err() {
            return Err(PersistError::Unavailable {
                context: context.to_string(),
            });
        }
        Ok(())
    }
}

enum SyncCommand {
    Schedule(ConversationContext, MessageLog),
    Flush(oneshot::Sender<()>),
    FlushContext(ConversationContext, oneshot::Sender<()>),
}

/// Handle to the debounced writer task. Dropping every handle flushes pending writes and
/// stops the task.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncCommand>,
}

impl SyncHandle {
    /// Spawn the writer on the current tokio runtime.
    pub fn spawn(persistence: Persistence, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(persistence, delay, rx));
        Self { tx }
    }

    /// Debounced write of `log` for `context`. Calls within the quiet window coalesce per
    /// context; only the latest log is written.
    pub fn schedule(&self, context: ConversationContext, log: MessageLog) {
        if self.tx.send(SyncCommand::Schedule(context, log)).is_err() {
            log::warn!("memory: writer stopped, dropping scheduled write");
        }
    }

    /// Write every pending log now; resolves once the writes completed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SyncCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Write the pending log of `context` now, leaving other contexts on their timers.
    /// The request is queued behind every write already scheduled; the returned future
    /// resolves once that write completed, so a load awaiting it reads the latest log.
    pub fn flush_context(
        &self,
        context: ConversationContext,
    ) -> impl Future<Output = ()> + Send + 'static {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SyncCommand::FlushContext(context, ack)).is_err() {
            log::warn!("memory: writer stopped, nothing to flush");
        }
        async move {
            let _ = done.await;
        }
    }
}

async fn run_writer(
    persistence: Persistence,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<SyncCommand>,
) {
    let mut pending: HashMap<ConversationContext, Debouncer<MessageLog>> = HashMap::new();
    loop {
        let next = pending.values().filter_map(Debouncer::deadline).min();
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(SyncCommand::Schedule(context, log)) => {
                    pending
                        .entry(context)
                        .or_insert_with(|| Debouncer::new(delay))
                        .arm(Instant::now(), log);
                }
                Some(SyncCommand::Flush(ack)) => {
                    write_all(&persistence, drain(&mut pending)).await;
                    let _ = ack.send(());
                }
                Some(SyncCommand::FlushContext(context, ack)) => {
                    let due = pending
                        .remove(&context)
                        .and_then(|mut d| d.disarm())
                        .map(|log| (context, log));
                    write_all(&persistence, due.into_iter().collect()).await;
                    let _ = ack.send(());
                }
                None => {
                    write_all(&persistence, drain(&mut pending)).await;
                    break;
                }
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                let due: Vec<_> = pending
                    .iter_mut()
                    .filter_map(|(context, d)| d.fire(now).map(|log| (context.clone(), log)))
                    .collect();
                pending.retain(|_, d| d.is_armed());
                write_all(&persistence, due).await;
            }
        }
    }
    log::debug!("memory: writer stopped");
}

fn drain(
    pending: &mut HashMap<ConversationContext, Debouncer<MessageLog>>,
) -> Vec<(ConversationContext, MessageLog)> {
    pending
        .drain()
        .filter_map(|(context, mut d)| d.disarm().map(|log| (context, log)))
        .collect()
}

async fn write_all(persistence: &Persistence, writes: Vec<(ConversationContext, MessageLog)>) {
    for (context, log) in writes {
        if let Err(e) = persistence.write(&context, &log).await {
            log::warn!("memory: {}; continuing in memory only", e);
        }
    }
}
