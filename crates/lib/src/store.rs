//! Local fallback tier of conversation memory.
//!
//! The local tier is a best-effort replica: it is read only when the remote tier is
//! unreachable or empty, and written after every remote write attempt. [`FileCache`]
//! keeps one JSON file per context; [`MemoryCache`] is the in-process variant.

use crate::error::PersistError;
use crate::message::{ConversationContext, MessageLog};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Local cache contract. `get` never fails: unreadable records count as absent.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, context: &ConversationContext) -> Option<MessageLog>;

    async fn put(&self, context: &ConversationContext, log: &MessageLog)
        -> Result<(), PersistError>;
}

/// One `aichat_mem_<sha256(context)>.json` file per context under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record for `context`. Hashed so any context name is a safe file name.
    pub fn path_for(&self, context: &ConversationContext) -> PathBuf {
        let digest = Sha256::digest(context.as_str().as_bytes());
        self.dir.join(format!("aichat_mem_{:x}.json", digest))
    }
}

#[async_trait]
impl LocalCache for FileCache {
    async fn get(&self, context: &ConversationContext) -> Option<MessageLog> {
        let path = self.path_for(context);
        let s = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("local cache: reading {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<MessageLog>(&s) {
            Ok(log) => Some(log),
            Err(e) => {
                log::warn!("local cache: discarding invalid record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write via a temp file and rename, so a crash never leaves a truncated record.
    async fn put(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(context);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(log)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-memory local tier (tests, or hosts without a writable cache directory).
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<ConversationContext, MessageLog>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly.
    pub async fn insert(&self, context: impl Into<ConversationContext>, log: MessageLog) {
        self.inner.write().await.insert(context.into(), log);
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get(&self, context: &ConversationContext) -> Option<MessageLog> {
        self.inner.read().await.get(context).cloned()
    }

    async fn put(
        &self,
        context: &ConversationContext,
        log: &MessageLog,
    ) -> Result<(), PersistError> {
        self.inner
            .write()
            .await
            .insert(context.clone(), log.clone());
        Ok(())
    }
}
