//! Parivar chat core: the conversational session behind the family-health assistant:
//! message log, request lifecycle, two-tier persistence, and viewport continuity.

pub mod api;
pub mod config;
pub mod debounce;
pub mod error;
pub mod init;
pub mod message;
pub mod reply;
pub mod request;
pub mod session;
pub mod store;
pub mod sync;
pub mod viewport;

#[cfg(test)]
mod testing;

pub use api::{Attachment, AttachmentEndpoint, ChatEndpoint, HttpBackend, MemoryStore};
pub use error::{PersistError, TransportError};
pub use message::{ConversationContext, Message, MessageLog, Sender};
pub use request::Outcome;
pub use session::{ChatSettings, Endpoints, SessionController, SessionUpdate};
pub use store::{FileCache, LocalCache, MemoryCache};
pub use sync::{LoadSource, Persistence, SyncHandle};
pub use viewport::{ViewportHost, ViewportState};
