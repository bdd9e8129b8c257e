//! Error taxonomy shared by the transport, request, and persistence layers.
//!
//! Raw `reqwest` and I/O errors stop here; the session controller only ever sees these
//! classified forms (and `request::Outcome`).

/// Failure of a single call to a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The backend answered 401; the user must re-authenticate elsewhere.
    #[error("unauthorized")]
    Unauthorized,
    /// Any other non-success status, with the response body (empty if unreadable).
    #[error("server returned {code}: {body}")]
    Status { code: u16, body: String },
    /// Unreachable, timed out, reset, or an unreadable response stream.
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Network(e.to_string())
    }
}

/// Failure of the persistence tiers. Logged by the synchronizer, never shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("local cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("local cache record is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    /// Both tiers failed for one operation; the conversation continues in memory only.
    #[error("persistence unavailable for context {context}")]
    Unavailable { context: String },
}
