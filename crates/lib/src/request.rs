//! Request lifecycle: at most one in-flight chat request per session.
//!
//! A new dispatch always supersedes the previous one. Supersession is signalled through the
//! old request's [`CancellationToken`], and the generation-tagged [`RequestTicket`] lets the
//! session discard a late settlement even when the transport could not be aborted.

use crate::api::ChatEndpoint;
use crate::error::TransportError;
use crate::message::{self, ConversationContext, Message};
use crate::reply::extract_reply;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Final result of one dispatch, as seen by the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered(String),
    /// Superseded by a newer request or a context switch. Not an error.
    Cancelled,
    Unauthorized,
    ServerError { code: u16, body: String },
    NetworkError(String),
}

impl Outcome {
    /// Map a transport result onto the outcome taxonomy. Successful bodies go through
    /// [`extract_reply`], so `Delivered` text is never empty.
    pub fn classify(result: Result<String, TransportError>) -> Self {
        match result {
            Ok(body) => Outcome::Delivered(extract_reply(&body)),
            Err(TransportError::Unauthorized) => Outcome::Unauthorized,
            Err(TransportError::Status { code, body }) => Outcome::ServerError { code, body },
            Err(TransportError::Network(reason)) => Outcome::NetworkError(reason),
        }
    }

    /// The single assistant message this outcome contributes; `None` for `Cancelled`.
    pub fn to_message(&self) -> Option<Message> {
        let text = match self {
            Outcome::Delivered(reply) => reply.clone(),
            Outcome::Cancelled => return None,
            Outcome::Unauthorized => message::UNAUTHORIZED_NOTICE.to_string(),
            Outcome::ServerError { code, body } => message::server_error_notice(*code, body),
            Outcome::NetworkError(reason) => message::network_error_notice(reason),
        };
        Some(Message::assistant(text))
    }

    /// Short reason for a failed outcome (for `last_error`); `None` on success or cancel.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Outcome::Delivered(_) | Outcome::Cancelled => None,
            Outcome::Unauthorized => Some("unauthorized".to_string()),
            Outcome::ServerError { code, .. } => Some(format!("server returned {}", code)),
            Outcome::NetworkError(reason) => Some(reason.clone()),
        }
    }
}

/// Identifies one dispatch. Only the ticket of the current in-flight request settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTicket(u64);

#[derive(Debug)]
struct InFlight {
    ticket: RequestTicket,
    token: CancellationToken,
    text: String,
}

/// Owns the single in-flight request slot of a session.
#[derive(Debug, Default)]
pub struct RequestLifecycle {
    generation: u64,
    in_flight: Option<InFlight>,
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any in-flight request and register a new one for `text`.
    pub fn begin(&mut self, text: &str) -> (RequestTicket, CancellationToken) {
        if self.cancel() {
            log::debug!("request: superseding in-flight request");
        }
        self.generation += 1;
        let ticket = RequestTicket(self.generation);
        let token = CancellationToken::new();
        self.in_flight = Some(InFlight {
            ticket,
            token: token.clone(),
            text: text.to_string(),
        });
        (ticket, token)
    }

    /// Register a request and build the future that issues it. The future must be driven by
    /// the caller (typically spawned); its outcome is handed back through [`settle`].
    ///
    /// [`settle`]: RequestLifecycle::settle
    pub fn dispatch(
        &mut self,
        endpoint: Arc<dyn ChatEndpoint>,
        context: ConversationContext,
        text: String,
    ) -> (RequestTicket, impl Future<Output = Outcome> + Send + 'static) {
        let (ticket, token) = self.begin(&text);
        let fut = async move { run_request(endpoint.as_ref(), &context, &text, &token).await };
        (ticket, fut)
    }

    /// Cancel the in-flight request, if any. Returns whether one existed.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(req) => {
                req.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Release the slot for `ticket`. Returns true only when `ticket` is the current request,
    /// i.e. when its settlement may mutate the log.
    pub fn settle(&mut self, ticket: RequestTicket) -> bool {
        match &self.in_flight {
            Some(req) if req.ticket == ticket => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Ticket of the in-flight request.
    pub fn current(&self) -> Option<RequestTicket> {
        self.in_flight.as_ref().map(|r| r.ticket)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Outbound text of the in-flight request.
    pub fn pending_text(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|r| r.text.as_str())
    }
}

/// Issue one request; resolves to `Cancelled` if the token fires before or as it settles.
pub async fn run_request(
    endpoint: &dyn ChatEndpoint,
    context: &ConversationContext,
    text: &str,
    token: &CancellationToken,
) -> Outcome {
    tokio::select! {
        biased;
        _ = token.cancelled() => Outcome::Cancelled,
        res = endpoint.post(context, text) => {
            if token.is_cancelled() {
                Outcome::Cancelled
            } else {
                Outcome::classify(res)
            }
        }
    }
}
