//! Debounce scheduler: arm / disarm / fire, driven by caller-supplied instants.
//!
//! Holds no timer of its own, so it can be tested without wall-clock delays. The
//! synchronizer's writer task sleeps until [`Debouncer::deadline`] and then calls
//! [`Debouncer::fire`].

use std::time::Duration;
use tokio::time::Instant;

/// Coalesces repeated arms within a quiet window into one firing of the latest value.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Arm with `value`, replacing any pending value and restarting the quiet window.
    pub fn arm(&mut self, now: Instant, value: T) {
        self.pending = Some((now + self.delay, value));
    }

    /// Drop the pending value without firing; returns it.
    pub fn disarm(&mut self) -> Option<T> {
        self.pending.take().map(|(_, v)| v)
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(d, _)| *d)
    }

    /// Take the pending value if its quiet window has elapsed at `now`.
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.disarm(),
            _ => None,
        }
    }
}
