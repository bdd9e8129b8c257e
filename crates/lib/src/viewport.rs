//! Viewport continuity: auto-scroll on new messages while the reader is at the bottom,
//! otherwise raise a single "new messages" indicator.

/// Distance from the bottom (px) at or beyond which the reader counts as scrolled away.
pub const DEFAULT_SCROLL_THRESHOLD: f32 = 160.0;

/// The view hosting the message list. The tracker reads nothing but this one signal.
pub trait ViewportHost: Send {
    /// Current distance between the visible bottom edge and the end of the list, in px.
    fn distance_from_bottom(&self) -> f32;

    fn scroll_to_bottom(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewportPosition {
    #[default]
    AtBottom,
    ScrolledAway,
}

/// Snapshot for the view. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportState {
    pub at_bottom: bool,
    pub pending_indicator: bool,
}

#[derive(Debug, Clone)]
pub struct ViewportTracker {
    threshold: f32,
    position: ViewportPosition,
    pending_indicator: bool,
}

impl Default for ViewportTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_THRESHOLD)
    }
}

impl ViewportTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            position: ViewportPosition::AtBottom,
            pending_indicator: false,
        }
    }

    /// Feed one scroll sample. Returning to the bottom clears the indicator.
    pub fn on_scroll(&mut self, distance_from_bottom: f32) -> ViewportPosition {
        if distance_from_bottom < self.threshold {
            self.position = ViewportPosition::AtBottom;
            self.pending_indicator = false;
        } else {
            self.position = ViewportPosition::ScrolledAway;
        }
        self.position
    }

    /// Sample the host's current scroll distance.
    pub fn sample(&mut self, host: &dyn ViewportHost) -> ViewportPosition {
        self.on_scroll(host.distance_from_bottom())
    }

    /// A message was appended: follow it when at the bottom, else raise the indicator.
    /// Repeated appends while away keep a single indicator raised.
    pub fn on_append(&mut self, host: &mut dyn ViewportHost) {
        match self.position {
            ViewportPosition::AtBottom => {
                host.scroll_to_bottom();
                self.pending_indicator = false;
            }
            ViewportPosition::ScrolledAway => self.pending_indicator = true,
        }
    }

    /// User pressed "jump to bottom".
    pub fn jump_to_bottom(&mut self, host: &mut dyn ViewportHost) {
        host.scroll_to_bottom();
        self.position = ViewportPosition::AtBottom;
        self.pending_indicator = false;
    }

    /// Back to the initial state (context switch).
    pub fn reset(&mut self) {
        self.position = ViewportPosition::AtBottom;
        self.pending_indicator = false;
    }

    pub fn position(&self) -> ViewportPosition {
        self.position
    }

    pub fn state(&self) -> ViewportState {
        ViewportState {
            at_bottom: self.position == ViewportPosition::AtBottom,
            pending_indicator: self.pending_indicator,
        }
    }
}
