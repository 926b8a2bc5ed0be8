/// Near-bottom distance, in pixels, within which the view counts as pinned.
pub const DEFAULT_PIN_THRESHOLD: f32 = 24.0;

/// Whether timeline growth follows the newest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinState {
    #[default]
    Pinned,
    Unpinned,
}

/// Instruction for the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    ScrollToLatest,
    Stay,
}

/// Scroll geometry reported by the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    /// Distance scrolled from the top of the content.
    pub offset: f32,
    pub content_height: f32,
    pub viewport_height: f32,
}

impl ScrollMetrics {
    pub fn new(offset: f32, content_height: f32, viewport_height: f32) -> Self {
        Self {
            offset,
            content_height,
            viewport_height,
        }
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.content_height - self.viewport_height - self.offset).max(0.0)
    }
}

/// Pinned/unpinned follow behavior, independent from message content.
///
/// There is a single threshold and no hysteresis, so scrolling right at the
/// boundary can flip the state back and forth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportController {
    state: PinState,
    threshold: f32,
}

impl ViewportController {
    pub fn new(threshold: f32) -> Self {
        Self {
            state: PinState::Pinned,
            threshold: threshold.max(0.0),
        }
    }

    pub fn state(&self) -> PinState {
        self.state
    }

    pub fn is_pinned(&self) -> bool {
        self.state == PinState::Pinned
    }

    pub fn on_timeline_changed(&self) -> ScrollAction {
        match self.state {
            PinState::Pinned => ScrollAction::ScrollToLatest,
            PinState::Unpinned => ScrollAction::Stay,
        }
    }

    pub fn on_user_scroll(&mut self, metrics: ScrollMetrics) -> PinState {
        self.state = if metrics.distance_from_bottom() < self.threshold {
            PinState::Pinned
        } else {
            PinState::Unpinned
        };
        self.state
    }

    pub fn jump_to_latest(&mut self) -> ScrollAction {
        self.state = PinState::Pinned;
        ScrollAction::ScrollToLatest
    }
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new(DEFAULT_PIN_THRESHOLD)
    }
}
