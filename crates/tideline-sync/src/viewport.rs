//! The rendering surface as seen by the engine: three scroll primitives and a
//! render hook. The engine never draws; it only keeps backfill invisible and
//! lands the user on the newest message.

use tideline_proto::Message;

/// Scroll geometry in surface units (pixels, rows, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollMetrics {
    pub content_height: u32,
    pub offset_from_top: u32,
    pub viewport_height: u32,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> u32 {
        self.content_height
            .saturating_sub(self.offset_from_top.saturating_add(self.viewport_height))
    }

    pub fn is_near_bottom(&self, threshold: u32) -> bool {
        self.distance_from_bottom() <= threshold
    }
}

/// What happened to the timeline in the render that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineChange {
    /// First population of the view.
    Loaded { added: usize },
    /// Older history inserted above the fold.
    Prepended { added: usize },
    /// Newer messages added at the tail.
    Appended { added: usize },
    /// New messages landed between existing ones; positions below the
    /// insertion points shifted, so the whole timeline should be redrawn.
    Interleaved { added: usize },
}

impl TimelineChange {
    pub fn added(&self) -> usize {
        match *self {
            TimelineChange::Loaded { added }
            | TimelineChange::Prepended { added }
            | TimelineChange::Appended { added }
            | TimelineChange::Interleaved { added } => added,
        }
    }
}

pub trait Viewport: Send {
    /// Re-renders `timeline`. Metrics read after this call must include the
    /// new content.
    fn render(&mut self, timeline: &[Message], change: TimelineChange);

    fn scroll_metrics(&self) -> ScrollMetrics;

    /// Moves the scroll offset by `delta` (positive scrolls down).
    fn adjust_offset(&mut self, delta: i64);

    fn scroll_to_bottom(&mut self, smooth: bool);
}

impl<V: Viewport + ?Sized> Viewport for Box<V> {
    fn render(&mut self, timeline: &[Message], change: TimelineChange) {
        (**self).render(timeline, change)
    }

    fn scroll_metrics(&self) -> ScrollMetrics {
        (**self).scroll_metrics()
    }

    fn adjust_offset(&mut self, delta: i64) {
        (**self).adjust_offset(delta)
    }

    fn scroll_to_bottom(&mut self, smooth: bool) {
        (**self).scroll_to_bottom(smooth)
    }
}

/// Surface for headless sessions.
#[derive(Debug, Default)]
pub struct NullViewport;

impl Viewport for NullViewport {
    fn render(&mut self, _timeline: &[Message], _change: TimelineChange) {}

    fn scroll_metrics(&self) -> ScrollMetrics {
        ScrollMetrics::default()
    }

    fn adjust_offset(&mut self, _delta: i64) {}

    fn scroll_to_bottom(&mut self, _smooth: bool) {}
}

/// Scroll position recorded when a backfill request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollAnchor {
    content_height: u32,
    offset_from_top: u32,
}

impl ScrollAnchor {
    pub fn capture(metrics: ScrollMetrics) -> Self {
        Self {
            content_height: metrics.content_height,
            offset_from_top: metrics.offset_from_top,
        }
    }

    pub fn content_height(&self) -> u32 {
        self.content_height
    }

    pub fn offset_from_top(&self) -> u32 {
        self.offset_from_top
    }

    /// Accounts for content appended below the fold while the request was
    /// outstanding; that growth must not be mistaken for prepended height.
    pub fn rebase(&mut self, appended_height: u32) {
        self.content_height = self.content_height.saturating_add(appended_height);
    }

    /// Height inserted above the fold, given metrics read after the prepend
    /// was rendered.
    pub fn inserted_height(&self, after: ScrollMetrics) -> i64 {
        i64::from(after.content_height) - i64::from(self.content_height)
    }
}
