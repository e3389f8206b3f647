//! Line-oriented rendering of the timeline onto a terminal.
//!
//! A terminal cannot insert above what it has already printed, so older
//! history is printed in place between two markers while the cursor stays
//! at the tail. Row accounting still mirrors a scrolled surface, which
//! keeps the engine's anchor arithmetic meaningful.

use std::io::{self, Write};

use chrono::Local;
use tideline_proto::Message;
use tideline_sync::{ScrollMetrics, TimelineChange, Viewport};
use tracing::warn;

const DEFAULT_ROWS: u16 = 24;
const EARLIER_MARKER: &str = "-- earlier messages --";
const EARLIER_END_MARKER: &str = "-- end of earlier messages --";
const REDRAW_MARKER: &str = "-- timeline reordered --";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Plain,
    /// Older history printed below what is already on screen.
    Earlier,
    /// The whole timeline, reprinted after an out-of-order batch.
    Redraw,
}

pub struct TerminalViewport<W: Write + Send> {
    out: W,
    content_height: u32,
    offset_from_top: u32,
    viewport_height: u32,
}

impl TerminalViewport<io::Stdout> {
    pub fn stdout() -> Self {
        let rows = crossterm::terminal::size()
            .map(|(_, rows)| rows)
            .unwrap_or(DEFAULT_ROWS);
        Self::new(io::stdout(), u32::from(rows.max(1)))
    }
}

impl<W: Write + Send> TerminalViewport<W> {
    pub fn new(out: W, viewport_height: u32) -> Self {
        Self {
            out,
            content_height: 0,
            offset_from_top: 0,
            viewport_height,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, messages: &[Message], frame: Frame) -> io::Result<u32> {
        let mut rows = 0;
        match frame {
            Frame::Plain => {}
            Frame::Earlier => writeln!(self.out, "{EARLIER_MARKER}")?,
            Frame::Redraw => writeln!(self.out, "{REDRAW_MARKER}")?,
        }
        for message in messages {
            let text = format_message(message);
            rows += row_count(&text);
            writeln!(self.out, "{text}")?;
        }
        if frame == Frame::Earlier {
            writeln!(self.out, "{EARLIER_END_MARKER}")?;
        }
        self.out.flush()?;
        Ok(rows)
    }

    fn max_offset(&self) -> u32 {
        self.content_height.saturating_sub(self.viewport_height)
    }
}

impl<W: Write + Send> Viewport for TerminalViewport<W> {
    fn render(&mut self, timeline: &[Message], change: TimelineChange) {
        let (slice, frame) = match change {
            TimelineChange::Loaded { .. } => (timeline, Frame::Plain),
            TimelineChange::Prepended { added } => {
                (&timeline[..added.min(timeline.len())], Frame::Earlier)
            }
            TimelineChange::Appended { added } => {
                (&timeline[timeline.len().saturating_sub(added)..], Frame::Plain)
            }
            // New entries are scattered; only a full reprint is accurate.
            TimelineChange::Interleaved { .. } => (timeline, Frame::Redraw),
        };
        match self.print(slice, frame) {
            Ok(rows) if frame == Frame::Redraw => self.content_height = rows,
            Ok(rows) => self.content_height += rows,
            Err(err) => warn!(target: "tideline::terminal", error = %err, "failed to write timeline"),
        }
    }

    fn scroll_metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            content_height: self.content_height,
            offset_from_top: self.offset_from_top,
            viewport_height: self.viewport_height,
        }
    }

    fn adjust_offset(&mut self, delta: i64) {
        let next = i64::from(self.offset_from_top).saturating_add(delta);
        self.offset_from_top = next.clamp(0, i64::from(self.max_offset())) as u32;
    }

    fn scroll_to_bottom(&mut self, _smooth: bool) {
        self.offset_from_top = self.max_offset();
    }
}

/// `[HH:MM:SS] author: body`, with continuation lines indented.
pub fn format_message(message: &Message) -> String {
    let stamp = message.created_at.with_timezone(&Local).format("%H:%M:%S");
    let mut lines = message.body.lines();
    let first = lines.next().unwrap_or_default();
    let mut text = format!("[{stamp}] {}: {first}", message.author);
    for line in lines {
        text.push_str("\n    ");
        text.push_str(line);
    }
    text
}

fn row_count(text: &str) -> u32 {
    text.lines().count().max(1) as u32
}
