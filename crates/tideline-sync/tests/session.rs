use std::sync::Arc;
use std::time::Duration;

use support::{GatedBackfill, SlowBackfill};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use test_timeout::tokio_timeout_test;
use tideline_proto::{Cursor, Message};
use tideline_sdk::InMemoryMessageSource;
use tideline_sync::{
    FetchPhase, ScrollMetrics, Session, SessionConfig, SessionEvent, SyncError, TimelineChange,
    Viewport,
};
use tokio::sync::broadcast;
use tokio::time::Instant;

const ROW: u32 = 2;
const VIEW_HEIGHT: u32 = 20;

#[derive(Default)]
struct Surface {
    content_height: u32,
    offset: u32,
    renders: Vec<TimelineChange>,
    adjustments: Vec<i64>,
    bottom_jumps: Vec<bool>,
}

/// Each message renders as `ROW` units.
#[derive(Clone, Default)]
struct FakeViewport(Arc<Mutex<Surface>>);

impl FakeViewport {
    fn scroll_to(&self, offset: u32) {
        self.0.lock().offset = offset;
    }

    fn offset(&self) -> u32 {
        self.0.lock().offset
    }

    fn adjustments(&self) -> Vec<i64> {
        self.0.lock().adjustments.clone()
    }

    fn bottom_jumps(&self) -> Vec<bool> {
        self.0.lock().bottom_jumps.clone()
    }

    fn renders(&self) -> Vec<TimelineChange> {
        self.0.lock().renders.clone()
    }
}

impl Viewport for FakeViewport {
    fn render(&mut self, timeline: &[Message], change: TimelineChange) {
        let mut surface = self.0.lock();
        surface.content_height = timeline.len() as u32 * ROW;
        surface.renders.push(change);
    }

    fn scroll_metrics(&self) -> ScrollMetrics {
        let surface = self.0.lock();
        ScrollMetrics {
            content_height: surface.content_height,
            offset_from_top: surface.offset,
            viewport_height: VIEW_HEIGHT,
        }
    }

    fn adjust_offset(&mut self, delta: i64) {
        let mut surface = self.0.lock();
        surface.offset = (i64::from(surface.offset) + delta).max(0) as u32;
        surface.adjustments.push(delta);
    }

    fn scroll_to_bottom(&mut self, smooth: bool) {
        let mut surface = self.0.lock();
        surface.offset = surface.content_height.saturating_sub(VIEW_HEIGHT);
        surface.bottom_jumps.push(smooth);
    }
}

fn message(n: i64) -> Message {
    Message {
        id: format!("t{n}"),
        author: "seed".into(),
        body: format!("message {n}"),
        created_at: Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
    }
}

async fn seeded(range: std::ops::Range<i64>) -> Arc<InMemoryMessageSource> {
    let source = InMemoryMessageSource::new();
    source.insert_all(range.map(message)).await;
    source
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = events.recv().await.expect("session event");
        if pred(&event) {
            return event;
        }
    }
}

fn is_loaded(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::InitialLoadFinished { .. })
}

fn is_prepend(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::TimelineChanged {
            change: TimelineChange::Prepended { .. },
            ..
        }
    )
}

fn is_append(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::TimelineChanged {
            change: TimelineChange::Appended { .. },
            ..
        }
    )
}

fn assert_sorted_unique(timeline: &[Message]) {
    for pair in timeline.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at, "timeline out of order");
    }
}

#[tokio_timeout_test(30, paused)]
async fn initial_load_lands_on_newest_message() {
    let source = seeded(0..60).await;
    let viewport = FakeViewport::default();
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(viewport.clone()),
        SessionConfig::default(),
    );

    let event = wait_for(&mut events, is_loaded).await;
    assert!(matches!(event, SessionEvent::InitialLoadFinished { count: 50 }));

    let timeline = handle.snapshot().await.unwrap();
    assert_eq!(timeline.first().unwrap().id, "t10");
    assert_eq!(timeline.last().unwrap().id, "t59");
    assert_sorted_unique(&timeline);
    assert_eq!(viewport.bottom_jumps(), vec![false]);
    assert_eq!(viewport.offset(), 50 * ROW - VIEW_HEIGHT);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn backfill_prepends_a_page_and_keeps_the_view_still() {
    let source = seeded(-50..50).await;
    let viewport = FakeViewport::default();
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(viewport.clone()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    viewport.scroll_to(0);
    handle.near_top().await.unwrap();
    wait_for(&mut events, is_prepend).await;

    let timeline = handle.snapshot().await.unwrap();
    assert_eq!(timeline.len(), 100);
    assert_eq!(timeline.first().unwrap().id, "t-50");
    assert_eq!(timeline.last().unwrap().id, "t49");
    assert_sorted_unique(&timeline);
    assert_eq!(viewport.adjustments(), vec![i64::from(50 * ROW)]);
    assert_eq!(viewport.offset(), 50 * ROW);

    let queries = source.queries().await;
    assert_eq!(
        queries.last().unwrap().cursor,
        Cursor::Before(message(0).created_at)
    );
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn exhaustion_is_terminal() {
    let source = seeded(-50..50).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    handle.near_top().await.unwrap();
    wait_for(&mut events, is_prepend).await;
    handle.near_top().await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::BackfillExhausted)).await;

    let backward = |queries: &[tideline_proto::FetchQuery]| {
        queries
            .iter()
            .filter(|q| matches!(q.cursor, Cursor::Before(_)))
            .count()
    };
    assert_eq!(backward(&source.queries().await), 2);

    for _ in 0..3 {
        handle.near_top().await.unwrap();
    }
    handle.snapshot().await.unwrap();
    assert_eq!(backward(&source.queries().await), 2);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn repeated_near_top_while_loading_issues_one_request() {
    let source = InMemoryMessageSource::with_latency(Duration::from_millis(500));
    source.insert_all((-50..50).map(message)).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    for _ in 0..5 {
        handle.near_top().await.unwrap();
    }
    wait_for(&mut events, is_prepend).await;

    let backward = source
        .queries()
        .await
        .iter()
        .filter(|q| matches!(q.cursor, Cursor::Before(_)))
        .count();
    assert_eq!(backward, 1);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn backfill_failure_is_retried_on_next_trigger() {
    let source = seeded(-50..50).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    source.fail_fetches(1).await;
    handle.near_top().await.unwrap();
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Error(SyncError::FetchFailed {
            phase: FetchPhase::Backfill,
            ..
        })
    ));

    handle.near_top().await.unwrap();
    wait_for(&mut events, is_prepend).await;
    assert_eq!(handle.snapshot().await.unwrap().len(), 100);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn poll_appends_messages_from_other_participants() {
    let source = seeded(0..10).await;
    let viewport = FakeViewport::default();
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(viewport.clone()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    source.insert(message(10)).await;
    wait_for(&mut events, is_append).await;

    let timeline = handle.snapshot().await.unwrap();
    assert_eq!(timeline.len(), 11);
    assert_eq!(timeline.last().unwrap().id, "t10");
    assert_eq!(
        source.queries().await.last().unwrap().cursor,
        Cursor::After(message(9).created_at)
    );
    // Small history fits the view, so new messages keep it pinned.
    assert_eq!(viewport.bottom_jumps(), vec![false, true]);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn empty_poll_changes_nothing() {
    let source = seeded(0..50).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;
    let before = handle.snapshot().await.unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let after = handle.snapshot().await.unwrap();

    assert_eq!(before, after);
    assert_eq!(
        source.queries().await.last().unwrap().cursor,
        Cursor::After(message(49).created_at)
    );
    assert!(events.try_recv().is_err());
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn poll_failure_does_not_stop_polling() {
    let source = seeded(0..5).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    source.fail_fetches(1).await;
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Error(SyncError::FetchFailed {
            phase: FetchPhase::Poll,
            ..
        })
    ));

    source.insert(message(5)).await;
    wait_for(&mut events, is_append).await;
    assert_eq!(handle.snapshot().await.unwrap().len(), 6);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn submitted_message_appears_once_via_poll() {
    let source = seeded(0..3).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;
    let started = Instant::now();

    handle.submit("hello", "alice").await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::DraftCleared)).await;
    assert_eq!(handle.draft().await.unwrap(), "");
    wait_for(&mut events, is_append).await;

    // Discovered by the post-submit poll, not the timer.
    assert!(started.elapsed() < Duration::from_millis(2_000));

    // A few more poll cycles must not duplicate it.
    tokio::time::sleep(Duration::from_secs(7)).await;
    let timeline = handle.snapshot().await.unwrap();
    let mine: Vec<_> = timeline
        .iter()
        .filter(|m| m.body == "hello" && m.author == "alice")
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(timeline.len(), 4);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn submissions_made_while_a_create_is_in_flight_are_sent_in_order() {
    let source = InMemoryMessageSource::with_latency(Duration::from_millis(300));
    source.insert_all((0..3).map(message)).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    handle.submit("first", "alice").await.unwrap();
    handle.submit("second", "alice").await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(source.len().await, 5);
    let timeline = handle.snapshot().await.unwrap();
    let tail: Vec<_> = timeline[3..].iter().map(|m| m.body.as_str()).collect();
    assert_eq!(tail, ["first", "second"]);
    assert_sorted_unique(&timeline);
    // Cleared only once the create for the text it still holds succeeded.
    assert_eq!(handle.draft().await.unwrap(), "");
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn blank_submission_issues_no_request() {
    let source = seeded(0..3).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    handle.submit("   ", "alice").await.unwrap();
    handle.snapshot().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.len().await, 3);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn failed_submission_keeps_the_draft() {
    let source = seeded(0..3).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    source.fail_creates(1).await;
    handle.submit("hello", "alice").await.unwrap();
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Error(SyncError::SubmissionFailed { .. })
    ));
    assert_eq!(handle.draft().await.unwrap(), "hello");
    assert_eq!(handle.snapshot().await.unwrap().len(), 3);

    handle.submit_draft("alice").await.unwrap();
    wait_for(&mut events, is_append).await;
    assert_eq!(handle.draft().await.unwrap(), "");
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn failed_initial_load_leaves_timeline_empty() {
    let source = seeded(0..10).await;
    source.fail_fetches(1).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );

    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Error(SyncError::FetchFailed {
            phase: FetchPhase::InitialLoad,
            ..
        })
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(handle.snapshot().await.unwrap().is_empty());
    // Nothing to poll against, and no automatic retry.
    assert_eq!(source.queries().await.len(), 1);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn appends_during_backfill_do_not_skew_the_anchor() {
    let inner = seeded(-50..50).await;
    let source = Arc::new(SlowBackfill::new(inner.clone(), Duration::from_secs(5)));
    let viewport = FakeViewport::default();
    let (handle, mut events) = Session::spawn(
        source,
        Box::new(viewport.clone()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    viewport.scroll_to(0);
    handle.near_top().await.unwrap();
    inner.insert(message(50)).await;
    wait_for(&mut events, is_append).await;
    wait_for(&mut events, is_prepend).await;

    assert_eq!(viewport.adjustments(), vec![i64::from(50 * ROW)]);
    assert_eq!(viewport.offset(), 50 * ROW);
    assert_eq!(handle.snapshot().await.unwrap().len(), 101);
    handle.shutdown().await;
}

#[tokio_timeout_test(30, paused)]
async fn teardown_discards_in_flight_results() {
    let source = InMemoryMessageSource::with_latency(Duration::from_secs(1));
    source.insert_all((-50..50).map(message)).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;

    handle.near_top().await.unwrap();
    handle.snapshot().await.unwrap();
    handle.shutdown().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    loop {
        match events.recv().await {
            Ok(event) => assert!(!is_prepend(&event), "mutation after teardown"),
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
    // The backfill was cancelled while the server was still working on it.
    assert_eq!(source.queries().await.len(), 1);
}

#[tokio_timeout_test(30, paused)]
async fn shutdown_wins_over_a_fetch_finishing_at_the_same_moment() {
    for _ in 0..20 {
        let inner = seeded(-50..50).await;
        let source = Arc::new(GatedBackfill::new(inner));
        let viewport = FakeViewport::default();
        let (handle, mut events) = Session::spawn(
            source.clone(),
            Box::new(viewport.clone()),
            SessionConfig::default(),
        );
        wait_for(&mut events, is_loaded).await;

        handle.near_top().await.unwrap();
        source.entered().await;
        source.release();
        handle.shutdown().await;

        assert!(
            !viewport
                .renders()
                .iter()
                .any(|change| matches!(change, TimelineChange::Prepended { .. })),
            "older page rendered after shutdown"
        );
        while let Ok(event) = events.try_recv() {
            assert!(!is_prepend(&event), "mutation after shutdown");
        }
    }
}

#[tokio_timeout_test(30, paused)]
async fn dropping_the_handle_stops_polling() {
    let source = seeded(0..5).await;
    let (handle, mut events) = Session::spawn(
        source.clone(),
        Box::new(FakeViewport::default()),
        SessionConfig::default(),
    );
    wait_for(&mut events, is_loaded).await;
    drop(handle);
    tokio::task::yield_now().await;
    let issued = source.queries().await.len();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(source.queries().await.len(), issued);
}

mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use tideline_proto::{Cursor, FetchQuery, Message, NewMessage};
    use tideline_sdk::{InMemoryMessageSource, MessageSource, SourceError};
    use tokio::sync::{Notify, Semaphore};

    /// Holds backward fetches until [`GatedBackfill::release`] is called.
    pub struct GatedBackfill {
        inner: Arc<InMemoryMessageSource>,
        gate: Semaphore,
        entered: Notify,
    }

    impl GatedBackfill {
        pub fn new(inner: Arc<InMemoryMessageSource>) -> Self {
            Self {
                inner,
                gate: Semaphore::new(0),
                entered: Notify::new(),
            }
        }

        /// Resolves once a backward fetch is waiting at the gate.
        pub async fn entered(&self) {
            self.entered.notified().await;
        }

        pub fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait::async_trait]
    impl MessageSource for GatedBackfill {
        async fn fetch_messages(&self, query: FetchQuery) -> Result<Vec<Message>, SourceError> {
            if matches!(query.cursor, Cursor::Before(_)) {
                self.entered.notify_one();
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
            }
            self.inner.fetch_messages(query).await
        }

        async fn create_message(&self, message: NewMessage) -> Result<Message, SourceError> {
            self.inner.create_message(message).await
        }
    }

    /// Delays backward fetches only.
    pub struct SlowBackfill {
        inner: Arc<InMemoryMessageSource>,
        delay: Duration,
    }

    impl SlowBackfill {
        pub fn new(inner: Arc<InMemoryMessageSource>, delay: Duration) -> Self {
            Self { inner, delay }
        }
    }

    #[async_trait::async_trait]
    impl MessageSource for SlowBackfill {
        async fn fetch_messages(&self, query: FetchQuery) -> Result<Vec<Message>, SourceError> {
            if matches!(query.cursor, Cursor::Before(_)) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.fetch_messages(query).await
        }

        async fn create_message(&self, message: NewMessage) -> Result<Message, SourceError> {
            self.inner.create_message(message).await
        }
    }
}
