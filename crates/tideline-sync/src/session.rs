use std::sync::Arc;
use std::time::Duration;

use tideline_proto::{FetchQuery, Message, NewMessage, PAGE_SIZE};
use tideline_sdk::{MessageSource, SourceError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backfill::BackfillController;
use crate::composer::Composer;
use crate::error::{FetchPhase, SessionClosed, SyncError};
use crate::poll::PollController;
use crate::store::{Position, TimelineStore};
use crate::viewport::{TimelineChange, Viewport};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    /// Must match the server's page size; a short backward page is the only
    /// exhaustion signal.
    pub page_size: usize,
    /// Distance from the bottom (surface units) within which new messages
    /// keep the view pinned to the tail.
    pub follow_threshold: u32,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: PAGE_SIZE,
            follow_threshold: 48,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    InitialLoadFinished { count: usize },
    TimelineChanged { change: TimelineChange, len: usize },
    Submitted { message: Message },
    DraftCleared,
    BackfillExhausted,
    Error(SyncError),
}

enum Command {
    NearTop,
    SetDraft(String),
    Submit { author: String },
    Snapshot(oneshot::Sender<Vec<Message>>),
    Draft(oneshot::Sender<String>),
    Shutdown,
}

enum Completion {
    Fetched {
        phase: FetchPhase,
        result: Result<Vec<Message>, SourceError>,
    },
    Created(Result<Message, SourceError>),
}

/// Handle to a running session. Dropping it aborts the session task, which
/// drops the poll ticker and every in-flight fetch with it.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Viewport signal: the user is close to the top of the loaded history.
    pub async fn near_top(&self) -> Result<(), SessionClosed> {
        self.send(Command::NearTop).await
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Command::SetDraft(text.into())).await
    }

    /// Submits the current draft as `author`.
    pub async fn submit_draft(&self, author: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Command::Submit {
            author: author.into(),
        })
        .await
    }

    /// Places `body` in the composer and submits it. Blank bodies are
    /// dropped without a request.
    pub async fn submit(
        &self,
        body: impl Into<String>,
        author: impl Into<String>,
    ) -> Result<(), SessionClosed> {
        self.set_draft(body).await?;
        self.submit_draft(author).await
    }

    pub async fn snapshot(&self) -> Result<Vec<Message>, SessionClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub async fn draft(&self) -> Result<String, SessionClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Draft(tx)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stops polling, discards in-flight fetches and waits for the session
    /// task to exit.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(err) = task.await {
            warn!(target: "tideline::session", error = %err, "session task ended abnormally");
        }
    }

    async fn send(&self, command: Command) -> Result<(), SessionClosed> {
        self.commands.send(command).await.map_err(|_| SessionClosed)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owner of one chat view's timeline. All mutation happens on the session
/// task; fetches run as child tasks and report back through a `JoinSet`.
pub struct Session {
    source: Arc<dyn MessageSource>,
    viewport: Box<dyn Viewport>,
    config: SessionConfig,
    store: TimelineStore,
    backfill: BackfillController,
    poll: PollController,
    composer: Composer,
    tasks: JoinSet<Completion>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Starts the session and its initial load. The returned receiver sees
    /// every event from the start.
    pub fn spawn(
        source: Arc<dyn MessageSource>,
        viewport: Box<dyn Viewport>,
        config: SessionConfig,
    ) -> (SessionHandle, broadcast::Receiver<SessionEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = broadcast::channel(config.event_capacity.max(1));
        let session = Session {
            source,
            viewport,
            backfill: BackfillController::new(config.page_size),
            poll: PollController::new(config.page_size),
            config,
            store: TimelineStore::new(),
            composer: Composer::new(),
            tasks: JoinSet::new(),
            events: events_tx.clone(),
        };
        let task = tokio::spawn(session.run(commands_rx));
        let handle = SessionHandle {
            commands: commands_tx,
            events: events_tx,
            task: Some(task),
        };
        (handle, events_rx)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(
            target: "tideline::session",
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            page_size = self.config.page_size,
            "session started"
        );
        self.spawn_fetch(
            FetchPhase::InitialLoad,
            FetchQuery::latest().with_limit(self.config.page_size),
        );

        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Commands first: a shutdown that is ready alongside a finished
            // fetch must win, so the result is discarded.
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = ticker.tick() => self.on_tick(),
                Some(joined) = self.tasks.join_next() => match joined {
                    Ok(completion) => self.on_completion(completion),
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        warn!(target: "tideline::session", error = %err, "fetch task panicked");
                    }
                },
            }
        }

        // Late responses must not reach the store.
        self.tasks.abort_all();
        info!(target: "tideline::session", messages = self.store.len(), "session torn down");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::NearTop => self.on_near_top(),
            Command::SetDraft(text) => self.composer.set_draft(text),
            Command::Submit { author } => self.on_submit(author),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.store.messages().to_vec());
            }
            Command::Draft(reply) => {
                let _ = reply.send(self.composer.draft().to_owned());
            }
            Command::Shutdown => {}
        }
    }

    fn on_tick(&mut self) {
        if let Some(query) = self.poll.tick(self.store.latest_time()) {
            self.spawn_fetch(FetchPhase::Poll, query);
        }
    }

    fn on_near_top(&mut self) {
        let metrics = self.viewport.scroll_metrics();
        if let Some(query) = self.backfill.trigger(self.store.earliest_time(), metrics) {
            self.spawn_fetch(FetchPhase::Backfill, query);
        }
    }

    fn on_submit(&mut self, author: String) {
        if let Some(message) = self.composer.begin_submit(&author) {
            self.spawn_create(message);
        }
    }

    fn spawn_create(&mut self, message: NewMessage) {
        debug!(
            target: "tideline::submit",
            author = %message.author,
            len = message.body.len(),
            queued = self.composer.queued(),
            "creating message"
        );
        let source = Arc::clone(&self.source);
        self.tasks
            .spawn(async move { Completion::Created(source.create_message(message).await) });
    }

    fn poll_now(&mut self) {
        if let Some(query) = self.poll.request_now(self.store.latest_time()) {
            self.spawn_fetch(FetchPhase::Poll, query);
        }
    }

    fn spawn_fetch(&mut self, phase: FetchPhase, query: FetchQuery) {
        debug!(target: "tideline::session", %phase, ?query, "fetch issued");
        let source = Arc::clone(&self.source);
        self.tasks.spawn(async move {
            let result = source.fetch_messages(query).await;
            Completion::Fetched { phase, result }
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Fetched { phase, result } => match phase {
                FetchPhase::InitialLoad => self.on_initial_load(result),
                FetchPhase::Backfill => self.on_backfill(result),
                FetchPhase::Poll => self.on_poll(result),
            },
            Completion::Created(result) => self.on_created(result),
        }
    }

    fn on_initial_load(&mut self, result: Result<Vec<Message>, SourceError>) {
        match result {
            Ok(batch) => {
                let added = self
                    .store
                    .merge(batch, Position::Append)
                    .map_or(0, |change| change.added());
                self.viewport
                    .render(self.store.messages(), TimelineChange::Loaded { added });
                self.viewport.scroll_to_bottom(false);
                info!(target: "tideline::session", count = self.store.len(), "initial load finished");
                self.emit(SessionEvent::InitialLoadFinished {
                    count: self.store.len(),
                });
            }
            Err(err) => self.report(SyncError::fetch(FetchPhase::InitialLoad, err)),
        }
        if self.poll.enable() {
            self.poll_now();
        }
    }

    fn on_backfill(&mut self, result: Result<Vec<Message>, SourceError>) {
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                self.backfill.fail();
                self.report(SyncError::fetch(FetchPhase::Backfill, err));
                return;
            }
        };

        let anchor = self.backfill.finish(batch.len());
        if let Some(change) = self.store.merge(batch, Position::Prepend) {
            self.viewport.render(self.store.messages(), change);
            if let Some(anchor) = anchor {
                let inserted = anchor.inserted_height(self.viewport.scroll_metrics());
                if inserted != 0 {
                    self.viewport.adjust_offset(inserted);
                }
                debug!(target: "tideline::backfill", added = change.added(), inserted, "prepended older messages");
            }
            self.emit(SessionEvent::TimelineChanged {
                change,
                len: self.store.len(),
            });
        }
        if !self.backfill.has_more_older() {
            info!(target: "tideline::backfill", "no older history");
            self.emit(SessionEvent::BackfillExhausted);
        }
    }

    fn on_poll(&mut self, result: Result<Vec<Message>, SourceError>) {
        match result {
            Ok(batch) => {
                let received = batch.len();
                self.append(batch);
                if self.poll.finish(Some(received)) {
                    self.poll_now();
                }
            }
            Err(err) => {
                self.poll.finish(None);
                self.report(SyncError::fetch(FetchPhase::Poll, err));
            }
        }
    }

    fn on_created(&mut self, result: Result<Message, SourceError>) {
        let settled = match result {
            Ok(message) => {
                debug!(target: "tideline::submit", id = %message.id, "message created");
                let settled = self.composer.finish_submit(true);
                if settled.cleared {
                    self.emit(SessionEvent::DraftCleared);
                }
                self.emit(SessionEvent::Submitted { message });
                // The created message enters the timeline through the poll,
                // never directly.
                self.poll_now();
                settled
            }
            Err(err) => {
                let settled = self.composer.finish_submit(false);
                self.report(SyncError::submission(err));
                settled
            }
        };
        if let Some(next) = settled.next {
            self.spawn_create(next);
        }
    }

    fn append(&mut self, batch: Vec<Message>) {
        let before = self.viewport.scroll_metrics();
        let Some(change) = self.store.merge(batch, Position::Append) else {
            return;
        };
        self.viewport.render(self.store.messages(), change);
        let grown = self
            .viewport
            .scroll_metrics()
            .content_height
            .saturating_sub(before.content_height);
        self.backfill.note_appended(grown);
        if before.is_near_bottom(self.config.follow_threshold) {
            self.viewport.scroll_to_bottom(true);
        }
        debug!(target: "tideline::poll", added = change.added(), "appended newer messages");
        self.emit(SessionEvent::TimelineChanged {
            change,
            len: self.store.len(),
        });
    }

    fn report(&self, error: SyncError) {
        warn!(target: "tideline::session", error = %error, "sync error");
        self.emit(SessionEvent::Error(error));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
