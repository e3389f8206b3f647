use std::io::Write;
use std::sync::Arc;

use tideline_proto::{FetchQuery, Message, NewMessage};
use tideline_sdk::MessageSource;
use tideline_sync::{
    BackfillController, Position, Session, SessionConfig, SessionEvent, TimelineChange,
    TimelineStore, Viewport,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::cli::{Cli, Command, HistoryArgs, SendArgs, WatchArgs};
use crate::config::AppConfig;
use crate::error::CliError;
use crate::terminal::TerminalViewport;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::from_cli(&cli)?;
    let source: Arc<dyn MessageSource> = Arc::new(config.client()?);
    info!(target: "tideline::app", server = %config.server, "connecting");

    match cli.command.unwrap_or(Command::Watch(WatchArgs::default())) {
        Command::Watch(args) => {
            let input = BufReader::new(tokio::io::stdin());
            watch(
                source,
                TerminalViewport::stdout(),
                config.session_config(),
                args,
                input,
            )
            .await
        }
        Command::Send(args) => {
            let created = send(source.as_ref(), &args).await?;
            println!("{}", created.id);
            Ok(())
        }
        Command::History(args) => {
            let mut viewport = TerminalViewport::stdout();
            let summary = history(source.as_ref(), &mut viewport, config.page_size, &args).await?;
            if summary.exhausted {
                eprintln!("(beginning of history)");
            }
            Ok(())
        }
    }
}

/// One line typed into the watch view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Older,
    Quit,
    Message(String),
    Blank,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Input::Blank,
            "/older" => Input::Older,
            "/quit" | "/exit" => Input::Quit,
            _ => Input::Message(line.trim_end_matches(['\r', '\n']).to_owned()),
        }
    }
}

/// Follows the timeline until `/quit`, end of input or Ctrl-C. Lines typed
/// on `input` are posted as `args.author`.
pub async fn watch<R>(
    source: Arc<dyn MessageSource>,
    viewport: impl Viewport + 'static,
    session_config: SessionConfig,
    args: WatchArgs,
    input: R,
) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
{
    let (handle, mut events) = Session::spawn(source, Box::new(viewport), session_config);
    let mut lines = input.lines();
    let mut input_open = true;

    let outcome = loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!(target: "tideline::app", "input closed; watching only");
                        input_open = false;
                        continue;
                    }
                    Err(err) => break Err(CliError::from(err)),
                };
                let sent = match Input::parse(&line) {
                    Input::Blank => Ok(()),
                    Input::Quit => break Ok(()),
                    Input::Older => handle.near_top().await,
                    Input::Message(body) => match &args.author {
                        Some(author) => handle.submit(body, author.clone()).await,
                        None => {
                            eprintln!("(read-only: pass --author to post)");
                            Ok(())
                        }
                    },
                };
                if let Err(err) = sent {
                    break Err(err.into());
                }
            }
            event = events.recv() => match event {
                Ok(event) => notify(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(target: "tideline::app", skipped, "event receiver lagged");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    handle.shutdown().await;
    outcome
}

fn notify(event: &SessionEvent) {
    match event {
        SessionEvent::Error(err) => eprintln!("! {err}"),
        SessionEvent::BackfillExhausted => eprintln!("(beginning of history)"),
        SessionEvent::InitialLoadFinished { count: 0 } => eprintln!("(no messages yet)"),
        _ => {}
    }
}

pub async fn send(source: &dyn MessageSource, args: &SendArgs) -> Result<Message, CliError> {
    let author = args.author.trim();
    if author.is_empty() {
        return Err(CliError::InvalidArgument("author must not be blank".into()));
    }
    let body = args.body.join(" ");
    if body.trim().is_empty() {
        return Err(CliError::InvalidArgument("message must not be blank".into()));
    }
    let created = source
        .create_message(NewMessage::new(body.trim(), author))
        .await?;
    debug!(target: "tideline::app", id = %created.id, "message posted");
    Ok(created)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistorySummary {
    pub loaded: usize,
    pub exhausted: bool,
}

/// Loads the newest page and then up to `pages - 1` older ones, rendering
/// each through `viewport` as it lands.
pub async fn history<W: Write + Send>(
    source: &dyn MessageSource,
    viewport: &mut TerminalViewport<W>,
    page_size: usize,
    args: &HistoryArgs,
) -> Result<HistorySummary, CliError> {
    if args.pages == 0 {
        return Err(CliError::InvalidArgument("pages must be at least 1".into()));
    }

    let mut store = TimelineStore::new();
    let latest = source
        .fetch_messages(FetchQuery::latest().with_limit(page_size))
        .await?;
    let added = store
        .merge(latest, Position::Append)
        .map_or(0, |change| change.added());
    viewport.render(store.messages(), TimelineChange::Loaded { added });
    viewport.scroll_to_bottom(false);

    let mut backfill = BackfillController::new(page_size);
    for _ in 1..args.pages {
        let Some(query) = backfill.trigger(store.earliest_time(), viewport.scroll_metrics())
        else {
            break;
        };
        let batch = match source.fetch_messages(query).await {
            Ok(batch) => batch,
            Err(err) => {
                backfill.fail();
                return Err(err.into());
            }
        };
        backfill.finish(batch.len());
        if let Some(change) = store.merge(batch, Position::Prepend) {
            viewport.render(store.messages(), change);
        }
    }

    Ok(HistorySummary {
        loaded: store.len(),
        exhausted: !backfill.has_more_older(),
    })
}
