use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tideline_proto::PAGE_SIZE;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tideline",
    about = "Follow and post to a shared chat timeline",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "TIDELINE_SERVER",
        default_value = "http://127.0.0.1:3000",
        help = "Base URL of the message server"
    )]
    pub server: String,

    #[arg(
        long,
        global = true,
        env = "TIDELINE_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        help = "Bearer token sent with every request"
    )]
    pub token: Option<String>,

    #[arg(
        long = "poll-interval-ms",
        global = true,
        env = "TIDELINE_POLL_INTERVAL_MS",
        default_value_t = 2_000,
        help = "How often to ask for new messages"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "page-size",
        global = true,
        env = "TIDELINE_PAGE_SIZE",
        default_value_t = PAGE_SIZE,
        help = "Messages per page; must match the server"
    )]
    pub page_size: usize,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "TIDELINE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "TIDELINE_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow the timeline and post lines typed on stdin (default)
    Watch(WatchArgs),
    /// Post a single message
    Send(SendArgs),
    /// Print older history, one page at a time
    History(HistoryArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    #[arg(
        long,
        env = "TIDELINE_AUTHOR",
        help = "Name to post as; without it the view is read-only"
    )]
    pub author: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[arg(long, env = "TIDELINE_AUTHOR", help = "Name to post as")]
    pub author: String,

    #[arg(trailing_var_arg = true, required = true, help = "Message text")]
    pub body: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(
        long,
        default_value_t = 1,
        help = "Pages to load, including the most recent one"
    )]
    pub pages: usize,
}
