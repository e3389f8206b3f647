use std::time::Duration;

use tideline_sdk::MessageClient;
use tideline_sync::SessionConfig;

use crate::cli::Cli;
use crate::error::CliError;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings shared by every subcommand, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: String,
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub page_size: usize,
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.page_size == 0 {
            return Err(CliError::InvalidArgument(
                "page size must be at least 1".into(),
            ));
        }
        let poll_interval = Duration::from_millis(cli.poll_interval_ms);
        if poll_interval < MIN_POLL_INTERVAL {
            return Err(CliError::InvalidArgument(format!(
                "poll interval must be at least {}ms",
                MIN_POLL_INTERVAL.as_millis()
            )));
        }
        let token = cli
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned);
        Ok(Self {
            server: cli.server.trim().to_owned(),
            token,
            poll_interval,
            page_size: cli.page_size,
        })
    }

    pub fn client(&self) -> Result<MessageClient, CliError> {
        let client = MessageClient::new(&self.server)?;
        Ok(match &self.token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: self.poll_interval,
            page_size: self.page_size,
            ..SessionConfig::default()
        }
    }
}
