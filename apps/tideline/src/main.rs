use clap::Parser;
use tideline_app::cli::Cli;
use tideline_app::{app, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::logging::init(&cli.logging.to_config())?;
    app::run(cli).await?;
    Ok(())
}
