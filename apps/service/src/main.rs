#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use logger::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use uplert_service::app::App;
use uplert_service::config::Config;
use uplert_service::server::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore persisted targets and serve the WebSocket channels (default)
    Serve,
    /// Print the effective configuration and exit
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::ShowConfig => {
            println!("{config}");
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let app = App::build(&config).await?;

    let restored = app.registry.restore().await.context("failed to restore monitoring")?;
    info!(started = restored.started, paused = restored.paused, "restored persisted targets");

    let server = Server::bind((config.server.bind.as_str(), config.server.port), app.registry.clone(), app.fanout.clone())
        .await
        .with_context(|| format!("failed to bind {}:{}", config.server.bind, config.server.port))?;
    info!(addr = %server.local_addr()?, fanout = %app.fanout.mode(), "listening");

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");

    shutdown.cancel();
    app.registry.shutdown().await;
    if let Err(e) = server_task.await {
        warn!(error = %e, "server task ended abnormally");
    }

    Ok(())
}
