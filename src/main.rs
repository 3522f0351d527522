#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use proxypal::Config;
use proxypal::app::dispatch::dispatch;
use proxypal::cli::Cli;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `run` can stream JSON events on stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init()?;
    dispatch(cli, config).await
}
