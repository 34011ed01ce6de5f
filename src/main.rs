mod auth;
mod cache;
mod cli;
mod collector;
mod config;
mod error;
mod filter;
mod metrics;
mod output;
mod providers;
mod server;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting GitHub Actions exporter");
    cli.execute().await?;

    Ok(())
}
