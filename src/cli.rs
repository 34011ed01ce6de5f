use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use crate::collector::Collector;
use crate::config::Config;
use crate::metrics::MetricPublisher;
use crate::output;
use crate::server;

#[derive(Parser)]
#[command(name = "gha-exporter")]
#[command(
    author,
    version,
    about = "Prometheus exporter for GitHub Actions workflow runs",
    long_about = None
)]
pub struct Cli {
    /// Path to the configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "GHA_EXPORTER_CONFIG")]
    config_file: Option<PathBuf>,

    /// Port for the metrics endpoint, overriding the configured one
    #[arg(short, long)]
    port: Option<u16>,

    /// Run a single collection cycle and exit without serving metrics
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config_file.as_deref())?
            .normalize(std::env::var("GITHUB_TOKEN").ok())?;
        let port = self.port.unwrap_or(config.port);

        output::print_banner(&config, port, self.once);

        let publisher = MetricPublisher::new(config.retain_history)
            .context("Failed to register metrics")?;
        let mut collector =
            Collector::new(&config, publisher).context("Failed to set up organizations")?;

        if self.once {
            let report = collector.run_once().await;
            info!(
                "Single cycle done: {} published, {} failed, {} API calls",
                report.published, report.failed, report.api_calls
            );
            return Ok(());
        }

        server::spawn(port, collector.publisher().registry());
        collector.run_forever().await;

        Ok(())
    }
}
