use console::style;

use crate::config::Config;

/// Prints the exporter banner to stderr.
///
/// Displays the tool name and version followed by the monitored organizations
/// and where metrics are served.
pub fn print_banner(config: &Config, port: u16, once: bool) {
    let orgs: Vec<&str> = config.orgs.iter().map(|org| org.name.as_str()).collect();
    let endpoint = if once {
        "single cycle, no endpoint".to_string()
    } else {
        format!(":{port}/metrics")
    };

    eprintln!(
        r"
{} {}
  {}
  {} {}
  {} {} every {}s
",
        style("GitHub Actions exporter").magenta().bold(),
        style(env!("CARGO_PKG_VERSION")).dim(),
        style("Latest workflow runs as Prometheus metrics").dim(),
        style("serving").dim(),
        style(endpoint).cyan(),
        style("polling").dim(),
        style(orgs.join(", ")).cyan(),
        config.interval_secs
    );
}
