use futures::FutureExt;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use crate::cache::DiscoveryCache;
use crate::config::Config;
use crate::error::Result;
use crate::metrics::{MetricPublisher, MetricRecord};
use crate::providers::github::{CallCounter, Fetch};
use crate::providers::GitHubProvider;

/// State carried from one cycle to the next.
///
/// Owned by the [`Collector`]; the call counter is shared with the clients of
/// every organization.
pub struct Session {
    pub cache: DiscoveryCache,
    pub calls: CallCounter,
    pub cycles: u64,
}

impl Session {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            cache: DiscoveryCache::new(refresh_interval),
            calls: CallCounter::default(),
            cycles: 0,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub refreshed: bool,
    pub monitored: usize,
    pub published: usize,
    /// Workflows without any run on their tracked branch
    pub without_runs: usize,
    pub failed: usize,
    pub api_calls: usize,
}

/// Polls GitHub on a fixed period and republishes the latest run of every
/// monitored workflow.
pub struct Collector {
    providers: Vec<GitHubProvider>,
    publisher: MetricPublisher,
    session: Session,
    interval: Duration,
}

impl Collector {
    /// Builds one provider per configured organization.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern of any organization does not compile or
    /// an HTTP client cannot be built.
    pub fn new(config: &Config, publisher: MetricPublisher) -> Result<Self> {
        let session = Session::new(config.refresh_interval());

        let providers = config
            .orgs
            .iter()
            .map(|org| {
                GitHubProvider::new(
                    org,
                    &config.base_url,
                    config.request_timeout(),
                    session.calls.clone(),
                )
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            providers,
            publisher,
            session,
            interval: config.interval(),
        })
    }

    pub fn publisher(&self) -> &MetricPublisher {
        &self.publisher
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Rebuilds the discovery cache of every organization.
    async fn refresh(&mut self) {
        info!("Refreshing repository and workflow discovery");

        let mut workflows = IndexMap::new();
        for provider in &self.providers {
            let discovered = match provider.discover().await {
                Fetch::Complete(found) => found,
                Fetch::Degraded { value, reason } => {
                    warn!(
                        "Discovery for {} was incomplete, keeping {} workflows: {reason}",
                        provider.org(),
                        value.len()
                    );
                    value
                }
            };
            workflows.insert(provider.org().to_string(), discovered);
        }

        self.session.cache.replace(workflows, Instant::now());
        self.publisher.prune(self.session.cache.iter());
    }

    /// Runs one REFRESH + PUBLISH cycle.
    ///
    /// Upstream failures never abort the cycle: a workflow whose run cannot
    /// be fetched is counted as failed and the cycle moves on.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if self.session.cache.is_stale(Instant::now()) {
            self.refresh().await;
            report.refreshed = true;
        }

        for provider in &self.providers {
            for workflow in self.session.cache.get(provider.org()) {
                report.monitored += 1;

                let run = match provider.latest_run(workflow).await {
                    Fetch::Complete(Some(run)) => run,
                    Fetch::Complete(None) => {
                        debug!(
                            "No runs of '{}' in {} on branch {}",
                            workflow.workflow_name, workflow.repo, workflow.branch
                        );
                        report.without_runs += 1;
                        continue;
                    }
                    Fetch::Degraded { .. } => {
                        report.failed += 1;
                        continue;
                    }
                };

                match MetricRecord::from_run(
                    &workflow.org,
                    &workflow.repo,
                    &workflow.workflow_name,
                    &workflow.branch,
                    &run,
                ) {
                    Ok(record) => {
                        self.publisher.publish(&record);
                        report.published += 1;
                    }
                    Err(e) => {
                        warn!("Skipping run {} of {}: {e}", run.id, workflow.repo);
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Closes the cycle: reports the call volume and resets the counter.
    fn finish_cycle(&mut self) -> usize {
        self.session.cycles += 1;
        let calls = self.session.calls.take();
        self.publisher.record_cycle(calls, self.session.cache.len());

        info!(
            "Cycle {} finished: {calls} GitHub API calls",
            self.session.cycles
        );
        calls
    }

    /// Runs a single cycle and reports it.
    pub async fn run_once(&mut self) -> CycleReport {
        let mut report = self.run_cycle().await;
        report.api_calls = self.finish_cycle();
        log_report(&report);
        report
    }

    /// Runs cycles forever on a fixed schedule starting now.
    ///
    /// A panicking cycle is logged and abandoned; the next one starts on
    /// schedule.
    pub async fn run_forever(mut self) {
        info!(
            "Starting collection loop every {}s for {} organizations",
            self.interval.as_secs(),
            self.providers.len()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One scheduled cycle. A panic inside it yields `None`; the call count
    /// is still reported and reset.
    async fn tick(&mut self) -> Option<CycleReport> {
        let outcome = catch_panic(self.run_cycle()).await;
        let api_calls = self.finish_cycle();

        outcome.map(|mut report| {
            report.api_calls = api_calls;
            log_report(&report);
            report
        })
    }
}

/// Awaits `cycle`, logging and swallowing any panic it raises.
async fn catch_panic<T>(cycle: impl Future<Output = T>) -> Option<T> {
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(value) => Some(value),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Collection cycle aborted: {message}");
            None
        }
    }
}

fn log_report(report: &CycleReport) {
    info!(
        "Published {} of {} workflows ({} without runs, {} failed){}",
        report.published,
        report.monitored,
        report.without_runs,
        report.failed,
        if report.refreshed {
            ", discovery refreshed"
        } else {
            ""
        }
    );
}
