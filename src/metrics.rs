//! Prometheus representation of workflow runs.
//!
//! Every monitored workflow is exposed as one `github_actions_workflow_run`
//! series whose value is the update time of its latest run (epoch seconds).
//! Run details travel as labels, so a new run produces a new label set.

use chrono::NaiveDateTime;
use log::debug;
use prometheus::{Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::{HashMap, HashSet};

use crate::error::{ExporterError, Result};
use crate::providers::github::{GitHubWorkflowRun, MonitoredWorkflow};

pub const RUN_METRIC: &str = "github_actions_workflow_run";
const CYCLE_CALLS_METRIC: &str = "github_actions_exporter_cycle_api_calls";
const MONITORED_METRIC: &str = "github_actions_exporter_monitored_workflows";

const RUN_LABELS: [&str; 9] = [
    "org",
    "repo",
    "workflow",
    "status",
    "conclusion",
    "updated_at",
    "duration",
    "user",
    "branch",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One observation derived from a fetched run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub org: String,
    pub repo: String,
    pub workflow: String,
    pub status: String,
    pub conclusion: String,
    pub updated_at: String,
    /// Seconds between creation and last update
    pub duration: i64,
    pub user: String,
    pub branch: String,
    /// Last update as epoch seconds
    pub timestamp: i64,
}

impl MetricRecord {
    /// Derives the record published for `run`.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Timestamp`] when either timestamp is not in
    /// the API's `YYYY-MM-DDTHH:MM:SSZ` form.
    pub fn from_run(
        org: &str,
        repo: &str,
        workflow: &str,
        branch: &str,
        run: &GitHubWorkflowRun,
    ) -> Result<Self> {
        let created = parse_timestamp(&run.created_at)?;
        let updated = parse_timestamp(&run.updated_at)?;

        Ok(Self {
            org: org.to_string(),
            repo: repo.to_string(),
            workflow: workflow.to_string(),
            status: run.status.clone(),
            conclusion: derive_conclusion(run),
            updated_at: run.updated_at.clone(),
            duration: (updated - created).num_seconds(),
            user: run
                .actor
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |actor| actor.login.clone()),
            branch: run.head_branch.clone().unwrap_or_else(|| branch.to_string()),
            timestamp: updated.and_utc().timestamp(),
        })
    }

    fn label_values(&self) -> [String; 9] {
        [
            self.org.clone(),
            self.repo.clone(),
            self.workflow.clone(),
            self.status.clone(),
            self.conclusion.clone(),
            self.updated_at.clone(),
            self.duration.to_string(),
            self.user.clone(),
            self.branch.clone(),
        ]
    }
}

/// Terminal conclusion, or a readable stand-in while the run is not finished.
pub fn derive_conclusion(run: &GitHubWorkflowRun) -> String {
    if let Some(conclusion) = &run.conclusion {
        return conclusion.clone();
    }

    match run.status.as_str() {
        "in_progress" => "Running".to_string(),
        "queued" => "Pending".to_string(),
        other => other.to_string(),
    }
}

/// Parses an API timestamp with second precision, dropping the trailing `Z`.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim_end_matches('Z');
    let whole_seconds = trimmed.split('.').next().unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(whole_seconds, TIMESTAMP_FORMAT).map_err(|source| {
        ExporterError::Timestamp {
            value: value.to_string(),
            source,
        }
    })
}

/// Publishes run records into a Prometheus registry.
///
/// Unless history is retained, the previous label set of a workflow is
/// removed when a newer one is published, keeping one series per
/// (org, repo, workflow).
pub struct MetricPublisher {
    registry: Registry,
    runs: GaugeVec,
    cycle_calls: IntGauge,
    monitored: IntGauge,
    retain_history: bool,
    latest: HashMap<(String, String, String), [String; 9]>,
}

impl MetricPublisher {
    pub fn new(retain_history: bool) -> Result<Self> {
        let registry = Registry::new();

        let runs = GaugeVec::new(
            Opts::new(
                RUN_METRIC,
                "Latest workflow run per monitored workflow, valued at its update time (epoch seconds)",
            ),
            &RUN_LABELS,
        )?;
        let cycle_calls = IntGauge::new(
            CYCLE_CALLS_METRIC,
            "GitHub API calls made during the last collection cycle",
        )?;
        let monitored = IntGauge::new(
            MONITORED_METRIC,
            "Workflows in the discovery cache",
        )?;

        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(cycle_calls.clone()))?;
        registry.register(Box::new(monitored.clone()))?;

        Ok(Self {
            registry,
            runs,
            cycle_calls,
            monitored,
            retain_history,
            latest: HashMap::new(),
        })
    }

    /// Handle on the registry, for the metrics endpoint.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub fn publish(&mut self, record: &MetricRecord) {
        let values = record.label_values();
        let key = (
            record.org.clone(),
            record.repo.clone(),
            record.workflow.clone(),
        );

        if !self.retain_history {
            if let Some(previous) = self.latest.get(&key) {
                if *previous != values {
                    let previous: Vec<&str> = previous.iter().map(String::as_str).collect();
                    if let Err(err) = self.runs.remove_label_values(&previous) {
                        debug!("Previous series already gone: {err}");
                    }
                }
            }
        }

        let labels: Vec<&str> = values.iter().map(String::as_str).collect();
        #[allow(clippy::cast_precision_loss)]
        self.runs
            .with_label_values(&labels)
            .set(record.timestamp as f64);

        debug!(
            "Published {}/{} '{}': {} ({})",
            record.org, record.repo, record.workflow, record.conclusion, record.updated_at
        );

        if !self.retain_history {
            self.latest.insert(key, values);
        }
    }

    /// Drops the series of every workflow that is no longer monitored.
    ///
    /// Retained history is left untouched.
    pub fn prune<'a>(&mut self, monitored: impl IntoIterator<Item = &'a MonitoredWorkflow>) {
        let keep: HashSet<(&str, &str, &str)> = monitored
            .into_iter()
            .map(|w| (w.org.as_str(), w.repo.as_str(), w.workflow_name.as_str()))
            .collect();

        let runs = &self.runs;
        self.latest.retain(|(org, repo, workflow), values| {
            if keep.contains(&(org.as_str(), repo.as_str(), workflow.as_str())) {
                return true;
            }
            debug!("Removing series of {repo} '{workflow}', no longer monitored");
            let labels: Vec<&str> = values.iter().map(String::as_str).collect();
            if let Err(err) = runs.remove_label_values(&labels) {
                debug!("Series already gone: {err}");
            }
            false
        });
    }

    pub fn record_cycle(&self, api_calls: usize, monitored: usize) {
        self.cycle_calls
            .set(i64::try_from(api_calls).unwrap_or(i64::MAX));
        self.monitored
            .set(i64::try_from(monitored).unwrap_or(i64::MAX));
    }

    /// Renders the registry in the Prometheus text format.
    pub fn render(registry: &Registry) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
