use serde::{Deserialize, Serialize};

/// State GitHub reports for workflows switched off from the UI or API.
const DISABLED_MANUALLY: &str = "disabled_manually";

/// Repository entry of `GET /orgs/{org}/repos`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepository {
    /// Full "owner/name" of the repository
    pub full_name: String,
}

/// Body of `GET /repos/{repo}/actions/workflows`.
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowsPage {
    #[serde(default)]
    pub workflows: Vec<GitHubWorkflow>,
}

/// GitHub Actions workflow definition.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubWorkflow {
    /// Unique identifier for the workflow
    pub id: u64,
    /// Display name of the workflow
    pub name: String,
    /// active, disabled_manually, disabled_inactivity, ...
    #[serde(default)]
    pub state: String,
}

impl GitHubWorkflow {
    pub fn is_manually_disabled(&self) -> bool {
        self.state == DISABLED_MANUALLY
    }
}

/// Body of `GET /repos/{repo}/actions/workflows/{id}/runs`.
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowRunsPage {
    #[serde(default)]
    pub workflow_runs: Vec<GitHubWorkflowRun>,
}

/// GitHub Actions workflow run.
///
/// Timestamps are kept as sent by the API ("2024-01-01T00:05:30Z") since they
/// are republished verbatim as a label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubWorkflowRun {
    /// Unique identifier for the workflow run
    pub id: u64,
    /// Run number
    #[serde(default)]
    pub run_number: u64,
    /// queued, in_progress, completed, ...
    pub status: String,
    /// Conclusion of the run, absent until it completes
    pub conclusion: Option<String>,
    /// When the run was created
    pub created_at: String,
    /// When the run was updated
    pub updated_at: String,
    /// User that triggered the run
    pub actor: Option<GitHubActor>,
    /// Head branch or tag name
    pub head_branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubActor {
    pub login: String,
}

/// A workflow selected for monitoring, together with the branch whose runs
/// are tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredWorkflow {
    pub org: String,
    /// Full "owner/name" of the repository
    pub repo: String,
    pub workflow_id: u64,
    pub workflow_name: String,
    pub branch: String,
}
