use log::{debug, info, warn};
use std::time::Duration;

use crate::auth::Token;
use crate::config::OrgConfig;
use crate::error::Result;
use crate::filter::{BranchResolution, OrgRules};

use super::client::{CallCounter, Fetch, GitHubClient};
use super::rate_limit;
use super::types::{GitHubWorkflowRun, MonitoredWorkflow};

/// Discovers and fetches the monitored workflows of one organization.
pub struct GitHubProvider {
    org: String,
    client: GitHubClient,
    rules: OrgRules,
}

impl GitHubProvider {
    /// Create a provider for `org`, compiling its rules.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern does not compile or the HTTP client
    /// cannot be built.
    pub fn new(
        org: &OrgConfig,
        base_url: &str,
        timeout: Duration,
        calls: CallCounter,
    ) -> Result<Self> {
        let token = org.token.as_deref().map(Token::from);
        let client = GitHubClient::new(base_url, token.as_ref(), timeout, calls)?;
        let rules = OrgRules::compile(org)?;

        Ok(Self {
            org: org.name.clone(),
            client,
            rules,
        })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    /// Consults the rate-limit guard after a failed call.
    async fn recover<T>(&self, fetch: Fetch<T>, what: &str) -> Fetch<T> {
        if let Some(reason) = fetch.failure() {
            warn!("{what} failed for organization {}: {reason}", self.org);
            rate_limit::guard(&self.client).await;
        }
        fetch
    }

    /// Lists the organization's repositories, minus those matching a skip pattern.
    pub async fn list_repositories(&self) -> Fetch<Vec<String>> {
        let fetch = self.client.fetch_org_repositories(&self.org).await;
        let fetch = self.recover(fetch, "Repository listing").await;

        fetch.map(|repos| {
            repos
                .into_iter()
                .filter(|repo| {
                    let skipped = self.rules.skips_repository(repo);
                    if skipped {
                        debug!("Skipping repository {repo}");
                    }
                    !skipped
                })
                .collect()
        })
    }

    /// Lists (id, name) of the active workflows of `repo`.
    pub async fn list_workflows(&self, repo: &str) -> Fetch<Vec<(u64, String)>> {
        let fetch = self.client.fetch_active_workflows(repo).await;
        let fetch = self
            .recover(fetch, &format!("Workflow listing of {repo}"))
            .await;

        fetch.map(|workflows| {
            workflows
                .into_iter()
                .map(|workflow| (workflow.id, workflow.name))
                .collect()
        })
    }

    /// Enumerates every workflow to monitor together with its tracked branch.
    ///
    /// Failures never abort discovery: the repositories and workflows that
    /// could be listed are kept and the first failure is reported.
    pub async fn discover(&self) -> Fetch<Vec<MonitoredWorkflow>> {
        let mut first_failure = None;

        let repos = match self.list_repositories().await {
            Fetch::Complete(repos) => repos,
            Fetch::Degraded { value, reason } => {
                first_failure.get_or_insert(reason);
                value
            }
        };

        let mut monitored = Vec::new();
        for repo in &repos {
            let workflows = match self.list_workflows(repo).await {
                Fetch::Complete(workflows) => workflows,
                Fetch::Degraded { value, reason } => {
                    first_failure.get_or_insert(reason);
                    value
                }
            };

            for (workflow_id, workflow_name) in workflows {
                match self.rules.resolve_branch(repo, &workflow_name) {
                    BranchResolution::Skip => {
                        debug!("Skipping workflow '{workflow_name}' of {repo}");
                    }
                    BranchResolution::Track(branch) => monitored.push(MonitoredWorkflow {
                        org: self.org.clone(),
                        repo: repo.clone(),
                        workflow_id,
                        workflow_name,
                        branch,
                    }),
                }
            }
        }

        info!(
            "Discovered {} workflows across {} repositories for organization {}",
            monitored.len(),
            repos.len(),
            self.org
        );

        match first_failure {
            None => Fetch::Complete(monitored),
            Some(reason) => Fetch::Degraded {
                value: monitored,
                reason,
            },
        }
    }

    /// Fetches the latest run of `workflow` on its tracked branch.
    pub async fn latest_run(
        &self,
        workflow: &MonitoredWorkflow,
    ) -> Fetch<Option<GitHubWorkflowRun>> {
        let fetch = self
            .client
            .fetch_latest_run(&workflow.repo, workflow.workflow_id, &workflow.branch)
            .await;
        self.recover(
            fetch,
            &format!(
                "Run lookup of '{}' in {}",
                workflow.workflow_name, workflow.repo
            ),
        )
        .await
    }
}
