use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, LINK};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{ExporterError, Result};

use super::types::{
    GitHubRepository, GitHubWorkflow, GitHubWorkflowRun, WorkflowRunsPage, WorkflowsPage,
};

pub(super) const PAGE_SIZE: usize = 100;
const API_VERSION: &str = "2022-11-28";

/// Outcome of an upstream call that never fails outright.
///
/// A degraded fetch still carries a value (whatever was gathered before the
/// failure, usually empty) so callers decide explicitly how to proceed.
#[derive(Debug)]
pub enum Fetch<T> {
    Complete(T),
    Degraded { value: T, reason: ExporterError },
}

impl<T> Fetch<T> {
    #[cfg(test)]
    pub fn value(&self) -> &T {
        match self {
            Self::Complete(value) | Self::Degraded { value, .. } => value,
        }
    }

    #[cfg(test)]
    pub fn into_value(self) -> T {
        match self {
            Self::Complete(value) | Self::Degraded { value, .. } => value,
        }
    }

    pub fn failure(&self) -> Option<&ExporterError> {
        match self {
            Self::Complete(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    #[cfg(test)]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetch<U> {
        match self {
            Self::Complete(value) => Fetch::Complete(f(value)),
            Self::Degraded { value, reason } => Fetch::Degraded {
                value: f(value),
                reason,
            },
        }
    }
}

impl<T: Default> From<Result<T>> for Fetch<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Complete(value),
            Err(reason) => Self::Degraded {
                value: T::default(),
                reason,
            },
        }
    }
}

/// Number of upstream requests issued, shared by every client of a session.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the current count and resets it to zero.
    pub fn take(&self) -> usize {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// GitHub REST API client bound to one organization's credential.
pub struct GitHubClient {
    client: Client,
    base_url: Url,
    calls: CallCounter,
}

impl GitHubClient {
    /// Create a new GitHub API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitHub API base URL (e.g., "https://api.github.com")
    /// * `token` - Optional personal access token sent as a bearer credential
    /// * `timeout` - Upper bound for every request
    /// * `calls` - Counter incremented for every request sent
    pub fn new(
        base_url: &str,
        token: Option<&Token>,
        timeout: Duration,
        calls: CallCounter,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            HeaderName::from_static("x-github-api-version"),
            HeaderValue::from_static(API_VERSION),
        );

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|e| ExporterError::Config(format!("Invalid token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(concat!("gha-exporter/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ExporterError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| ExporterError::Config(format!("Invalid base URL: {e}")))?;
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            calls,
        })
    }

    #[cfg(test)]
    pub fn calls(&self) -> &CallCounter {
        &self.calls
    }

    pub(super) fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ExporterError::Config(format!("Invalid API URL for '{path}': {e}")))
    }

    /// Sends a GET request, treating any non-2xx status as a failure.
    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        self.calls.increment();
        debug!("GET {url}");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExporterError::Api {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }

    pub(super) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.get(url).await?;
        Ok(response.json().await?)
    }

    async fn get_page<P: DeserializeOwned>(&self, url: Url) -> Result<(P, Option<Url>)> {
        let response = self.get(url).await?;
        let next = next_page_link(response.headers());
        let page = response.json().await?;
        Ok((page, next))
    }

    /// Follows `Link: <...>; rel="next"` headers until the last page.
    ///
    /// Items of every page fetched before a failure are kept in the degraded
    /// result.
    async fn get_all_pages<P, T>(&self, first: Url, items: impl Fn(P) -> Vec<T>) -> Fetch<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut all = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            match self.get_page::<P>(url).await {
                Ok((page, link)) => {
                    all.extend(items(page));
                    next = link;
                }
                Err(reason) => return Fetch::Degraded { value: all, reason },
            }
        }

        Fetch::Complete(all)
    }

    /// Fetch the full names of every repository of `org`.
    pub async fn fetch_org_repositories(&self, org: &str) -> Fetch<Vec<String>> {
        let mut url = match self.endpoint(&format!("orgs/{org}/repos")) {
            Ok(url) => url,
            Err(reason) => return Fetch::Degraded { value: Vec::new(), reason },
        };
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string())
            .append_pair("page", "1");

        self.get_all_pages(url, |page: Vec<GitHubRepository>| {
            page.into_iter().map(|repo| repo.full_name).collect()
        })
        .await
    }

    /// Fetch the workflows of `repo` that are not manually disabled.
    pub async fn fetch_active_workflows(&self, repo: &str) -> Fetch<Vec<GitHubWorkflow>> {
        let mut url = match self.endpoint(&format!("repos/{repo}/actions/workflows")) {
            Ok(url) => url,
            Err(reason) => return Fetch::Degraded { value: Vec::new(), reason },
        };
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string());

        self.get_all_pages(url, |page: WorkflowsPage| {
            page.workflows
                .into_iter()
                .filter(|workflow| !workflow.is_manually_disabled())
                .collect()
        })
        .await
    }

    /// Fetch the most recent run of a workflow on `branch`.
    ///
    /// Only one run is requested: the API sorts by run number, descending.
    pub async fn fetch_latest_run(
        &self,
        repo: &str,
        workflow_id: u64,
        branch: &str,
    ) -> Fetch<Option<GitHubWorkflowRun>> {
        Fetch::from(self.latest_run(repo, workflow_id, branch).await)
    }

    async fn latest_run(
        &self,
        repo: &str,
        workflow_id: u64,
        branch: &str,
    ) -> Result<Option<GitHubWorkflowRun>> {
        let mut url = self.endpoint(&format!("repos/{repo}/actions/workflows/{workflow_id}/runs"))?;
        url.query_pairs_mut()
            .append_pair("branch", branch)
            .append_pair("sort", "run_number")
            .append_pair("direction", "desc")
            .append_pair("per_page", "1")
            .append_pair("page", "1");

        let page: WorkflowRunsPage = self.get_json(url).await?;
        Ok(page.workflow_runs.into_iter().next())
    }
}

/// Parse the `Link` header to find the `rel="next"` URL.
fn next_page_link(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',')
        .map(str::trim)
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = start + part[start..].find('>')?;
            Url::parse(&part[start..end]).ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_next_page_link_found() {
        let headers = link_headers(
            "<https://api.github.com/organizations/1/repos?page=2>; rel=\"next\", \
             <https://api.github.com/organizations/1/repos?page=5>; rel=\"last\"",
        );
        let next = next_page_link(&headers).unwrap();
        assert_eq!(
            next.as_str(),
            "https://api.github.com/organizations/1/repos?page=2"
        );
    }

    #[test]
    fn test_next_page_link_absent_on_last_page() {
        let headers = link_headers(
            "<https://api.github.com/organizations/1/repos?page=4>; rel=\"prev\", \
             <https://api.github.com/organizations/1/repos?page=1>; rel=\"first\"",
        );
        assert!(next_page_link(&headers).is_none());
        assert!(next_page_link(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_next_page_link_tolerates_malformed_segments() {
        let headers = link_headers(">https://api.github.com/repos?page=2<; rel=\"next\"");
        assert!(next_page_link(&headers).is_none());

        let headers = link_headers("> <https://api.github.com/repos?page=2>; rel=\"next\"");
        assert_eq!(
            next_page_link(&headers).unwrap().as_str(),
            "https://api.github.com/repos?page=2"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = GitHubClient::new(
            "https://github.example.com/api/v3",
            None,
            Duration::from_secs(10),
            CallCounter::default(),
        )
        .unwrap();
        let url = client.endpoint("orgs/acme/repos").unwrap();
        assert_eq!(url.as_str(), "https://github.example.com/api/v3/orgs/acme/repos");
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = GitHubClient::new(
            "not a url",
            None,
            Duration::from_secs(10),
            CallCounter::default(),
        );
        assert!(matches!(result, Err(ExporterError::Config(_))));
    }

    #[test]
    fn test_call_counter_take_resets() {
        let counter = CallCounter::default();
        let shared = counter.clone();
        shared.increment();
        shared.increment();
        assert_eq!(counter.get(), 2);
        assert_eq!(counter.take(), 2);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_degraded_fetch_from_error_is_empty() {
        let fetch: Fetch<Vec<String>> = Fetch::from(Err(ExporterError::Api {
            status: 502,
            url: "https://api.github.com/orgs/acme/repos".to_string(),
        }));
        assert!(fetch.is_degraded());
        assert!(fetch.value().is_empty());
        assert!(fetch.failure().unwrap().to_string().contains("502"));
    }
}
