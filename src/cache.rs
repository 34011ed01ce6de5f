use indexmap::IndexMap;
use log::debug;
use std::time::{Duration, Instant};

use crate::providers::github::MonitoredWorkflow;

/// Discovery cache for monitored workflows.
///
/// Holds, per organization, the workflows found by the last discovery. The
/// whole cache is replaced on refresh, never patched, so repository and
/// workflow listings are issued at most once per refresh interval no matter
/// how often the collection loop runs.
pub struct DiscoveryCache {
    workflows: IndexMap<String, Vec<MonitoredWorkflow>>,
    refreshed_at: Option<Instant>,
    refresh_interval: Duration,
}

impl DiscoveryCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            workflows: IndexMap::new(),
            refreshed_at: None,
            refresh_interval,
        }
    }

    /// True when the cache was never filled or the refresh interval has
    /// elapsed at `now`.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.refreshed_at {
            None => true,
            Some(refreshed_at) => {
                now.saturating_duration_since(refreshed_at) >= self.refresh_interval
            }
        }
    }

    /// Discards the previous content and stores `workflows` as of `now`.
    pub fn replace(&mut self, workflows: IndexMap<String, Vec<MonitoredWorkflow>>, now: Instant) {
        debug!(
            "Replacing discovery cache: {} organizations, {} workflows",
            workflows.len(),
            workflows.values().map(Vec::len).sum::<usize>()
        );
        self.workflows = workflows;
        self.refreshed_at = Some(now);
    }

    /// Cached workflows of `org`, in discovery order.
    pub fn get(&self, org: &str) -> &[MonitoredWorkflow] {
        self.workflows.get(org).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every cached workflow across organizations.
    pub fn iter(&self) -> impl Iterator<Item = &MonitoredWorkflow> {
        self.workflows.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.workflows.values().map(Vec::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn create_test_workflow(org: &str, repo: &str, name: &str) -> MonitoredWorkflow {
        MonitoredWorkflow {
            org: org.to_string(),
            repo: format!("{org}/{repo}"),
            workflow_id: 1,
            workflow_name: name.to_string(),
            branch: "main".to_string(),
        }
    }

    fn snapshot(
        entries: &[(&str, Vec<MonitoredWorkflow>)],
    ) -> IndexMap<String, Vec<MonitoredWorkflow>> {
        entries
            .iter()
            .map(|(org, workflows)| (org.to_string(), workflows.clone()))
            .collect()
    }

    #[test]
    fn test_new_cache_is_stale_and_empty() {
        let cache = DiscoveryCache::new(HOUR);
        assert!(cache.is_stale(Instant::now()));
        assert!(cache.is_empty());
        assert!(cache.refreshed_at().is_none());
        assert!(cache.get("acme").is_empty());
    }

    #[test]
    fn test_cache_is_fresh_within_refresh_interval() {
        let start = Instant::now();
        let mut cache = DiscoveryCache::new(HOUR);
        cache.replace(
            snapshot(&[("acme", vec![create_test_workflow("acme", "api", "deploy")])]),
            start,
        );

        assert!(!cache.is_stale(start));
        assert!(!cache.is_stale(start + Duration::from_secs(59 * 60)));
        assert!(cache.is_stale(start + HOUR));
        assert!(cache.is_stale(start + HOUR + Duration::from_secs(1)));
    }

    #[test]
    fn test_replace_discards_previous_content() {
        let start = Instant::now();
        let mut cache = DiscoveryCache::new(HOUR);
        cache.replace(
            snapshot(&[
                ("acme", vec![create_test_workflow("acme", "api", "deploy")]),
                ("globex", vec![create_test_workflow("globex", "web", "ci")]),
            ]),
            start,
        );
        assert_eq!(cache.len(), 2);

        cache.replace(
            snapshot(&[("acme", vec![create_test_workflow("acme", "infra", "plan")])]),
            start + HOUR,
        );

        assert_eq!(cache.len(), 1);
        assert!(cache.get("globex").is_empty());
        assert_eq!(cache.get("acme")[0].repo, "acme/infra");
        assert_eq!(cache.refreshed_at(), Some(start + HOUR));
    }

    #[test]
    fn test_get_preserves_discovery_order() {
        let mut cache = DiscoveryCache::new(HOUR);
        cache.replace(
            snapshot(&[(
                "acme",
                vec![
                    create_test_workflow("acme", "api", "build"),
                    create_test_workflow("acme", "api", "deploy"),
                    create_test_workflow("acme", "web", "build"),
                ],
            )]),
            Instant::now(),
        );

        let names: Vec<_> = cache
            .get("acme")
            .iter()
            .map(|w| format!("{}:{}", w.repo, w.workflow_name))
            .collect();
        assert_eq!(names, vec!["acme/api:build", "acme/api:deploy", "acme/web:build"]);
    }
}
