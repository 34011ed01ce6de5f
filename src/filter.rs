//! Per-organization monitoring rules.
//!
//! Patterns from the configuration are compiled once into [`OrgRules`] and
//! reused for every discovery. Globs use `*` as the wildcard and treat the rest
//! of the pattern as regex syntax, matched case-insensitively against the whole
//! subject.

use log::debug;
use regex::{Regex, RegexBuilder};

use crate::config::OrgConfig;
use crate::error::{ExporterError, Result};

const DEFAULT_BRANCH: &str = "main";

/// Outcome of resolving a (repository, workflow) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchResolution {
    Skip,
    Track(String),
}

/// Compiles a glob into a case-insensitive regex anchored at both ends.
pub fn compile_glob(pattern: &str) -> Result<Regex> {
    let expanded = format!("^(?:{})$", pattern.replace('*', ".*"));
    RegexBuilder::new(&expanded)
        .case_insensitive(true)
        .build()
        .map_err(|source| ExporterError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn compile_search(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ExporterError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Portion of "owner/name" after the last '/'.
pub fn short_name(repository: &str) -> &str {
    repository.rsplit('/').next().unwrap_or(repository)
}

#[derive(Debug, Clone)]
enum RepoMatcher {
    Any,
    Exact(String),
    Glob(Regex),
}

impl RepoMatcher {
    fn compile(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            Ok(Self::Any)
        } else if pattern.contains('*') {
            Ok(Self::Glob(compile_glob(pattern)?))
        } else {
            Ok(Self::Exact(pattern.to_string()))
        }
    }

    fn matches(&self, short_repo: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => name == short_repo,
            Self::Glob(regex) => regex.is_match(short_repo),
        }
    }
}

#[derive(Debug, Clone)]
struct SkipRule {
    repo: RepoMatcher,
    workflow: Regex,
}

#[derive(Debug, Clone)]
struct BranchOverride {
    pattern: Regex,
    branch: Option<String>,
}

/// Compiled skip and override rules for one organization.
#[derive(Debug, Clone)]
pub struct OrgRules {
    skip_repos: Vec<Regex>,
    skip_workflows: Vec<SkipRule>,
    exact_overrides: Vec<(String, Option<String>)>,
    glob_overrides: Vec<BranchOverride>,
}

impl OrgRules {
    /// Compiles every pattern of `org`.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Pattern`] for the first pattern that is not a
    /// valid regex once globs are expanded.
    pub fn compile(org: &OrgConfig) -> Result<Self> {
        let skip_repos = org
            .skip_repos
            .iter()
            .map(|pattern| compile_search(pattern))
            .collect::<Result<_>>()?;

        let mut skip_workflows = Vec::new();
        for rule in &org.skip_workflows {
            for (repo, workflow) in rule {
                skip_workflows.push(SkipRule {
                    repo: RepoMatcher::compile(repo)?,
                    workflow: compile_glob(workflow)?,
                });
            }
        }

        let exact_overrides = org
            .branch_overrides
            .iter()
            .map(|(key, branch)| (key.clone(), branch.clone()))
            .collect();

        let mut glob_overrides = Vec::new();
        for (key, branch) in &org.branch_overrides {
            match compile_glob(key) {
                Ok(pattern) => glob_overrides.push(BranchOverride {
                    pattern,
                    branch: branch.clone(),
                }),
                // Plain keys such as "api/C++ build" stay usable as exact keys.
                Err(err) if !key.contains('*') => {
                    debug!("Override key '{key}' is exact-only: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(Self {
            skip_repos,
            skip_workflows,
            exact_overrides,
            glob_overrides,
        })
    }

    /// True when any skip pattern matches the full "owner/name".
    pub fn skips_repository(&self, repository: &str) -> bool {
        self.skip_repos.iter().any(|regex| regex.is_match(repository))
    }

    /// Decides whether `workflow` of `repository` is monitored and on which branch.
    ///
    /// Precedence: skip rule, then exact override key, then the first glob
    /// override in declaration order, then `main`.
    pub fn resolve_branch(&self, repository: &str, workflow: &str) -> BranchResolution {
        let short_repo = short_name(repository);

        let skipped = self
            .skip_workflows
            .iter()
            .any(|rule| rule.workflow.is_match(workflow) && rule.repo.matches(short_repo));
        if skipped {
            return BranchResolution::Skip;
        }

        // Keys may name the repository in full ("acme/api/deploy") or short ("api/deploy").
        let keys = [
            format!("{repository}/{workflow}"),
            format!("{short_repo}/{workflow}"),
        ];

        let exact = keys.iter().find_map(|key| {
            self.exact_overrides
                .iter()
                .find(|(candidate, _)| candidate == key)
        });
        if let Some((_, branch)) = exact {
            return Self::resolution(branch.as_deref());
        }

        let glob = self
            .glob_overrides
            .iter()
            .find(|rule| keys.iter().any(|key| rule.pattern.is_match(key)));
        if let Some(rule) = glob {
            return Self::resolution(rule.branch.as_deref());
        }

        BranchResolution::Track(DEFAULT_BRANCH.to_string())
    }

    fn resolution(branch: Option<&str>) -> BranchResolution {
        match branch {
            Some(branch) => BranchResolution::Track(branch.to_string()),
            None => BranchResolution::Skip,
        }
    }
}
