use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration file structure for the exporter.
///
/// Loaded once at startup; organizations and their rules are immutable for the
/// lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Port the Prometheus metrics endpoint listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// GitHub REST API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds between two collection cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds between two repository/workflow discoveries
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Keep every published label set instead of only the latest per workflow
    #[serde(default)]
    pub retain_history: bool,

    /// Monitored organizations
    #[serde(default)]
    pub orgs: Vec<OrgConfig>,

    /// Legacy single-organization name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,

    /// Legacy single-organization token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrgConfig {
    /// Organization login (e.g., 'acme')
    pub name: String,

    /// Personal access token used for every call made for this organization
    #[serde(default)]
    pub token: Option<String>,

    /// Regexes matched case-insensitively against "owner/name"
    #[serde(default)]
    pub skip_repos: Vec<String>,

    /// Rules of the form `{repo-matcher: workflow-matcher}`
    #[serde(default)]
    pub skip_workflows: Vec<IndexMap<String, String>>,

    /// `"repo/workflow"` (or glob) to branch; `null` skips the workflow
    #[serde(default)]
    pub branch_overrides: IndexMap<String, Option<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: default_base_url(),
            interval_secs: default_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retain_history: false,
            orgs: Vec::new(),
            org: None,
            token: None,
        }
    }
}

fn default_port() -> u16 {
    9171
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_interval_secs() -> u64 {
    240
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./gha-exporter.yaml
    /// 3. ./gha-exporter.yml
    /// 4. ./gha-exporter.toml
    /// 5. ./gha-exporter.json
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "gha-exporter.yaml",
            "gha-exporter.yml",
            "gha-exporter.toml",
            "gha-exporter.json",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        bail!("No configuration file found (tried {})", candidates.join(", "))
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => serde_yaml::from_str(&contents)
                .or_else(|_| toml::from_str(&contents))
                .or_else(|_| serde_json::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Folds the legacy `org`/`token` keys into `orgs`, fills missing tokens
    /// from `env_token` and checks that the result is usable.
    pub fn normalize(mut self, env_token: Option<String>) -> Result<Self> {
        if let Some(name) = self.org.take() {
            let token = self.token.take();
            if !self.orgs.iter().any(|org| org.name == name) {
                self.orgs.push(OrgConfig {
                    name,
                    token,
                    ..OrgConfig::default()
                });
            }
        }

        if self.orgs.is_empty() {
            bail!("At least one organization must be configured");
        }

        for org in &mut self.orgs {
            if org.name.trim().is_empty() {
                bail!("Organization names must not be empty");
            }
            if org.token.is_none() {
                org.token.clone_from(&env_token);
            }
        }

        if self.interval_secs == 0 {
            bail!("interval-secs must be greater than zero");
        }

        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_test::assert_ok;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, "https://api.github.com");
        assert_eq!(config.port, 9171);
        assert_eq!(config.interval(), Duration::from_secs(240));
        assert_eq!(config.refresh_interval(), Duration::from_secs(3600));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(!config.retain_history);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        let yaml_content = r#"
port: 9200
orgs:
  - name: acme
    token: ghp_acme
    skip-repos: ["temp", "^acme/archive-"]
    skip-workflows:
      - "*": "Greetings"
      - "sandbox": "Remote *"
    branch-overrides:
      "api/deploy": production
      "infra-*/*": ~
      "*/nightly": develop
"#;
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = assert_ok!(Config::load_from_path(temp_file.path()));
        assert_eq!(config.port, 9200);
        assert_eq!(config.orgs.len(), 1);

        let org = &config.orgs[0];
        assert_eq!(org.name, "acme");
        assert_eq!(org.token.as_deref(), Some("ghp_acme"));
        assert_eq!(org.skip_repos, vec!["temp", "^acme/archive-"]);
        assert_eq!(org.skip_workflows.len(), 2);
        assert_eq!(org.skip_workflows[1].get("sandbox").unwrap(), "Remote *");

        let keys: Vec<_> = org.branch_overrides.keys().cloned().collect();
        assert_eq!(keys, vec!["api/deploy", "infra-*/*", "*/nightly"]);
        assert_eq!(org.branch_overrides["infra-*/*"], None);
        assert_eq!(
            org.branch_overrides["api/deploy"].as_deref(),
            Some("production")
        );
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
base-url = "https://github.example.com/api/v3"
interval-secs = 60
retain-history = true

[[orgs]]
name = "acme"
skip-repos = ["temp"]

[orgs.branch-overrides]
"api/deploy" = "production"
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.base_url, "https://github.example.com/api/v3");
        assert_eq!(config.interval_secs, 60);
        assert!(config.retain_history);
        assert_eq!(config.orgs[0].skip_repos, vec!["temp"]);
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "port": 9300,
  "orgs": [
    { "name": "acme", "branch-overrides": { "api/release": null } }
  ]
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.port, 9300);
        assert_eq!(config.orgs[0].branch_overrides["api/release"], None);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = Config::load(Some(Path::new("does-not-exist.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_legacy_single_org_is_folded_into_orgs() {
        let config: Config =
            serde_yaml::from_str("org: acme\ntoken: ghp_legacy\nport: 8000\n").unwrap();
        let config = config.normalize(None).unwrap();

        assert_eq!(config.orgs.len(), 1);
        assert_eq!(config.orgs[0].name, "acme");
        assert_eq!(config.orgs[0].token.as_deref(), Some("ghp_legacy"));
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_env_token_fills_missing_tokens_only() {
        let config: Config = serde_yaml::from_str(
            "orgs:\n  - name: acme\n  - name: globex\n    token: ghp_globex\n",
        )
        .unwrap();
        let config = config.normalize(Some("ghp_env".to_string())).unwrap();

        assert_eq!(config.orgs[0].token.as_deref(), Some("ghp_env"));
        assert_eq!(config.orgs[1].token.as_deref(), Some("ghp_globex"));
    }

    #[test]
    fn test_normalize_rejects_empty_org_list() {
        let result = Config::default().normalize(None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("At least one organization"));
    }
}
