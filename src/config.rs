use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Controller settings.
///
/// Loaded from the specified path or the first configuration file found in
/// the current directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperatorConfig {
    /// Maximum number of jobs running at the same time
    #[serde(default = "default_max_pipeline_run")]
    pub max_pipeline_run: usize,

    /// Pause between two scheduling passes
    #[serde(default = "default_scheduling_gap_secs")]
    pub scheduling_gap_secs: u64,

    /// Interval at which every object is reconciled again
    #[serde(default = "default_resync_period_secs")]
    pub resync_period_secs: u64,

    /// Requeue delay after a failed reconcile
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Polling interval of the periodic triggers
    #[serde(default = "default_periodic_tick_secs")]
    pub periodic_tick_secs: u64,

    /// Interval between two garbage collection runs
    #[serde(default = "default_gc_period_secs")]
    pub gc_period_secs: u64,

    /// How long completed jobs are kept
    #[serde(default = "default_job_ttl_hours")]
    pub job_ttl_hours: u64,

    /// Host (and port) the git servers send webhooks to
    #[serde(default = "default_external_hostname")]
    pub external_hostname: String,

    /// Username stored in the generated git credentials
    #[serde(default = "default_git_bot_username")]
    pub git_bot_username: String,

    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `From` address
    #[serde(default)]
    pub sender: String,

    #[serde(default)]
    pub templates: MailTemplates,
}

/// Subject and body templates. `{{key}}` placeholders are substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MailTemplates {
    #[serde(default = "default_request_title")]
    pub request_title: String,

    #[serde(default = "default_request_content")]
    pub request_content: String,

    #[serde(default = "default_result_title")]
    pub result_title: String,

    #[serde(default = "default_result_content")]
    pub result_content: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            max_pipeline_run: default_max_pipeline_run(),
            scheduling_gap_secs: default_scheduling_gap_secs(),
            resync_period_secs: default_resync_period_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            periodic_tick_secs: default_periodic_tick_secs(),
            gc_period_secs: default_gc_period_secs(),
            job_ttl_hours: default_job_ttl_hours(),
            external_hostname: default_external_hostname(),
            git_bot_username: default_git_bot_username(),
            mail: MailConfig::default(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sender: String::new(),
            templates: MailTemplates::default(),
        }
    }
}

impl Default for MailTemplates {
    fn default() -> Self {
        Self {
            request_title: default_request_title(),
            request_content: default_request_content(),
            result_title: default_result_title(),
            result_content: default_result_content(),
        }
    }
}

fn default_max_pipeline_run() -> usize {
    5
}

fn default_scheduling_gap_secs() -> u64 {
    3
}

fn default_resync_period_secs() -> u64 {
    60
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_periodic_tick_secs() -> u64 {
    60
}

fn default_gc_period_secs() -> u64 {
    3600
}

fn default_job_ttl_hours() -> u64 {
    120
}

fn default_external_hostname() -> String {
    "localhost:24335".to_string()
}

fn default_git_bot_username() -> String {
    "tmax-cicd-bot".to_string()
}

fn default_request_title() -> String {
    "[CI/CD] Approval is requested for {{job_name}}".to_string()
}

fn default_request_content() -> String {
    "{{sender}} requested your approval for {{job_name}} of {{integration_job}}.\n\n{{message}}\n\n{{link}}"
        .to_string()
}

fn default_result_title() -> String {
    "[CI/CD] Approval for {{job_name}} is {{result}}".to_string()
}

fn default_result_content() -> String {
    "{{approver}} decided {{result}} for {{job_name}} of {{integration_job}}.\n\nReason: {{reason}}"
        .to_string()
}

impl OperatorConfig {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./cicd-operator.toml
    /// 3. ./cicd-operator.json
    /// 4. ./cicd-operator.yaml
    /// 5. ./cicd-operator.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "cicd-operator.toml",
            "cicd-operator.json",
            "cicd-operator.yaml",
            "cicd-operator.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        let config: Self = match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_pipeline_run == 0 {
            anyhow::bail!("max-pipeline-run must be at least 1");
        }
        if self.mail.enabled && self.mail.sender.is_empty() {
            anyhow::bail!("mail.sender is required when mail is enabled");
        }
        Ok(())
    }

    pub fn scheduling_gap(&self) -> Duration {
        Duration::from_secs(self.scheduling_gap_secs)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn periodic_tick(&self) -> Duration {
        Duration::from_secs(self.periodic_tick_secs)
    }

    pub fn gc_period(&self) -> Duration {
        Duration::from_secs(self.gc_period_secs)
    }

    pub fn job_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.job_ttl_hours).unwrap_or(i64::MAX / 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = OperatorConfig::default();
        assert_eq!(config.max_pipeline_run, 5);
        assert_eq!(config.scheduling_gap(), Duration::from_secs(3));
        assert_eq!(config.job_ttl(), chrono::Duration::hours(120));
        assert_eq!(config.git_bot_username, "tmax-cicd-bot");
        assert!(!config.mail.enabled);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
max-pipeline-run = 2
external-hostname = "ci.example.com"

[mail]
enabled = true
sender = "ci@example.com"

[mail.templates]
request-title = "Please approve {{job_name}}"
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = OperatorConfig::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.max_pipeline_run, 2);
        assert_eq!(config.external_hostname, "ci.example.com");
        assert_eq!(config.resync_period_secs, 60);
        assert!(config.mail.enabled);
        assert_eq!(config.mail.templates.request_title, "Please approve {{job_name}}");
        assert_eq!(config.mail.templates.result_title, default_result_title());
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "max-pipeline-run: 9\njob-ttl-hours: 1\n").unwrap();

        let config = OperatorConfig::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.max_pipeline_run, 9);
        assert_eq!(config.job_ttl(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, r#"{{"scheduling-gap-secs": 1, "git-bot-username": "bot"}}"#).unwrap();

        let config = OperatorConfig::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.scheduling_gap_secs, 1);
        assert_eq!(config.git_bot_username, "bot");
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "max-pipeline-run = 0").unwrap();

        let err = OperatorConfig::load(Some(temp_file.path())).unwrap_err();
        assert!(err.to_string().contains("max-pipeline-run"));
    }

    #[test]
    fn test_rejects_mail_without_sender() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "[mail]\nenabled = true").unwrap();

        assert!(OperatorConfig::load(Some(temp_file.path())).is_err());
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let result = OperatorConfig::load(Some(Path::new("does-not-exist.toml")));
        assert!(result.is_err());
    }
}
