use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::condition::Conditions;
use super::job::{JobTask, JobType};
use super::meta::{impl_object, ObjectMeta};
use crate::error::{OperatorError, Result};

pub const GITHUB_DEFAULT_API_URL: &str = "https://api.github.com";
pub const GITHUB_DEFAULT_HOST: &str = "https://github.com";
pub const GITLAB_DEFAULT_API_URL: &str = "https://gitlab.com";

pub const CONDITION_WEBHOOK_REGISTERED: &str = "WebhookRegistered";
pub const CONDITION_READY: &str = "Ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GitType {
    #[default]
    Github,
    Gitlab,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Access token for the remote git server, inline or from a Secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<SecretKeyRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(rename = "type")]
    pub type_: GitType,

    /// `<org>/<repo>`
    pub repository: String,

    /// Override for self-hosted servers; must not contain the repository path
    #[serde(default)]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<GitToken>,
}

impl GitConfig {
    pub fn api_url(&self) -> &str {
        if !self.api_url.is_empty() {
            return &self.api_url;
        }
        match self.type_ {
            GitType::Github => GITHUB_DEFAULT_API_URL,
            GitType::Gitlab => GITLAB_DEFAULT_API_URL,
        }
    }

    /// `scheme://host` of the web-facing git server.
    pub fn git_host(&self) -> Result<String> {
        let api = self.api_url();
        let raw = if api == GITHUB_DEFAULT_API_URL {
            GITHUB_DEFAULT_HOST
        } else {
            api
        };

        let url = Url::parse(raw)
            .map_err(|e| OperatorError::Config(format!("invalid git api url '{raw}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| OperatorError::Config(format!("git api url '{raw}' has no host")))?;

        Ok(match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.as_ref().is_some_and(|t| {
            t.value.as_deref().is_some_and(|v| !v.is_empty()) || t.value_from.is_some()
        })
    }
}

/// A task triggered on a cron schedule rather than a git event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Periodic {
    pub cron: String,
    #[serde(flatten)]
    pub job: JobTask,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigJobs {
    #[serde(default)]
    pub pre_submit: Vec<JobTask>,
    #[serde(default)]
    pub post_submit: Vec<JobTask>,
    #[serde(default)]
    pub periodic: Vec<Periodic>,
}

impl ConfigJobs {
    pub fn for_type(&self, job_type: JobType) -> Vec<JobTask> {
        match job_type {
            JobType::PreSubmit => self.pre_submit.clone(),
            JobType::PostSubmit => self.post_submit.clone(),
            JobType::Periodic => self.periodic.iter().map(|p| p.job.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeQuery {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub block_labels: Vec<String>,
}

/// Merge automation rules. Stored and served, not executed by this crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    #[serde(default)]
    pub method: MergeMethod,
    #[serde(default)]
    pub commit_template: String,
    #[serde(default)]
    pub query: MergeQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDefaults {
    #[serde(default)]
    pub email_receivers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfigSpec {
    pub git: GitConfig,
    #[serde(default)]
    pub jobs: ConfigJobs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_config: Option<MergeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotificationDefaults>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfigStatus {
    /// Shared secret used to sign inbound webhooks
    #[serde(default)]
    pub secrets: String,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub metadata: ObjectMeta,
    pub spec: IntegrationConfigSpec,
    #[serde(default)]
    pub status: IntegrationConfigStatus,
}

impl_object!(IntegrationConfig, "IntegrationConfig");

impl IntegrationConfig {
    /// Callback URL registered on the git server.
    pub fn webhook_url(&self, external_hostname: &str) -> String {
        format!(
            "http://{}/webhook/{}/{}",
            external_hostname, self.metadata.namespace, self.metadata.name
        )
    }

    pub fn service_account_name(&self) -> String {
        format!("{}-sa", self.metadata.name)
    }

    pub fn git_secret_name(&self) -> String {
        format!("{}-git-credential", self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(type_: GitType, api_url: &str) -> GitConfig {
        GitConfig {
            type_,
            repository: "org/repo".to_string(),
            api_url: api_url.to_string(),
            token: None,
        }
    }

    mod git_host {
        use super::*;

        #[test]
        fn maps_default_github_api_to_web_host() {
            assert_eq!(git(GitType::Github, "").git_host().unwrap(), "https://github.com");
        }

        #[test]
        fn uses_gitlab_default() {
            assert_eq!(git(GitType::Gitlab, "").git_host().unwrap(), "https://gitlab.com");
        }

        #[test]
        fn strips_path_from_self_hosted_url() {
            let config = git(GitType::Gitlab, "http://git.internal:8080/api/v4");
            assert_eq!(config.git_host().unwrap(), "http://git.internal:8080");
        }

        #[test]
        fn rejects_unparseable_url() {
            assert!(git(GitType::Github, "not a url").git_host().is_err());
        }
    }

    mod has_token {
        use super::*;

        #[test]
        fn false_when_missing_or_empty() {
            let mut config = git(GitType::Github, "");
            assert!(!config.has_token());

            config.token = Some(GitToken {
                value: Some(String::new()),
                value_from: None,
            });
            assert!(!config.has_token());
        }

        #[test]
        fn true_for_value_or_secret_ref() {
            let mut config = git(GitType::Github, "");
            config.token = Some(GitToken {
                value: None,
                value_from: Some(SecretKeyRef {
                    name: "tok".to_string(),
                    key: "token".to_string(),
                }),
            });
            assert!(config.has_token());
        }
    }

    #[test]
    fn parses_yaml_manifest() {
        let yaml = r#"
metadata:
  name: sample
  namespace: default
spec:
  git:
    type: gitlab
    repository: org/repo
    token:
      value: abc
  jobs:
    preSubmit:
      - name: test
        image: golang:1.22
        script: go test ./...
    periodic:
      - name: nightly
        cron: "0 3 * * *"
        image: alpine
"#;
        let config: IntegrationConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.spec.git.type_, GitType::Gitlab);
        assert_eq!(config.spec.jobs.pre_submit[0].name, "test");
        assert_eq!(config.spec.jobs.periodic[0].cron, "0 3 * * *");
        assert_eq!(config.spec.jobs.periodic[0].job.name, "nightly");
        assert_eq!(
            config.webhook_url("ci.example.com"),
            "http://ci.example.com/webhook/default/sample"
        );
    }
}
