//! Remote git server clients, limited to webhook management.

pub mod github;
pub mod gitlab;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::{GitConfig, GitType, IntegrationConfig, ObjectKey, Secret};
use crate::auth::Token;
use crate::error::{OperatorError, Result};
use crate::store::ObjectStore;

pub use github::GitHubClient;
pub use gitlab::GitLabClient;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git API rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("git API request failed (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid git API URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid git token: {0}")]
    InvalidToken(String),
}

pub type GitResult<T> = std::result::Result<T, GitError>;

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|t| format!(", resets at {}", t.to_rfc3339()))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEntry {
    pub id: u64,
    pub url: String,
}

/// Webhook operations on one repository.
#[async_trait]
pub trait GitClient: Send + Sync {
    async fn list_webhooks(&self) -> GitResult<Vec<WebhookEntry>>;

    /// Registers `url` for every event, signed with `secret`.
    async fn register_webhook(&self, url: &str, secret: &str) -> GitResult<()>;

    async fn delete_webhook(&self, id: u64) -> GitResult<()>;
}

/// Builds a [`GitClient`] for a config's git settings.
pub trait GitClientFactory: Send + Sync {
    fn client(&self, git: &GitConfig, token: Token) -> GitResult<Arc<dyn GitClient>>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultGitClientFactory;

impl GitClientFactory for DefaultGitClientFactory {
    fn client(&self, git: &GitConfig, token: Token) -> GitResult<Arc<dyn GitClient>> {
        Ok(match git.type_ {
            GitType::Github => Arc::new(GitHubClient::new(
                git.api_url(),
                &git.repository,
                token,
            )?),
            GitType::Gitlab => Arc::new(GitLabClient::new(
                git.api_url(),
                &git.repository,
                token,
            )?),
        })
    }
}

/// Reads the config's git token, inline or from the referenced Secret key.
///
/// Returns `Ok(None)` when no token is configured.
///
/// # Errors
///
/// Returns an error if the referenced Secret or key does not exist.
pub async fn resolve_token(
    config: &IntegrationConfig,
    secrets: &dyn ObjectStore<Secret>,
) -> Result<Option<Token>> {
    let Some(token) = &config.spec.git.token else {
        return Ok(None);
    };

    if let Some(value) = token.value.as_deref().filter(|v| !v.is_empty()) {
        return Ok(Some(Token::from(value)));
    }

    let Some(reference) = &token.value_from else {
        return Ok(None);
    };

    let key = ObjectKey::new(&config.metadata.namespace, &reference.name);
    let secret = secrets.get(&key).await?;
    secret
        .data
        .get(&reference.key)
        .map(|v| Some(Token::from(v.as_str())))
        .ok_or_else(|| {
            OperatorError::Config(format!(
                "secret {} has no key {}",
                key, reference.key
            ))
        })
}
