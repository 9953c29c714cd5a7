use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::http::{reset_header, RestClient};
use super::{GitClient, GitResult, WebhookEntry};
use crate::auth::Token;

#[derive(Debug, Deserialize)]
struct HookConfig {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
    config: HookConfig,
}

/// GitHub REST client for one repository.
pub struct GitHubClient {
    rest: RestClient,
    repository: String,
}

impl GitHubClient {
    /// Create a new GitHub client.
    ///
    /// # Arguments
    ///
    /// * `api_url` - GitHub API base URL (e.g., "https://api.github.com")
    /// * `repository` - `<owner>/<repo>`
    /// * `token` - Personal access token
    pub fn new(api_url: &str, repository: &str, token: Token) -> GitResult<Self> {
        let rest = RestClient::new(
            api_url,
            AUTHORIZATION,
            &format!("token {}", token.as_str()),
            rate_limit,
        )?;

        Ok(Self {
            rest,
            repository: repository.to_string(),
        })
    }

    fn hooks_path(&self) -> String {
        format!("repos/{}/hooks", self.repository)
    }
}

fn rate_limit(status: StatusCode, headers: &HeaderMap, _body: &str) -> Option<Option<DateTime<Utc>>> {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    let limited = (status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS)
        && exhausted;
    limited.then(|| reset_header(headers, "x-ratelimit-reset"))
}

#[async_trait]
impl GitClient for GitHubClient {
    async fn list_webhooks(&self) -> GitResult<Vec<WebhookEntry>> {
        let url = self.rest.url(&self.hooks_path())?;
        let hooks: Vec<Hook> = self.rest.get_paginated(url).await?;
        Ok(hooks
            .into_iter()
            .map(|h| WebhookEntry {
                id: h.id,
                url: h.config.url,
            })
            .collect())
    }

    async fn register_webhook(&self, url: &str, secret: &str) -> GitResult<()> {
        let body = json!({
            "name": "web",
            "active": true,
            "events": ["*"],
            "config": {
                "url": url,
                "content_type": "json",
                "insecure_ssl": "0",
                "secret": secret,
            },
        });

        let endpoint = self.rest.url(&self.hooks_path())?;
        self.rest.send(Method::POST, endpoint, Some(&body)).await?;
        debug!("Registered webhook {} on {}", url, self.repository);
        Ok(())
    }

    async fn delete_webhook(&self, id: u64) -> GitResult<()> {
        let url = self.rest.url(&format!("{}/{}", self.hooks_path(), id))?;
        self.rest.send(Method::DELETE, url, None).await?;
        Ok(())
    }
}
