use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderName};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::http::{reset_header, RestClient};
use super::{GitClient, GitResult, WebhookEntry};
use crate::auth::Token;

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
    #[serde(default)]
    url: String,
}

pub struct GitLabClient {
    rest: RestClient,
    repository: String,
}

impl GitLabClient {
    pub fn new(api_url: &str, repository: &str, token: Token) -> GitResult<Self> {
        let rest = RestClient::new(
            api_url,
            HeaderName::from_static("private-token"),
            token.as_str(),
            rate_limit,
        )?;

        Ok(Self {
            rest,
            repository: repository.to_string(),
        })
    }

    fn hooks_path(&self) -> String {
        format!(
            "api/v4/projects/{}/hooks",
            urlencoding::encode(&self.repository)
        )
    }
}

fn rate_limit(status: StatusCode, headers: &HeaderMap, body: &str) -> Option<Option<DateTime<Utc>>> {
    let limited = status == StatusCode::TOO_MANY_REQUESTS || body.contains("Rate limit exceeded");
    limited.then(|| reset_header(headers, "ratelimit-reset"))
}

#[async_trait]
impl GitClient for GitLabClient {
    async fn list_webhooks(&self) -> GitResult<Vec<WebhookEntry>> {
        let url = self.rest.url(&self.hooks_path())?;
        let hooks: Vec<Hook> = self.rest.get_paginated(url).await?;
        Ok(hooks
            .into_iter()
            .map(|h| WebhookEntry { id: h.id, url: h.url })
            .collect())
    }

    async fn register_webhook(&self, url: &str, secret: &str) -> GitResult<()> {
        let body = json!({
            "id": self.repository,
            "url": url,
            "token": secret,
            "enable_ssl_verification": false,
            "confidential_issues_events": true,
            "confidential_note_events": true,
            "deployment_events": true,
            "issues_events": true,
            "job_events": true,
            "merge_requests_events": true,
            "note_events": true,
            "pipeline_events": true,
            "push_events": true,
            "tag_push_events": true,
            "wiki_page_events": true,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitError;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> GitLabClient {
        GitLabClient::new(&server.url(), "group/project", Token::from("glpat")).unwrap()
    }

    #[tokio::test]
    async fn lists_hooks_of_encoded_project() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/group%2Fproject/hooks")
            .match_query(Matcher::Any)
            .match_header("private-token", "glpat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 11, "url": "http://ci/webhook/default/sample"}]"#)
            .create_async()
            .await;

        let hooks = client(&server).list_webhooks().await.unwrap();

        mock.assert_async().await;
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].id, 11);
    }

    #[tokio::test]
    async fn registers_hook_with_secret_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v4/projects/group%2Fproject/hooks")
            .match_body(Matcher::PartialJson(json!({
                "url": "http://ci/webhook/default/sample",
                "token": "s3",
                "push_events": true,
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        client(&server)
            .register_webhook("http://ci/webhook/default/sample", "s3")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_body_is_detected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v4/projects/group%2Fproject/hooks")
            .with_status(403)
            .with_header("ratelimit-reset", "1700000100")
            .with_body("Rate limit exceeded; see docs")
            .create_async()
            .await;

        let err = client(&server)
            .register_webhook("http://ci/webhook/default/sample", "s3")
            .await
            .unwrap_err();

        match err {
            GitError::RateLimited { reset_at } => {
                assert_eq!(reset_at.map(|t| t.timestamp()), Some(1_700_000_100));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn too_many_requests_without_reset() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/api/v4/projects/group%2Fproject/hooks/3")
            .with_status(429)
            .create_async()
            .await;

        let err = client(&server).delete_webhook(3).await.unwrap_err();

        assert!(matches!(err, GitError::RateLimited { reset_at: None }));
    }
}
