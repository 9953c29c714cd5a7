//! REST client for the operator's subresource API, used by the CLI.

use std::path::PathBuf;

use log::debug;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Token;
use crate::error::{OperatorError, Result};

const API_PREFIX: &str = "apis/cicdapi.tmax.io/v1";
const CONFIGS: &str = "integrationconfigs";
const APPROVALS: &str = "approvals";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunPreBody<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    base_branch: &'a str,
    head_branch: &'a str,
}

#[derive(Debug, Serialize)]
struct RunPostBody<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    branch: &'a str,
}

#[derive(Debug, Serialize)]
struct ApprovalBody<'a> {
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookInfo {
    pub url: String,
    pub secret: String,
}

/// Where the token is read from when none is passed explicitly.
pub fn default_token_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cicd-operator").join("token"))
}

/// Reads a token file, ignoring surrounding whitespace.
pub fn read_token_file(path: &std::path::Path) -> Result<Option<Token>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let raw = raw.trim();
            Ok((!raw.is_empty()).then(|| Token::from(raw)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub struct ApiClient {
    client: Client,
    server: Url,
    namespace: String,
    token: Option<Token>,
}

impl ApiClient {
    pub fn new(server: &str, namespace: &str, token: Option<Token>) -> Result<Self> {
        let mut server = Url::parse(server)
            .map_err(|e| OperatorError::Config(format!("invalid server url '{server}': {e}")))?;
        if !server.path().ends_with('/') {
            let path = format!("{}/", server.path());
            server.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("cicd-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            server,
            namespace: namespace.to_string(),
            token,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn url(&self, resource: &str, name: &str, subresource: &str) -> Result<Url> {
        let path = format!(
            "{}/namespaces/{}/{}/{}/{}",
            API_PREFIX,
            urlencoding::encode(&self.namespace),
            resource,
            urlencoding::encode(name),
            subresource
        );
        self.server
            .join(&path)
            .map_err(|e| OperatorError::Config(format!("invalid request path '{path}': {e}")))
    }

    /// Sends one request and returns the body, turning a non-2xx response
    /// into [`OperatorError::ApiError`] with the server's message.
    async fn call<B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<String> {
        debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            return Ok(text);
        }

        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or(text);
        Err(OperatorError::ApiError {
            status: status.as_u16(),
            message,
        })
    }

    /// Triggers the config's preSubmit jobs for a pull request.
    pub async fn run_pre(&self, config: &str, head_branch: &str, base_branch: &str) -> Result<()> {
        let body = RunPreBody {
            base_branch,
            head_branch,
        };
        let url = self.url(CONFIGS, config, "runpre")?;
        self.call(Method::POST, url, Some(&body)).await.map(drop)
    }

    /// Triggers the config's postSubmit jobs for a push.
    pub async fn run_post(&self, config: &str, branch: &str) -> Result<()> {
        let url = self.url(CONFIGS, config, "runpost")?;
        self.call(Method::POST, url, Some(&RunPostBody { branch }))
            .await
            .map(drop)
    }

    pub async fn approve(&self, approval: &str, reason: &str) -> Result<()> {
        self.decide(approval, "approve", reason).await
    }

    pub async fn reject(&self, approval: &str, reason: &str) -> Result<()> {
        self.decide(approval, "reject", reason).await
    }

    async fn decide(&self, approval: &str, subresource: &str, reason: &str) -> Result<()> {
        let url = self.url(APPROVALS, approval, subresource)?;
        self.call(Method::PUT, url, Some(&ApprovalBody { reason }))
            .await
            .map(drop)
    }

    pub async fn webhook_info(&self, config: &str) -> Result<WebhookInfo> {
        let url = self.url(CONFIGS, config, "webhookurl")?;
        let body = self.call::<()>(Method::GET, url, None).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tempfile::TempDir;

    fn client(server: &mockito::Server, token: Option<&str>) -> ApiClient {
        ApiClient::new(&server.url(), "ci", token.map(Token::from)).unwrap()
    }

    mod decide {
        use super::*;

        #[tokio::test]
        async fn approve_puts_reason_with_bearer_token() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("PUT", "/apis/cicdapi.tmax.io/v1/namespaces/ci/approvals/deploy/approve")
                .match_header("authorization", "Bearer abc")
                .match_body(Matcher::Json(serde_json::json!({"reason": "looks good"})))
                .with_status(200)
                .with_body("{}")
                .create_async()
                .await;

            client(&server, Some("abc"))
                .approve("deploy", "looks good")
                .await
                .unwrap();

            mock.assert_async().await;
        }

        #[tokio::test]
        async fn reject_surfaces_server_message() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("PUT", "/apis/cicdapi.tmax.io/v1/namespaces/ci/approvals/deploy/reject")
                .with_status(400)
                .with_body(r#"{"message": "approval deploy is already decided"}"#)
                .create_async()
                .await;

            let err = client(&server, None)
                .reject("deploy", "no")
                .await
                .unwrap_err();

            match err {
                OperatorError::ApiError { status, message } => {
                    assert_eq!(status, 400);
                    assert_eq!(message, "approval deploy is already decided");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn non_json_error_body_is_kept_verbatim() {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("PUT", Matcher::Any)
                .with_status(502)
                .with_body("bad gateway")
                .create_async()
                .await;

            let err = client(&server, None).approve("x", "y").await.unwrap_err();

            assert!(err.to_string().contains("bad gateway"));
        }
    }

    mod run {
        use super::*;

        #[tokio::test]
        async fn pre_posts_branches() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("POST", "/apis/cicdapi.tmax.io/v1/namespaces/ci/integrationconfigs/sample/runpre")
                .match_body(Matcher::Json(
                    serde_json::json!({"baseBranch": "main", "headBranch": "feature"}),
                ))
                .with_status(200)
                .create_async()
                .await;

            client(&server, None)
                .run_pre("sample", "feature", "main")
                .await
                .unwrap();

            mock.assert_async().await;
        }

        #[tokio::test]
        async fn post_omits_empty_branch() {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("POST", "/apis/cicdapi.tmax.io/v1/namespaces/ci/integrationconfigs/sample/runpost")
                .match_body(Matcher::Json(serde_json::json!({})))
                .with_status(200)
                .create_async()
                .await;

            client(&server, None).run_post("sample", "").await.unwrap();

            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn webhook_info_parses_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/apis/cicdapi.tmax.io/v1/namespaces/ci/integrationconfigs/sample/webhookurl")
            .with_status(200)
            .with_body(r#"{"url": "http://ci.example.com/webhook/ci/sample", "secret": "s3cret"}"#)
            .create_async()
            .await;

        let info = client(&server, None).webhook_info("sample").await.unwrap();

        assert_eq!(info.url, "http://ci.example.com/webhook/ci/sample");
        assert_eq!(info.secret, "s3cret");
    }

    mod read_token_file {
        use super::*;

        #[test]
        fn trims_contents() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("token");
            std::fs::write(&path, "  abc\n").unwrap();

            assert_eq!(read_token_file(&path).unwrap(), Some(Token::from("abc")));
        }

        #[test]
        fn missing_or_empty_file_is_none() {
            let dir = TempDir::new().unwrap();
            assert!(read_token_file(&dir.path().join("absent")).unwrap().is_none());

            let empty = dir.path().join("empty");
            std::fs::write(&empty, "\n").unwrap();
            assert!(read_token_file(&empty).unwrap().is_none());
        }
    }

    #[test]
    fn rejects_invalid_server_url() {
        assert!(ApiClient::new("not a url", "ci", None).is_err());
    }
}
