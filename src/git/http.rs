use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LINK};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::{GitError, GitResult};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 2;
const PAGE_SIZE: usize = 100;

/// Decides whether a failed response is a rate limit, and if so when it resets.
pub(super) type RateLimitCheck = fn(StatusCode, &HeaderMap, &str) -> Option<Option<DateTime<Utc>>>;

/// Token-authenticated JSON client shared by the providers.
pub(super) struct RestClient {
    client: Client,
    base: String,
    auth_header: HeaderName,
    auth_value: HeaderValue,
    rate_limit: RateLimitCheck,
}

pub(super) struct Response {
    pub headers: HeaderMap,
    pub body: String,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        auth_header: HeaderName,
        auth_value: &str,
        rate_limit: RateLimitCheck,
    ) -> GitResult<Self> {
        Url::parse(base_url).map_err(|e| GitError::InvalidUrl(format!("{base_url}: {e}")))?;

        let mut auth_value = HeaderValue::from_str(auth_value)
            .map_err(|e| GitError::InvalidToken(e.to_string()))?;
        auth_value.set_sensitive(true);

        let client = Client::builder()
            .user_agent(concat!("cicd-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
            auth_header,
            auth_value,
            rate_limit,
        })
    }

    pub fn url(&self, path: &str) -> GitResult<Url> {
        let raw = format!("{}/{}", self.base, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| GitError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Sends one request, retrying connection failures and server errors.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> GitResult<Response> {
        let mut retry_count = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(self.auth_header.clone(), self.auth_value.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if (e.is_connect() || e.is_timeout()) && retry_count < MAX_RETRIES => {
                    warn!(
                        "Network error ({}), retrying in {}s ({}/{})...",
                        e,
                        RETRY_DELAY_SECONDS,
                        retry_count + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            if status.is_success() {
                return Ok(Response { headers, body });
            }

            if let Some(reset_at) = (self.rate_limit)(status, &headers, &body) {
                return Err(GitError::RateLimited { reset_at });
            }

            if status.is_server_error() && retry_count < MAX_RETRIES {
                warn!(
                    "Git API error (status {status}). Waiting {RETRY_DELAY_SECONDS} seconds before retry {}/{}...",
                    retry_count + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                retry_count += 1;
                continue;
            }

            return Err(GitError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
    }

    /// GETs every page of a list endpoint by following `Link: rel="next"`.
    pub async fn get_paginated<T: DeserializeOwned>(&self, mut url: Url) -> GitResult<Vec<T>> {
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string());

        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = self.send(Method::GET, url, None).await?;
            let page: Vec<T> = serde_json::from_str(&response.body).map_err(|e| GitError::Api {
                status: 200,
                message: format!("unexpected response body: {e}"),
            })?;
            items.extend(page);

            next = response
                .headers
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link)
                .and_then(|raw| Url::parse(&raw).ok());
        }

        Ok(items)
    }
}

/// Extracts the `rel="next"` target of a `Link` header.
pub(super) fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        is_next.then(|| {
            target
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

/// Parses a unix-seconds reset header.
pub(super) fn reset_header(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod next_link {
        use super::*;

        #[test]
        fn finds_next_among_relations() {
            let header = r#"<https://api.github.com/repos/o/r/hooks?page=1>; rel="prev", <https://api.github.com/repos/o/r/hooks?page=3>; rel="next", <https://api.github.com/repos/o/r/hooks?page=5>; rel="last""#;

            assert_eq!(
                next_link(header).as_deref(),
                Some("https://api.github.com/repos/o/r/hooks?page=3")
            );
        }

        #[test]
        fn none_on_last_page() {
            let header = r#"<https://gitlab.com/api/v4/projects/1/hooks?page=1>; rel="first""#;

            assert!(next_link(header).is_none());
        }
    }

    #[test]
    fn reset_header_reads_unix_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        let reset = reset_header(&headers, "x-ratelimit-reset").unwrap();

        assert_eq!(reset.timestamp(), 1_700_000_000);
        assert!(reset_header(&headers, "ratelimit-reset").is_none());
    }
}
