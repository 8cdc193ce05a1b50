//! Live adapter for the `IssueClient` port using the GitHub REST API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Credential;
use crate::error::{Error, Result};
use crate::ports::issues::{
    Issue, IssueClient, IssueClientFactory, IssueFuture, IssueState, NewIssue,
};
use crate::resource::RepoRef;

const GITHUB_API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// Issue object as returned by the GitHub issues endpoints.
#[derive(Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: IssueState,
    updated_at: String,
    /// Present when the "issue" is really a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<GithubIssue> for Issue {
    fn from(raw: GithubIssue) -> Self {
        Self {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            state: raw.state,
            updated_at: raw.updated_at,
        }
    }
}

/// Builds [`GithubIssueClient`]s that share one HTTP connection pool.
pub struct GithubClientFactory {
    http: Client,
    api_base: String,
}

impl GithubClientFactory {
    /// Creates a factory for the API rooted at `api_base`
    /// (e.g. `https://api.github.com/repos`).
    ///
    /// Every request carries the credential as a bearer token and fails with a
    /// transport error once `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the credential is not a valid header
    /// value or the HTTP client cannot be built.
    pub fn new(api_base: &str, credential: &Credential, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-reconciler"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(GITHUB_API_VERSION));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credential.expose().trim()))
            .map_err(|_| Error::config("credential contains characters not allowed in a header"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, api_base: api_base.trim_end_matches('/').to_string() })
    }
}

impl IssueClientFactory for GithubClientFactory {
    fn client_for(&self, repo: &RepoRef) -> Result<Box<dyn IssueClient>> {
        Ok(Box::new(GithubIssueClient {
            http: self.http.clone(),
            issues_url: format!("{}/{}/{}/issues", self.api_base, repo.owner, repo.name),
        }))
    }
}

/// Issue client bound to one GitHub repository.
pub struct GithubIssueClient {
    http: Client,
    issues_url: String,
}

impl GithubIssueClient {
    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
        expected: StatusCode,
    ) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::transport(operation, "request timed out")
            } else {
                Error::transport(operation, format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(
                operation,
                format!(
                    "expected status {}, got {}: {}",
                    expected.as_u16(),
                    status.as_u16(),
                    body.trim()
                ),
            ));
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| Error::transport(operation, format!("failed to decode response: {e}")))
    }

    fn issue_url(&self, number: u64) -> String {
        format!("{}/{number}", self.issues_url)
    }
}

impl IssueClient for GithubIssueClient {
    fn find_issue<'a>(&'a self, title: &'a str) -> IssueFuture<'a, Option<Issue>> {
        Box::pin(async move {
            let per_page = PAGE_SIZE.to_string();
            let mut page = 1_u32;
            loop {
                let page_param = page.to_string();
                let request = self.http.get(&self.issues_url).query(&[
                    ("state", "all"),
                    ("per_page", per_page.as_str()),
                    ("page", page_param.as_str()),
                ]);
                let response = self.send("find", request, StatusCode::OK).await?;
                let chunk: Vec<GithubIssue> = Self::decode("find", response).await?;
                let chunk_len = chunk.len();

                let found = chunk
                    .into_iter()
                    .filter(|i| i.pull_request.is_none())
                    .find(|i| i.title == title);
                if let Some(found) = found {
                    debug!(number = found.number, page, "matched issue by title");
                    return Ok(Some(found.into()));
                }
                if chunk_len < PAGE_SIZE {
                    return Ok(None);
                }
                page = page.saturating_add(1);
            }
        })
    }

    fn create_issue<'a>(&'a self, issue: &'a NewIssue) -> IssueFuture<'a, Issue> {
        Box::pin(async move {
            let request = self.http.post(&self.issues_url).json(issue);
            let response = self.send("create", request, StatusCode::CREATED).await?;
            let created: GithubIssue = Self::decode("create", response).await?;
            Ok(created.into())
        })
    }

    fn edit_issue<'a>(&'a self, number: u64, body: &'a str) -> IssueFuture<'a, Issue> {
        Box::pin(async move {
            let request = self.http.patch(self.issue_url(number)).json(&json!({ "body": body }));
            let response = self.send("edit", request, StatusCode::OK).await?;
            let edited: GithubIssue = Self::decode("edit", response).await?;
            Ok(edited.into())
        })
    }

    fn close_issue(&self, number: u64) -> IssueFuture<'_, ()> {
        Box::pin(async move {
            let request =
                self.http.patch(self.issue_url(number)).json(&json!({ "state": "closed" }));
            self.send("close", request, StatusCode::OK).await?;
            Ok(())
        })
    }
}
