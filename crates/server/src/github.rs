//! GitHub REST client used for permission checks and artifact listing.

use artifactci_core::PermissionLevel;
use artifactci_core::config::GithubConfig;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Errors talking to GitHub.
#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("client setup failed: {0}")]
    Setup(String),
}

/// One artifact of a workflow run.
#[derive(Clone, Debug, Deserialize)]
pub struct RunArtifact {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub archive_download_url: Option<String>,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Deserialize)]
struct RunArtifactsPage {
    #[serde(default)]
    artifacts: Vec<RunArtifact>,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
}

/// Server-side GitHub client.
///
/// Constructed once at startup and shared through [`crate::AppState`].
#[derive(Clone, Debug)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    app_token: Option<String>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self, GithubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GithubError::Setup(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            app_token: config.app_token.clone(),
        })
    }

    /// Shared HTTP client, also used by the job-status providers.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.app_token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            None => req,
        }
    }

    /// Permission level of `login` on `owner/repo`.
    ///
    /// The owner is admin of their own repositories without a remote call.
    /// A 404 from GitHub means the login is not a collaborator.
    #[tracing::instrument(skip(self))]
    pub async fn collaborator_permission(
        &self,
        owner: &str,
        repo: &str,
        login: &str,
    ) -> Result<PermissionLevel, GithubError> {
        if owner.eq_ignore_ascii_case(login) {
            return Ok(PermissionLevel::Admin);
        }

        let url = format!(
            "{}/repos/{owner}/{repo}/collaborators/{login}/permission",
            self.api_url
        );
        let response = self.authorized(self.http.get(&url)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(PermissionLevel::None),
            status if status.is_success() => {
                let body: PermissionResponse = response.json().await?;
                Ok(PermissionLevel::parse(&body.permission))
            }
            status => Err(GithubError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Artifacts uploaded by a workflow run.
    #[tracing::instrument(skip(self))]
    pub async fn list_run_artifacts(
        &self,
        owner: &str,
        repo: &str,
        run_id: u64,
    ) -> Result<Vec<RunArtifact>, GithubError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/runs/{run_id}/artifacts?per_page=100",
            self.api_url
        );
        let response = self.authorized(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GithubError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        let page: RunArtifactsPage = response.json().await?;
        Ok(page.artifacts)
    }
}
