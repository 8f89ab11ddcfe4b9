//! Job status verification for CI upload requests.
//!
//! Two providers answer "which jobs does this run have, and what state are
//! they in": the REST API (needs a token) and the public run page (no token,
//! public repositories only). The page provider is tied to GitHub's markup
//! and fails loudly instead of guessing when the markup no longer matches.

use artifactci_core::{GithubActionsContext, Job, JobStatus};
use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Which provider produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatusMode {
    Api,
    Web,
}

impl JobStatusMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Web => "web",
        }
    }
}

/// Job status lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum JobStatusError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    /// The run page does not have exactly one status marker for a job.
    #[error("ambiguous status for job `{job}`: {flags} status markers")]
    ParseAmbiguity { job: String, flags: usize },
}

/// A failed lookup, tagged with the provider that failed.
#[derive(Debug)]
pub struct JobStatusFailure {
    pub mode: JobStatusMode,
    pub error: JobStatusError,
}

#[async_trait]
pub trait JobStatusProvider: Send + Sync {
    fn mode(&self) -> JobStatusMode;

    /// All jobs of the run attempt described by `context`.
    async fn list_jobs(&self, context: &GithubActionsContext) -> Result<Vec<Job>, JobStatusError>;
}

/// Lists jobs through `GET /repos/{repo}/actions/runs/{run}/attempts/{attempt}/jobs`.
pub struct ApiJobStatusProvider {
    http: reqwest::Client,
    token: String,
}

impl ApiJobStatusProvider {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiJobs {
    jobs: Vec<ApiJob>,
}

#[derive(Debug, Deserialize)]
struct ApiJob {
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[async_trait]
impl JobStatusProvider for ApiJobStatusProvider {
    fn mode(&self) -> JobStatusMode {
        JobStatusMode::Api
    }

    async fn list_jobs(&self, context: &GithubActionsContext) -> Result<Vec<Job>, JobStatusError> {
        let url = format!(
            "{}/repos/{}/actions/runs/{}/attempts/{}/jobs?per_page=100",
            context.github_api_url.trim_end_matches('/'),
            context.repository,
            context.run_id,
            context.run_attempt
        );
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobStatusError::Upstream {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body: ApiJobs = response.json().await?;
        Ok(body
            .jobs
            .into_iter()
            .map(|j| Job {
                id: Some(j.id),
                name: j.name,
                status: JobStatus::from_api(&j.status, j.conclusion.as_deref()),
            })
            .collect())
    }
}

/// Reads job statuses from the public run page.
pub struct WebJobStatusProvider {
    http: reqwest::Client,
}

impl WebJobStatusProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl JobStatusProvider for WebJobStatusProvider {
    fn mode(&self) -> JobStatusMode {
        JobStatusMode::Web
    }

    async fn list_jobs(&self, context: &GithubActionsContext) -> Result<Vec<Job>, JobStatusError> {
        let url = format!(
            "{}/actions/runs/{}/attempts/{}",
            context.html_url(),
            context.run_id,
            context.run_attempt
        );
        let response = self.http.get(&url).header(ACCEPT, "text/html").send().await?;
        let status = response.status();
        if !status.is_success() {
            let hint = if status == StatusCode::NOT_FOUND {
                "run page not found; private repositories need a githubToken".to_string()
            } else {
                response.text().await.unwrap_or_default()
            };
            return Err(JobStatusError::Upstream { status, body: hint });
        }
        let html = response.text().await?;
        parse_run_page(&html)
    }
}

static JOB_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a\b[^>]*?href="[^"]*/actions/runs/\d+/job/(\d+)[^"]*"[^>]*>(.*?)</a>"#)
        .expect("valid job link pattern")
});
static ARIA_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"aria-label="([^"]*)""#).expect("valid aria-label pattern"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Parse the job list out of a run page.
///
/// Each job is a link to `/actions/runs/{run}/job/{id}` carrying an icon whose
/// `aria-label` says `currently running`, `failed` or `completed successfully`.
/// A job with none or several of these markers is an error.
pub fn parse_run_page(html: &str) -> Result<Vec<Job>, JobStatusError> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();

    for caps in JOB_LINK.captures_iter(html) {
        let (Some(id), Some(inner)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(id) = id.as_str().parse::<u64>() else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        let inner = inner.as_str();

        let text = TAG.replace_all(inner, " ");
        let name = decode_entities(&text.split_whitespace().collect::<Vec<_>>().join(" "));

        let labels: Vec<String> = ARIA_LABEL
            .captures_iter(inner)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_lowercase()))
            .collect();
        let has = |needle: &str| labels.iter().any(|l| l.contains(needle));
        let running = has("currently running");
        let failed = has("failed");
        let succeeded = has("completed successfully");

        let status = match (running, failed, succeeded) {
            (true, false, false) => JobStatus::Running,
            (false, true, false) => JobStatus::Failed,
            (false, false, true) => JobStatus::Success,
            _ => {
                return Err(JobStatusError::ParseAmbiguity {
                    job: name,
                    flags: [running, failed, succeeded].iter().filter(|f| **f).count(),
                });
            }
        };

        jobs.push(Job {
            id: Some(id),
            name,
            status,
        });
    }

    Ok(jobs)
}

/// Pick the provider for a request: the API when a token is supplied,
/// otherwise the public run page.
pub fn provider_for(
    http: &reqwest::Client,
    github_token: Option<&str>,
) -> Box<dyn JobStatusProvider> {
    match github_token.filter(|t| !t.is_empty()) {
        Some(token) => Box::new(ApiJobStatusProvider::new(http.clone(), token)),
        None => Box::new(WebJobStatusProvider::new(http.clone())),
    }
}

/// List the jobs of the run described by `context`.
#[tracing::instrument(skip(http, github_token), fields(repository = %context.repository, run_id = context.run_id))]
pub async fn get_jobs_with_statuses(
    http: &reqwest::Client,
    context: &GithubActionsContext,
    github_token: Option<&str>,
) -> Result<Vec<Job>, JobStatusFailure> {
    let provider = provider_for(http, github_token);
    let mode = provider.mode();
    let timer = crate::metrics::JOB_STATUS_CHECK_DURATION
        .with_label_values(&[mode.as_str()])
        .start_timer();
    let result = provider.list_jobs(context).await;
    timer.observe_duration();

    match result {
        Ok(jobs) => {
            tracing::debug!(mode = mode.as_str(), jobs = jobs.len(), "job statuses loaded");
            Ok(jobs)
        }
        Err(error) => {
            tracing::warn!(mode = mode.as_str(), error = %error, "job status lookup failed");
            Err(JobStatusFailure { mode, error })
        }
    }
}
