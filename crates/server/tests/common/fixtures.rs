//! Test fixtures: upload contexts, GitHub payloads and request helpers.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::{Value, json};
use tower::ServiceExt;

pub const OWNER: &str = "octo";
pub const REPO: &str = "widgets";
pub const RUN_ID: u64 = 7;
pub const RUN_ATTEMPT: u32 = 1;
pub const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

/// Run page fixtures captured from GitHub's markup.
pub const RUN_PAGE_RUNNING: &str = include_str!("../fixtures/run_page_running.html");
#[allow(dead_code)]
pub const RUN_PAGE_MIXED: &str = include_str!("../fixtures/run_page_mixed.html");
#[allow(dead_code)]
pub const RUN_PAGE_BOTH_FLAGS: &str = include_str!("../fixtures/run_page_both_flags.html");

/// A CI context for job `job` of run 7, attempt 1, pointing at `github`.
#[allow(dead_code)]
pub fn context(github: &str, job: &str) -> Value {
    json!({
        "ref": "refs/heads/main",
        "sha": SHA,
        "runId": RUN_ID,
        "runAttempt": RUN_ATTEMPT,
        "job": job,
        "repository": format!("{OWNER}/{REPO}"),
        "githubOrigin": github,
        "githubApiUrl": github,
        "githubRetentionDays": 30,
    })
}

/// A `bulk` upload event.
#[allow(dead_code)]
pub fn bulk_request(context: Value, files: &[&str], github_token: Option<&str>) -> Value {
    json!({
        "type": "bulk",
        "callbackUrl": "http://artifacts.test/upload",
        "clientPayload": {
            "githubToken": github_token,
            "context": context,
        },
        "files": files
            .iter()
            .map(|f| json!({ "localPath": f, "multipart": false }))
            .collect::<Vec<_>>(),
    })
}

/// A REST "list jobs for a workflow run attempt" body.
#[allow(dead_code)]
pub fn api_jobs(jobs: &[(u64, &str, &str, Option<&str>)]) -> Value {
    json!({
        "total_count": jobs.len(),
        "jobs": jobs
            .iter()
            .map(|(id, name, status, conclusion)| json!({
                "id": id,
                "name": name,
                "status": status,
                "conclusion": conclusion,
            }))
            .collect::<Vec<_>>(),
    })
}

/// Path of the jobs endpoint for run 7, attempt 1.
#[allow(dead_code)]
pub fn jobs_path() -> String {
    format!("/repos/{OWNER}/{REPO}/actions/runs/{RUN_ID}/attempts/{RUN_ATTEMPT}/jobs")
}

/// Path of the run page for run 7, attempt 1.
#[allow(dead_code)]
pub fn run_page_path() -> String {
    format!("/{OWNER}/{REPO}/actions/runs/{RUN_ID}/attempts/{RUN_ATTEMPT}")
}

/// Send a request and collect status, headers and body.
#[allow(dead_code)]
pub async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let (status, _, bytes) = send(router, builder.body(body).unwrap()).await;
    let json: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}
