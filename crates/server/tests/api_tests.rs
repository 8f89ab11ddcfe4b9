//! Integration tests for HTTP API endpoints.

mod common;

use artifactci_core::{TokenPayload, UploadRequestId};
use artifactci_metadata::models::{ArtifactIdentifierRow, ArtifactRow, RepoRef};
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::http::{Request, StatusCode};
use common::*;
use hmac::{Hmac, Mac};
use httpmock::prelude::*;
use serde_json::{Value, json};
use sha2::Sha256;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

const OWNER_LOGIN: &str = "octo";

/// Mock the REST jobs endpoint with `test` running next to a finished `build`.
async fn mock_running_jobs(server: &TestServer) {
    let body = api_jobs(&[
        (1001, "build", "completed", Some("success")),
        (1002, "test", "in_progress", None),
    ]);
    server
        .github
        .mock_async(|when, then| {
            when.method(GET).path(jobs_path());
            then.status(200)
                .header("content-type", "application/json")
                .json_body(body);
        })
        .await;
}

async fn mock_run_page(server: &TestServer, status: u16, html: &str) {
    let html = html.to_string();
    server
        .github
        .mock_async(|when, then| {
            when.method(GET).path(run_page_path());
            then.status(status)
                .header("content-type", "text/html; charset=utf-8")
                .body(html);
        })
        .await;
}

async fn post_bulk(server: &TestServer, request: Value) -> (StatusCode, Value) {
    json_request(&server.router, "POST", "/upload", Some(request), &[]).await
}

/// Run a successful three-file bulk request and return its response.
async fn bulk_three_files(server: &TestServer) -> Value {
    mock_running_jobs(server).await;
    let request = bulk_request(
        context(&server.github_url(), "test"),
        &["index.html", "docs/a.txt", "img/logo.png"],
        Some("ghs_user"),
    );
    let (status, body) = post_bulk(server, request).await;
    assert_eq!(status, StatusCode::OK, "bulk failed: {body}");
    body
}

fn result_for<'a>(bulk: &'a Value, local_path: &str) -> &'a Value {
    bulk["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["localPath"] == local_path)
        .unwrap()
}

async fn put_blob(
    server: &TestServer,
    pathname: &str,
    token: Option<&str>,
    content_type: &str,
    body: &'static [u8],
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("PUT")
        .uri(format!("/blob/{pathname}"))
        .header(CONTENT_TYPE, content_type);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let (status, _, bytes) = send(&server.router, builder.body(Body::from(body)).unwrap()).await;
    (
        status,
        serde_json::from_slice(&bytes).unwrap_or(Value::Null),
    )
}

/// Wait for the background completion hook to record `pathname`.
async fn wait_for_upload(server: &TestServer, pathname: &str) {
    for _ in 0..100 {
        if server
            .metadata()
            .find_upload(pathname, OffsetDateTime::now_utc())
            .await
            .unwrap()
            .is_some()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("upload {pathname} was never recorded");
}

fn get(uri: &str, login: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(login) = login {
        builder = builder.header(IDENTITY_HEADER, login);
    }
    builder.body(Body::empty()).unwrap()
}

/// Register repository `octo/widgets` with artifact `name` under run 7 and branch main.
async fn seed_artifact(server: &TestServer, name: &str) -> Uuid {
    let metadata = server.metadata();
    let now = OffsetDateTime::now_utc();
    let repo = metadata
        .upsert_repository(
            &RepoRef {
                owner: OWNER.to_string(),
                name: REPO.to_string(),
                html_url: format!("https://github.com/{OWNER}/{REPO}"),
            },
            now,
        )
        .await
        .unwrap();
    let artifact = metadata
        .upsert_artifact(&ArtifactRow {
            artifact_id: Uuid::new_v4(),
            repo_id: repo.repo_id,
            external_id: 55,
            name: name.to_string(),
            installation_id: Some(9),
            download_url: None,
            visibility: "public".to_string(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    metadata
        .add_artifact_identifiers(&[
            ArtifactIdentifierRow {
                artifact_id: artifact.artifact_id,
                alias_type: "run".to_string(),
                value: RUN_ID.to_string(),
                created_at: now,
            },
            ArtifactIdentifierRow {
                artifact_id: artifact.artifact_id,
                alias_type: "branch".to_string(),
                value: "main".to_string(),
                created_at: now,
            },
        ])
        .await
        .unwrap();
    artifact.artifact_id
}

async fn put_entry(
    server: &TestServer,
    artifact_id: Uuid,
    entry: &str,
    content_type: &str,
    body: &'static [u8],
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/artifact/entries/{artifact_id}/{entry}"))
        .header(IDENTITY_HEADER, OWNER_LOGIN)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap();
    let (status, _, bytes) = send(&server.router, request).await;
    (
        status,
        serde_json::from_slice(&bytes).unwrap_or(Value::Null),
    )
}

// ============================================================================
// Bulk upload protocol
// ============================================================================

#[tokio::test]
async fn test_bulk_issues_one_token_per_file() {
    let server = TestServer::new().await;
    let body = bulk_three_files(&server).await;

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);

    let index = result_for(&body, "index.html");
    assert_eq!(index["pathname"], "octo/widgets/7/1/test/index.html");
    assert_eq!(
        index["viewUrl"],
        "http://artifacts.test/artifact/blob/octo/widgets/7/1/test/index.html"
    );
    assert_eq!(index["contentType"], "text/html");
    assert_eq!(result_for(&body, "img/logo.png")["contentType"], "image/png");

    let mut tokens: Vec<&str> = results
        .iter()
        .map(|r| r["clientToken"].as_str().unwrap())
        .collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 3, "client tokens must be distinct");

    assert_eq!(
        body["entrypoints"],
        json!(["http://artifacts.test/artifact/blob/octo/widgets/7/1/test"])
    );
}

#[tokio::test]
async fn test_bulk_tokens_carry_ledger_payload() {
    let server = TestServer::new().await;
    let body = bulk_three_files(&server).await;

    let token = result_for(&body, "docs/a.txt")["clientToken"]
        .as_str()
        .unwrap();
    let claims = server
        .state
        .signer
        .verify(token, OffsetDateTime::now_utc())
        .unwrap();
    assert_eq!(claims.pathname, "octo/widgets/7/1/test/docs/a.txt");
    assert_eq!(claims.allowed_content_types, vec!["text/plain".to_string()]);
    assert!(claims.add_random_suffix);

    let payload = TokenPayload::parse(&claims.token_payload).unwrap();
    assert_eq!(payload.retention_days, 30);
}

#[tokio::test]
async fn test_bulk_second_request_for_job_is_rejected() {
    let server = TestServer::new().await;
    bulk_three_files(&server).await;

    let request = bulk_request(
        context(&server.github_url(), "test"),
        &["other.txt"],
        Some("ghs_user"),
    );
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "duplicate_upload_request");
}

#[tokio::test]
async fn test_bulk_ambiguous_job_lists_candidates() {
    let server = TestServer::new().await;
    let body = api_jobs(&[
        (1, "test (ubuntu)", "in_progress", None),
        (2, "test (macos)", "in_progress", None),
    ]);
    server
        .github
        .mock_async(|when, then| {
            when.method(GET).path(jobs_path());
            then.status(200).json_body(body);
        })
        .await;

    let request = bulk_request(
        context(&server.github_url(), "test"),
        &["a.txt"],
        Some("ghs_user"),
    );
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ambiguous_job");
    assert_eq!(body["details"]["candidates"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_bulk_job_not_running_reports_jobs() {
    let server = TestServer::new().await;
    let body = api_jobs(&[(1002, "test", "completed", Some("success"))]);
    server
        .github
        .mock_async(|when, then| {
            when.method(GET).path(jobs_path());
            then.status(200).json_body(body);
        })
        .await;

    let request = bulk_request(
        context(&server.github_url(), "test"),
        &["a.txt"],
        Some("ghs_user"),
    );
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "job_not_running");
    assert_eq!(body["details"]["jobs"][0]["name"], "test");
    assert_eq!(body["details"]["jobs"][0]["status"], "success");
}

#[tokio::test]
async fn test_bulk_unknown_job() {
    let server = TestServer::new().await;
    mock_running_jobs(&server).await;

    let request = bulk_request(
        context(&server.github_url(), "deploy"),
        &["a.txt"],
        Some("ghs_user"),
    );
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "job_not_found");
    assert_eq!(body["details"]["jobs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_bulk_without_token_reads_run_page() {
    let server = TestServer::new().await;
    mock_run_page(&server, 200, RUN_PAGE_RUNNING).await;

    let request = bulk_request(context(&server.github_url(), "test"), &["a.txt"], None);
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bulk_run_page_with_failed_job() {
    let server = TestServer::new().await;
    mock_run_page(&server, 200, RUN_PAGE_MIXED).await;

    let request = bulk_request(context(&server.github_url(), "test"), &["a.txt"], None);
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "job_not_running");
    assert_eq!(body["details"]["jobs"][1]["status"], "failed");
}

#[tokio::test]
async fn test_bulk_run_page_with_conflicting_markers() {
    let server = TestServer::new().await;
    mock_run_page(&server, 200, RUN_PAGE_BOTH_FLAGS).await;

    let request = bulk_request(context(&server.github_url(), "test"), &["a.txt"], None);
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "job_status_parse_error");
}

#[tokio::test]
async fn test_bulk_run_page_missing_passes_status_through() {
    let server = TestServer::new().await;
    mock_run_page(&server, 404, "Not Found").await;

    let request = bulk_request(context(&server.github_url(), "test"), &["a.txt"], None);
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "upstream_error");
    assert!(body["message"].as_str().unwrap().contains("githubToken"));
}

#[tokio::test]
async fn test_bulk_rejected_api_token_is_a_client_error() {
    let server = TestServer::new().await;
    server
        .github
        .mock_async(|when, then| {
            when.method(GET).path(jobs_path());
            then.status(401).json_body(json!({ "message": "Bad credentials" }));
        })
        .await;

    let request = bulk_request(
        context(&server.github_url(), "test"),
        &["a.txt"],
        Some("ghs_revoked"),
    );
    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_bulk_untrusted_github_host() {
    let server = TestServer::new().await;
    let mut ctx = context(&server.github_url(), "test");
    ctx["githubApiUrl"] = json!("https://api.github.evil.example");

    let (status, body) = post_bulk(&server, bulk_request(ctx, &["a.txt"], Some("ghs_user"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("untrusted"));
}

#[tokio::test]
async fn test_bulk_validation_errors() {
    let server = TestServer::new().await;

    let mut bad_sha = context(&server.github_url(), "test");
    bad_sha["sha"] = json!("not-a-sha");
    let (status, _) = post_bulk(&server, bulk_request(bad_sha, &["a.txt"], None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let escaping = bulk_request(context(&server.github_url(), "test"), &["../etc/passwd"], None);
    let (status, _) = post_bulk(&server, escaping).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/upload",
        Some(json!({ "type": "nope" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

// ============================================================================
// Client-token hooks
// ============================================================================

#[tokio::test]
async fn test_bulk_times_out_on_slow_job_lookup() {
    let server = TestServer::with_config(|config| {
        config.upload.request_timeout_secs = 1;
        config.github.request_timeout_secs = 30;
    })
    .await;
    let body = api_jobs(&[(1002, "test", "in_progress", None)]);
    let mut slow = server
        .github
        .mock_async(|when, then| {
            when.method(GET).path(jobs_path());
            then.status(200)
                .header("content-type", "application/json")
                .json_body(body)
                .delay(Duration::from_secs(3));
        })
        .await;

    let request = bulk_request(
        context(&server.github_url(), "test"),
        &["index.html"],
        Some("ghs_user"),
    );
    let (status, body) = post_bulk(&server, request.clone()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{body}");
    assert_eq!(body["code"], "timeout");

    // The budget ran out before the ledger was written, so a retry goes through.
    slow.delete_async().await;
    mock_running_jobs(&server).await;
    let (status, body) = post_bulk(&server, request.clone()).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = post_bulk(&server, request).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
}

#[tokio::test]
async fn test_generate_client_token_requires_known_request() {
    let server = TestServer::new().await;
    let payload = TokenPayload {
        upload_request_id: UploadRequestId::new(),
        retention_days: 30,
    }
    .stringify();

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/upload",
        Some(json!({
            "type": "blob.generate-client-token",
            "payload": {
                "pathname": "octo/widgets/7/1/test/a.txt",
                "clientPayload": payload,
                "multipart": false,
            },
        })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_generate_client_token_scoped_to_job_prefix() {
    let server = TestServer::new().await;
    let bulk = bulk_three_files(&server).await;
    let token = result_for(&bulk, "index.html")["clientToken"]
        .as_str()
        .unwrap();
    let payload = server
        .state
        .signer
        .verify(token, OffsetDateTime::now_utc())
        .unwrap()
        .token_payload;

    let request = |pathname: &str| {
        json!({
            "type": "blob.generate-client-token",
            "payload": {
                "pathname": pathname,
                "clientPayload": payload,
            },
        })
    };

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/upload",
        Some(request("octo/widgets/7/1/lint/a.txt")),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_authorized");

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/upload",
        Some(request("octo/widgets/7/1/test/late/extra.txt")),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["allowedContentTypes"], json!(["text/plain"]));
    assert_eq!(body["addRandomSuffix"], true);
    assert!(body["clientToken"].as_str().is_some());
}

// ============================================================================
// Direct blob uploads
// ============================================================================

#[tokio::test]
async fn test_blob_upload_is_recorded_and_served() {
    let server = TestServer::new().await;
    let bulk = bulk_three_files(&server).await;
    let index = result_for(&bulk, "index.html");
    let pathname = index["pathname"].as_str().unwrap();

    let (status, blob) = put_blob(
        &server,
        pathname,
        index["clientToken"].as_str(),
        "text/html",
        b"<h1>report</h1>",
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{blob}");
    assert_eq!(blob["pathname"], pathname);
    let url = blob["url"].as_str().unwrap();
    assert!(url.starts_with("http://artifacts.test/blob/octo/widgets/7/1/test/index-"));
    assert!(url.ends_with(".html"));
    assert_eq!(blob["downloadUrl"], format!("{url}?download=1"));

    wait_for_upload(&server, pathname).await;

    let (status, headers, bytes) = send(
        &server.router,
        get(
            "/artifact/blob/octo/widgets/7/1/test/index.html",
            Some(OWNER_LOGIN),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"<h1>report</h1>");
    assert_eq!(headers[CONTENT_TYPE], "text/html");
    assert_eq!(headers[CACHE_CONTROL], "max-age=31536000, immutable");
    assert_eq!(headers["artifactci-path"], pathname);

    // The directory alias resolves to the same blob.
    let (status, _, bytes) = send(
        &server.router,
        get("/artifact/blob/octo/widgets/7/1/test", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"<h1>report</h1>");

    // Raw blob reads go through the suffixed key.
    let key = url.strip_prefix("http://artifacts.test").unwrap();
    let (status, _, bytes) = send(&server.router, get(key, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"<h1>report</h1>");
}

#[tokio::test]
async fn test_blob_upload_rejections() {
    let server = TestServer::new().await;
    let bulk = bulk_three_files(&server).await;
    let text = result_for(&bulk, "docs/a.txt");
    let token = text["clientToken"].as_str();
    let pathname = text["pathname"].as_str().unwrap();

    let (status, _) = put_blob(&server, pathname, None, "text/plain", b"x").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = put_blob(&server, pathname, Some("garbage"), "text/plain", b"x").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = put_blob(
        &server,
        "octo/widgets/7/1/test/docs/b.txt",
        token,
        "text/plain",
        b"x",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_authorized");

    let (status, _) = put_blob(&server, pathname, token, "image/png", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_completed_event_records_aliases() {
    let server = TestServer::new().await;
    let bulk = bulk_three_files(&server).await;
    let index = result_for(&bulk, "index.html");
    let token = index["clientToken"].as_str().unwrap();
    let pathname = index["pathname"].as_str().unwrap();

    let event = json!({
        "type": "blob.upload-completed",
        "blob": {
            "url": "http://artifacts.test/blob/octo/widgets/7/1/test/index-abc.html",
            "downloadUrl": "http://artifacts.test/blob/octo/widgets/7/1/test/index-abc.html?download=1",
            "pathname": pathname,
            "contentType": "text/html; charset=utf-8",
            "contentDisposition": "inline; filename=\"index.html\"",
        },
    });

    let (status, _) =
        json_request(&server.router, "POST", "/upload", Some(event.clone()), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let auth = format!("Bearer {token}");
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/upload",
        Some(event),
        &[("Authorization", auth.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({ "ok": true, "rows": 2 }));

    let metadata = server.metadata();
    let now = OffsetDateTime::now_utc();
    let row = metadata.find_upload(pathname, now).await.unwrap().unwrap();
    assert_eq!(row.mime_type, "text/html");
    assert!(row.expires_at > now + time::Duration::days(29));
    let dir = metadata
        .find_upload("octo/widgets/7/1/test", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dir.blob_url, row.blob_url);
}

// ============================================================================
// Artifact resolution
// ============================================================================

#[tokio::test]
async fn test_artifact_resolution_lifecycle() {
    let server = TestServer::new().await;
    let artifact_id = seed_artifact(&server, "site").await;

    let (status, body) = json_request(
        &server.router,
        "GET",
        "/artifact/view/octo/widgets/run/7/site/docs/style.css",
        None,
        &[(IDENTITY_HEADER, OWNER_LOGIN)],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "not_uploaded_yet");
    assert_eq!(body["entry"], "docs/style.css");
    assert_eq!(
        body["uploadUrl"],
        format!("http://artifacts.test/artifact/entries/{artifact_id}/")
    );

    let (status, created) =
        put_entry(&server, artifact_id, "docs/index.html", "text/html", b"<p>docs</p>").await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["aliases"], json!(["docs/index.html", "docs"]));
    let (status, _) =
        put_entry(&server, artifact_id, "docs/style.css", "text/css", b"p{}").await;
    assert_eq!(status, StatusCode::CREATED);

    // No file named: redirect to the best entrypoint.
    let (status, headers, _) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[LOCATION], "/artifact/view/octo/widgets/run/7/site/docs");

    let (status, _, bytes) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site/docs", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"<p>docs</p>");

    let (status, headers, bytes) = send(
        &server.router,
        get(
            "/artifact/view/octo/widgets/run/7/site/docs/style.css",
            Some(OWNER_LOGIN),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"p{}");
    assert_eq!(headers[CONTENT_TYPE], "text/css");
    assert_eq!(headers[CACHE_CONTROL], "max-age=31536000, immutable");
    assert_eq!(headers["artifactci-name"], "site");
    assert_eq!(headers["artifactci-alias-type"], "run");
    assert_eq!(headers["artifactci-identifier"], "7");

    let (status, headers, _) = send(
        &server.router,
        get(
            "/artifact/view/octo/widgets/branch/main/site/docs/style.css",
            Some(OWNER_LOGIN),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CACHE_CONTROL], "max-age=300, must-revalidate");

    let (status, body) = json_request(
        &server.router,
        "GET",
        "/artifact/view/octo/widgets/run/7/site/missing.txt",
        None,
        &[(IDENTITY_HEADER, OWNER_LOGIN)],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "upload_not_found");
}

#[tokio::test]
async fn test_artifact_not_found() {
    let server = TestServer::new().await;
    seed_artifact(&server, "site").await;

    for uri in [
        "/artifact/view/octo/widgets/run/8/site/index.html",
        "/artifact/view/octo/widgets/run/7/coverage/index.html",
        "/artifact/view/octo/widgets/sha/7/site/index.html",
    ] {
        let (status, body) = json_request(
            &server.router,
            "GET",
            uri,
            None,
            &[(IDENTITY_HEADER, OWNER_LOGIN)],
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["code"], "artifact_not_found", "{uri}");
    }
}

#[tokio::test]
async fn test_artifact_view_requires_identity_and_permission() {
    let server = TestServer::new().await;
    seed_artifact(&server, "site").await;
    server
        .github
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/collaborators/mallory/permission");
            then.status(404).json_body(json!({ "message": "Not Found" }));
        })
        .await;
    server
        .github
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/collaborators/hubot/permission");
            then.status(200).json_body(json!({ "permission": "read" }));
        })
        .await;

    let uri = "/artifact/view/octo/widgets/run/7/site/index.html";

    let (status, _) = json_request(&server.router, "GET", uri, None, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        json_request(&server.router, "GET", uri, None, &[(IDENTITY_HEADER, "mallory")]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_authorized");

    let (status, body) =
        json_request(&server.router, "GET", uri, None, &[(IDENTITY_HEADER, "hubot")]).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "not_uploaded_yet");

    let (status, _) = json_request(
        &server.router,
        "GET",
        "/artifact/view/octo/widgets/tag/v1/site/index.html",
        None,
        &[(IDENTITY_HEADER, OWNER_LOGIN)],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_artifact_entry_upload_validation() {
    let server = TestServer::new().await;
    let artifact_id = seed_artifact(&server, "site").await;

    let (status, _) = put_entry(&server, Uuid::new_v4(), "a.txt", "text/plain", b"x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/artifact/entries/{artifact_id}/a.txt"))
        .body(Body::from("x"))
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = put_entry(&server, artifact_id, "C:/report.txt", "text/plain", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_index_entry_keeps_directory_alias_over_later_page() {
    let server = TestServer::new().await;
    let artifact_id = seed_artifact(&server, "site").await;

    let (status, created) =
        put_entry(&server, artifact_id, "a/index.html", "text/html", b"INDEX").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["aliases"], json!(["a/index.html", "a"]));
    let (status, created) = put_entry(&server, artifact_id, "a.html", "text/html", b"PLAIN").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["aliases"], json!(["a.html"]));

    let (status, headers, _) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[LOCATION], "/artifact/view/octo/widgets/run/7/site/a");

    let (status, _, bytes) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site/a", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"INDEX");

    let (status, _, bytes) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site/a.html", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"PLAIN");
}

#[tokio::test]
async fn test_later_index_entry_takes_over_directory_alias() {
    let server = TestServer::new().await;
    let artifact_id = seed_artifact(&server, "site").await;

    put_entry(&server, artifact_id, "a.html", "text/html", b"PLAIN").await;
    let (status, _, bytes) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site/a", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"PLAIN");

    put_entry(&server, artifact_id, "a/index.html", "text/html", b"INDEX").await;
    let (status, _, bytes) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site/a", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"INDEX");
}

#[tokio::test]
async fn test_redirect_escapes_entrypoint_name() {
    let server = TestServer::new().await;
    let artifact_id = seed_artifact(&server, "site").await;

    let (status, created) =
        put_entry(&server, artifact_id, "my%20report.html", "text/html", b"<p>r</p>").await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["entryName"], "my report.html");

    let (status, headers, _) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site", Some(OWNER_LOGIN)),
    )
    .await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers[LOCATION].to_str().unwrap().to_string();
    assert_eq!(location, "/artifact/view/octo/widgets/run/7/site/my%20report");

    let (status, _, bytes) = send(&server.router, get(&location, Some(OWNER_LOGIN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"<p>r</p>");
}

#[tokio::test]
async fn test_artifact_entries_are_not_served_as_blobs() {
    let server = TestServer::new().await;
    let artifact_id = seed_artifact(&server, "site").await;
    let (status, _) =
        put_entry(&server, artifact_id, "secret.txt", "text/plain", b"private data").await;
    assert_eq!(status, StatusCode::CREATED);

    for uri in [
        format!("/blob/artifacts/{artifact_id}/secret.txt"),
        format!("/blob/artifacts//{artifact_id}/secret.txt"),
        format!("/blob/artifacts/{artifact_id}/secret.txt?download=1"),
    ] {
        let (status, _, bytes) = send(&server.router, get(&uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_ne!(&bytes[..], b"private data", "{uri}");
    }

    let (status, _, _) = send(
        &server.router,
        get("/artifact/view/octo/widgets/run/7/site/secret.txt", None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// GitHub webhooks
// ============================================================================

const WEBHOOK_SECRET: &str = "hook-secret";

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn workflow_run_event(action: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "action": action,
        "workflow_run": {
            "id": RUN_ID,
            "head_sha": SHA,
            "head_branch": "main",
        },
        "repository": {
            "name": REPO,
            "owner": { "login": OWNER },
            "html_url": format!("https://github.com/{OWNER}/{REPO}"),
            "private": false,
        },
        "installation": { "id": 9 },
    }))
    .unwrap()
}

fn webhook(event: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/github/events")
        .header("x-github-event", event)
        .header(CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature-256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn webhook_server() -> TestServer {
    TestServer::with_config(|config| {
        config.github.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await
}

#[tokio::test]
async fn test_webhook_ingests_completed_run() {
    let server = webhook_server().await;
    let artifacts = server
        .github
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/repos/{OWNER}/{REPO}/actions/runs/{RUN_ID}/artifacts"));
            then.status(200).json_body(json!({
                "total_count": 2,
                "artifacts": [
                    { "id": 55, "name": "site", "archive_download_url": "https://api.github.test/zip/55", "expired": false },
                    { "id": 56, "name": "old-logs", "expired": true },
                ],
            }));
        })
        .await;

    let body = workflow_run_event("completed");
    let signature = sign(&body);
    let (status, _, bytes) = send(
        &server.router,
        webhook("workflow_run", body, Some(signature)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response["ok"], true);
    assert_eq!(response["artifacts"], 1);
    artifacts.assert_async().await;

    for uri in [
        "/artifact/view/octo/widgets/run/7/site/index.html",
        &format!("/artifact/view/octo/widgets/sha/{SHA}/site/index.html"),
        "/artifact/view/octo/widgets/branch/main/site/index.html",
    ] {
        let (status, body) = json_request(
            &server.router,
            "GET",
            uri,
            None,
            &[(IDENTITY_HEADER, OWNER_LOGIN)],
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED, "{uri}");
        assert_eq!(body["outcome"], "not_uploaded_yet");
    }

    let (status, body) = json_request(
        &server.router,
        "GET",
        "/artifact/view/octo/widgets/run/7/old-logs/index.html",
        None,
        &[(IDENTITY_HEADER, OWNER_LOGIN)],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "artifact_not_found");
}

#[tokio::test]
async fn test_webhook_signature_is_checked() {
    let server = webhook_server().await;
    let body = workflow_run_event("completed");

    let (status, _, _) = send(&server.router, webhook("workflow_run", body.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &server.router,
        webhook("workflow_run", body, Some(sign(b"something else"))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_ignores_other_deliveries() {
    let server = webhook_server().await;

    let body = br#"{"zen":"Keep it logically awesome."}"#.to_vec();
    let signature = sign(&body);
    let (status, _, bytes) = send(&server.router, webhook("ping", body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response["ignored"], true);

    let body = workflow_run_event("requested");
    let signature = sign(&body);
    let (status, _, bytes) =
        send(&server.router, webhook("workflow_run", body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response["ok"], true);
    assert_eq!(response["ignored"], true);
}

#[tokio::test]
async fn test_webhook_processing_failure_is_acknowledged() {
    let server = webhook_server().await;
    server
        .github
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/repos/{OWNER}/{REPO}/actions/runs/{RUN_ID}/artifacts"));
            then.status(502).body("bad gateway");
        })
        .await;

    let body = workflow_run_event("completed");
    let signature = sign(&body);
    let (status, _, bytes) =
        send(&server.router, webhook("workflow_run", body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response["ok"], false);
    assert!(response["error"].as_str().is_some());
}

// ============================================================================
// Operational endpoints
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;
    let (status, body) = json_request(&server.router, "GET", "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    bulk_three_files(&server).await;

    let (status, _, bytes) = send(&server.router, get("/metrics", None)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("artifactci_client_tokens_issued_total"));
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let server = TestServer::with_config(|config| config.server.metrics_enabled = false).await;
    let (status, _, _) = send(&server.router, get("/metrics", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
