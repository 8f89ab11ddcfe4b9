//! GitHub webhook ingestion.
//!
//! Only completed `workflow_run` deliveries are processed. Processing errors
//! are answered with 200 and `ok: false` so GitHub does not redeliver in a
//! loop; a bad signature is still a 401.

use crate::error::{ApiError, ApiResult};
use crate::metrics::WEBHOOK_EVENTS;
use crate::state::AppState;
use artifactci_core::AliasType;
use artifactci_metadata::models::{ArtifactIdentifierRow, ArtifactRow, RepoRef};
use axum::Json;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Maximum size of a webhook delivery.
const MAX_WEBHOOK_BODY_SIZE: usize = 25 * 1024 * 1024;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(default)]
    pub artifacts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunEvent {
    action: String,
    workflow_run: WorkflowRun,
    repository: Repository,
    #[serde(default)]
    installation: Option<Installation>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    head_sha: String,
    #[serde(default)]
    head_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
    html_url: String,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: i64,
}

/// Check `sha256=<hex>` against the HMAC of `body`.
pub fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha256="))
        .ok_or_else(|| ApiError::Unauthorized("missing webhook signature".to_string()))?;
    let expected = hex::decode(signature)
        .map_err(|_| ApiError::Unauthorized("malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ApiError::Unauthorized("webhook signature mismatch".to_string()))
}

/// POST /github/events - GitHub webhook receiver.
#[tracing::instrument(skip(state, req))]
pub async fn github_events(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<WebhookResponse>> {
    let headers = req.headers().clone();
    let body = axum::body::to_bytes(req.into_body(), MAX_WEBHOOK_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;

    if let Some(secret) = state.config.github.webhook_secret.as_deref() {
        verify_signature(secret, &headers, &body)?;
    }

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if event != "workflow_run" {
        WEBHOOK_EVENTS.with_label_values(&["other", "ignored"]).inc();
        return Ok(Json(WebhookResponse {
            ok: true,
            ignored: true,
            ..Default::default()
        }));
    }

    let response = match serde_json::from_slice::<WorkflowRunEvent>(&body) {
        Err(e) => WebhookResponse {
            ok: false,
            error: Some(format!("invalid workflow_run payload: {e}")),
            ..Default::default()
        },
        Ok(run) if run.action != "completed" => WebhookResponse {
            ok: true,
            ignored: true,
            ..Default::default()
        },
        Ok(run) => match ingest_workflow_run(&state, &run).await {
            Ok(artifacts) => WebhookResponse {
                ok: true,
                artifacts,
                ..Default::default()
            },
            Err(e) => {
                tracing::warn!(error = %e, run_id = run.workflow_run.id, "workflow_run ingestion failed");
                WebhookResponse {
                    ok: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        },
    };

    let outcome = match (response.ok, response.ignored) {
        (true, true) => "ignored",
        (true, false) => "ok",
        (false, _) => "error",
    };
    WEBHOOK_EVENTS
        .with_label_values(&["workflow_run", outcome])
        .inc();
    Ok(Json(response))
}

async fn ingest_workflow_run(state: &AppState, event: &WorkflowRunEvent) -> ApiResult<usize> {
    let now = OffsetDateTime::now_utc();
    let repo = state
        .metadata
        .upsert_repository(
            &RepoRef {
                owner: event.repository.owner.login.clone(),
                name: event.repository.name.clone(),
                html_url: event.repository.html_url.clone(),
            },
            now,
        )
        .await?;

    let run = &event.workflow_run;
    let listed = state
        .github
        .list_run_artifacts(&repo.owner, &repo.name, run.id)
        .await
        .map_err(|e| ApiError::Internal(format!("listing run artifacts failed: {e}")))?;

    let visibility = if event.repository.private {
        "private"
    } else {
        "public"
    };
    let mut stored_count = 0;
    for listed_artifact in listed.iter().filter(|a| !a.expired) {
        let stored = state
            .metadata
            .upsert_artifact(&ArtifactRow {
                artifact_id: Uuid::new_v4(),
                repo_id: repo.repo_id,
                external_id: listed_artifact.id,
                name: listed_artifact.name.clone(),
                installation_id: event.installation.as_ref().map(|i| i.id),
                download_url: listed_artifact.archive_download_url.clone(),
                visibility: visibility.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut identifiers = vec![
            (AliasType::Run, run.id.to_string()),
            (AliasType::Sha, run.head_sha.clone()),
        ];
        if let Some(branch) = run.head_branch.as_ref().filter(|b| !b.is_empty()) {
            identifiers.push((AliasType::Branch, branch.clone()));
        }
        let rows: Vec<ArtifactIdentifierRow> = identifiers
            .into_iter()
            .map(|(alias_type, value)| ArtifactIdentifierRow {
                artifact_id: stored.artifact_id,
                alias_type: alias_type.as_str().to_string(),
                value,
                created_at: now,
            })
            .collect();
        state.metadata.add_artifact_identifiers(&rows).await?;
        stored_count += 1;
    }

    tracing::info!(
        repository = %format!("{}/{}", repo.owner, repo.name),
        run_id = run.id,
        artifacts = stored_count,
        "workflow run ingested"
    );
    Ok(stored_count)
}
