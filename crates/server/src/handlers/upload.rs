//! Bulk upload protocol and the client-token hooks behind it.

use crate::auth::require_bearer_token;
use crate::error::{ApiError, ApiResult};
use crate::job_status::{JobStatusError, JobStatusMode, get_jobs_with_statuses};
use crate::metrics;
use crate::state::AppState;
use artifactci_core::config::ContentTypePolicy;
use artifactci_core::upload::{
    BlobResult, ClientTokenOptions, GenerateClientTokenPayload, GenerateClientTokenResponse,
    UploadEvent, storage_pathname, validate_local_path,
};
use artifactci_core::{
    BulkRequest, BulkResponse, BulkResult, ClientTokenClaims, JobStatus, TokenPayload,
    UploadRequestId, match_job, mime, resolve_entrypoints,
};
use artifactci_metadata::models::{NewUploadRequest, RepoRef, UploadRow};
use axum::Json;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum size of an upload protocol message.
const MAX_EVENT_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Acknowledgement of a completion event.
#[derive(Debug, Serialize)]
pub struct CompletedResponse {
    pub ok: bool,
    pub rows: usize,
}

/// POST /upload - Upload protocol entry point, dispatching on `type`.
#[tracing::instrument(skip(state, req))]
pub async fn upload_event(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let bearer = require_bearer_token(req.headers()).ok().map(str::to_string);

    let event: UploadEvent = {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_EVENT_BODY_SIZE)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("invalid upload event: {e}")))?
    };

    match event {
        UploadEvent::Bulk(request) => Ok(Json(handle_bulk(&state, request).await?).into_response()),
        UploadEvent::GenerateClientToken { payload } => {
            Ok(Json(generate_client_token(&state, &payload).await?).into_response())
        }
        UploadEvent::UploadCompleted {
            blob,
            token_payload,
        } => {
            let token = bearer
                .ok_or_else(|| ApiError::Unauthorized("client token required".to_string()))?;
            let claims = state.signer.verify(&token, OffsetDateTime::now_utc())?;
            if claims.pathname != blob.pathname {
                return Err(ApiError::Forbidden(
                    "client token was issued for a different pathname".to_string(),
                ));
            }
            if token_payload
                .as_deref()
                .is_some_and(|p| p != claims.token_payload)
            {
                return Err(ApiError::Unauthorized(
                    "token payload does not match the client token".to_string(),
                ));
            }
            let rows = record_completed_upload(&state, &blob, &claims.token_payload).await?;
            Ok(Json(CompletedResponse { ok: true, rows }).into_response())
        }
    }
}

/// Answer a bulk request within the configured wall-clock budget.
async fn handle_bulk(state: &AppState, request: BulkRequest) -> ApiResult<BulkResponse> {
    let timer = metrics::BULK_REQUEST_DURATION.start_timer();
    let result = match tokio::time::timeout(
        state.config.upload.request_timeout(),
        process_bulk(state, request),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                budget_secs = state.config.upload.request_timeout_secs,
                "bulk request timed out"
            );
            Err(ApiError::Timeout)
        }
    };
    timer.observe_duration();

    match &result {
        Ok(_) => metrics::record_bulk_outcome("ok"),
        Err(e) => metrics::record_bulk_outcome(e.code()),
    }
    result
}

fn job_status_error(mode: JobStatusMode, error: JobStatusError) -> ApiError {
    match (mode, error) {
        (_, e @ JobStatusError::ParseAmbiguity { .. }) => ApiError::JobStatusParse(e.to_string()),
        (JobStatusMode::Web, JobStatusError::Upstream { status, body }) => ApiError::Upstream {
            status,
            message: body,
        },
        (JobStatusMode::Web, e @ JobStatusError::Http(_)) => ApiError::Upstream {
            status: axum::http::StatusCode::BAD_GATEWAY,
            message: e.to_string(),
        },
        (JobStatusMode::Api, e) => {
            ApiError::BadRequest(format!("job status lookup failed, check githubToken: {e}"))
        }
    }
}

async fn process_bulk(state: &AppState, request: BulkRequest) -> ApiResult<BulkResponse> {
    request.validate()?;
    let context = &request.client_payload.context;
    let github = &state.config.github;
    if !github.is_trusted_api_url(&context.github_api_url)
        || !github.is_trusted_origin(&context.github_origin)
    {
        return Err(ApiError::BadRequest(format!(
            "untrusted GitHub host {} / {}",
            context.github_origin, context.github_api_url
        )));
    }

    let jobs = get_jobs_with_statuses(
        state.github.http(),
        context,
        request.client_payload.github_token.as_deref(),
    )
    .await
    .map_err(|f| job_status_error(f.mode, f.error))?;

    let job = match_job(&jobs, &context.job).map_err(|e| match e {
        artifactci_core::Error::JobNotFound { .. } => ApiError::JobNotFound {
            message: e.to_string(),
            jobs: jobs.clone(),
        },
        other => other.into(),
    })?;
    if job.status != JobStatus::Running {
        return Err(ApiError::JobNotRunning {
            job: job.name.clone(),
            status: job.status,
            jobs: jobs.clone(),
        });
    }

    let (owner, name) = context.owner_and_repo()?;
    let run_id = i64::try_from(context.run_id)
        .map_err(|_| ApiError::BadRequest("context.runId out of range".to_string()))?;
    let new_request = NewUploadRequest {
        upload_request_id: Uuid::new_v4(),
        repo: RepoRef {
            owner: owner.to_string(),
            name: name.to_string(),
            html_url: context.html_url(),
        },
        git_ref: context.git_ref.clone(),
        sha: context.sha.clone(),
        run_id,
        run_attempt: i64::from(context.run_attempt),
        job_id: context.job.clone(),
        now: OffsetDateTime::now_utc(),
    };
    let Some(ledger_row) = state.metadata.record_upload_request(&new_request).await? else {
        metrics::DUPLICATE_UPLOAD_REQUESTS.inc();
        return Err(ApiError::DuplicateRequest(context.pathname_prefix()));
    };
    tracing::info!(
        upload_request_id = %ledger_row.upload_request_id,
        files = request.files.len(),
        "upload request recorded"
    );

    let token_payload = TokenPayload {
        upload_request_id: UploadRequestId::from(ledger_row.upload_request_id),
        retention_days: context.github_retention_days,
    }
    .stringify();

    let issuances: Vec<_> = request
        .files
        .iter()
        .map(|file| {
            let local_path = file.local_path.clone();
            let token_request = GenerateClientTokenPayload {
                callback_url: Some(request.callback_url.clone()),
                client_payload: Some(token_payload.clone()),
                pathname: storage_pathname(context, &local_path),
                multipart: file.multipart,
            };
            async move {
                let issued = generate_client_token(state, &token_request).await?;
                Ok::<_, ApiError>(BulkResult {
                    view_url: state.view_url(&token_request.pathname),
                    content_type: mime::lookup(&local_path).to_string(),
                    local_path,
                    pathname: token_request.pathname,
                    client_token: issued.client_token,
                })
            }
        })
        .collect();

    let results: Vec<BulkResult> = futures::stream::iter(issuances)
        .buffered(state.config.upload.token_concurrency.max(1))
        .try_collect()
        .await?;

    let view_urls: Vec<String> = results.iter().map(|r| r.view_url.clone()).collect();
    let entrypoints = resolve_entrypoints(&view_urls, &[]).entrypoints;

    Ok(BulkResponse {
        results,
        entrypoints,
    })
}

/// Mint a client token for one pathname.
///
/// The client payload must name an existing ledger row, and the pathname
/// must sit under that row's job prefix.
pub async fn generate_client_token(
    state: &AppState,
    payload: &GenerateClientTokenPayload,
) -> ApiResult<GenerateClientTokenResponse> {
    let raw = payload
        .client_payload
        .as_deref()
        .ok_or_else(|| ApiError::Unauthorized("missing client payload".to_string()))?;
    let token_payload = TokenPayload::parse(raw)?;

    let ledger_row = state
        .metadata
        .get_upload_request(*token_payload.upload_request_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("unknown upload request".to_string()))?;
    let repo = state
        .metadata
        .get_repository(ledger_row.repo_id)
        .await?
        .ok_or_else(|| ApiError::Internal("ledger row without repository".to_string()))?;

    let prefix = format!(
        "{}/{}/{}/{}/{}/",
        repo.owner, repo.name, ledger_row.run_id, ledger_row.run_attempt, ledger_row.job_id
    );
    let local_path = payload.pathname.strip_prefix(&prefix).ok_or_else(|| {
        ApiError::Forbidden(format!("pathname must start with {prefix}"))
    })?;
    validate_local_path(local_path)?;

    let content_type = mime::lookup(&payload.pathname);
    if !state.config.upload.is_allowed_content_type(content_type) {
        match state.config.upload.content_type_policy {
            ContentTypePolicy::Advisory => {
                tracing::warn!(
                    pathname = %payload.pathname,
                    content_type,
                    "content type outside the allow-list"
                );
            }
            ContentTypePolicy::Enforce => {
                return Err(ApiError::BadRequest(format!(
                    "content type {content_type} is not allowed"
                )));
            }
        }
    }

    let options = ClientTokenOptions {
        allowed_content_types: vec![content_type.to_string()],
        add_random_suffix: true,
        token_payload: raw.to_string(),
    };
    let claims = ClientTokenClaims {
        pathname: payload.pathname.clone(),
        allowed_content_types: options.allowed_content_types.clone(),
        add_random_suffix: options.add_random_suffix,
        token_payload: options.token_payload.clone(),
        callback_url: payload.callback_url.clone(),
        valid_until: OffsetDateTime::now_utc() + state.config.upload.client_token_ttl(),
    };
    let client_token = state.signer.sign(&claims)?;
    metrics::CLIENT_TOKENS_ISSUED.inc();

    Ok(GenerateClientTokenResponse {
        options,
        client_token,
    })
}

/// Record a finished upload as one row per alias of its pathname.
///
/// Returns the number of rows written.
#[tracing::instrument(skip(state, blob, raw_payload), fields(pathname = %blob.pathname))]
pub async fn record_completed_upload(
    state: &AppState,
    blob: &BlobResult,
    raw_payload: &str,
) -> ApiResult<usize> {
    let payload = TokenPayload::parse(raw_payload)?;
    let upload_request_id = *payload.upload_request_id.as_uuid();
    if state
        .metadata
        .get_upload_request(upload_request_id)
        .await?
        .is_none()
    {
        return Err(ApiError::Unauthorized("unknown upload request".to_string()));
    }
    if !blob.url.starts_with(&state.blob_url("")) {
        return Err(ApiError::BadRequest(format!(
            "blob url {} is not served here",
            blob.url
        )));
    }

    let resolution = resolve_entrypoints(std::slice::from_ref(&blob.pathname), &[]);
    let now = OffsetDateTime::now_utc();
    let expires_at = payload.expires_at(now);
    let rows: Vec<UploadRow> = resolution
        .aliases_for(&blob.pathname)
        .iter()
        .map(|alias| UploadRow {
            upload_id: Uuid::new_v4(),
            pathname: alias.clone(),
            mime_type: mime::essence(&blob.content_type).to_string(),
            blob_url: blob.url.clone(),
            upload_request_id,
            expires_at,
            created_at: now,
            updated_at: now,
        })
        .collect();

    state.metadata.insert_uploads(&rows).await?;
    metrics::UPLOADS_COMPLETED.inc();
    metrics::UPLOAD_ROWS_INSERTED.inc_by(rows.len() as u64);
    tracing::debug!(rows = rows.len(), "upload recorded");
    Ok(rows.len())
}
