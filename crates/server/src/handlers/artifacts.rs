//! Artifact resolution.
//!
//! `/artifact/view/{owner}/{repo}/{alias_type}/{identifier}/{name}/{*filepath}`
//! resolves to one of:
//! - `artifact_not_found` (404) when no artifact matches the alias
//! - `not_authorized` (403) when the caller cannot read the repository
//! - `not_uploaded_yet` (202) when the artifact has no extracted entries,
//!   carrying what the caller needs to start the upload
//! - `upload_not_found` (404) when the file is not among the entries
//! - the file itself, or a redirect to the best entrypoint when no file is
//!   named

use crate::auth::require_identity;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{entry_storage_key, require_read_permission, stream_object};
use crate::metrics::record_resolution;
use crate::state::AppState;
use artifactci_core::artifact::CACHE_CONTROL_IMMUTABLE;
use artifactci_core::upload::validate_local_path;
use artifactci_core::{AliasType, ArtifactId, mime, resolve_entrypoints};
use artifactci_metadata::models::ArtifactEntryRow;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Path parameters of an artifact view URL.
#[derive(Debug, Deserialize)]
pub struct ArtifactViewPath {
    pub owner: String,
    pub repo: String,
    pub alias_type: String,
    pub identifier: String,
    pub artifact_name: String,
    #[serde(default)]
    pub filepath: Option<String>,
}

/// Body of a `not_uploaded_yet` answer.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotUploadedYet {
    pub outcome: String,
    pub artifact_id: Uuid,
    /// Requested file, empty when none was named.
    pub entry: String,
    /// Prefix to PUT extracted entries under.
    pub upload_url: String,
}

/// Body of a stored artifact entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCreated {
    pub entry_id: Uuid,
    pub entry_name: String,
    pub aliases: Vec<String>,
}

/// Characters escaped inside one path segment of a redirect.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// View URL built from segments. Slashes inside a segment are kept so an
/// entry path stays a path.
fn view_location(segments: &[&str]) -> String {
    let mut out = String::from("/artifact/view");
    for segment in segments {
        out.push('/');
        out.extend(utf8_percent_encode(segment, SEGMENT));
    }
    out
}

/// GET /artifact/view/{owner}/{repo}/{alias_type}/{identifier}/{artifact_name}[/{*filepath}]
#[tracing::instrument(skip(state, headers), fields(owner = %params.owner, repo = %params.repo))]
pub async fn view_artifact(
    State(state): State<AppState>,
    Path(params): Path<ArtifactViewPath>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let identity = require_identity(&headers, &state.config.auth.identity_header)?;
    let alias_type = AliasType::parse(&params.alias_type).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unknown alias type `{}`, expected run, sha or branch",
            params.alias_type
        ))
    })?;
    require_read_permission(&state, &identity, &params.owner, &params.repo).await?;

    let Some(artifact) = state
        .metadata
        .find_artifact(
            &params.owner,
            &params.repo,
            &params.artifact_name,
            alias_type.as_str(),
            &params.identifier,
        )
        .await?
    else {
        record_resolution("artifact_not_found");
        return Err(ApiError::ArtifactNotFound(format!(
            "{} at {}={}",
            params.artifact_name, alias_type, params.identifier
        )));
    };

    let filepath = params
        .filepath
        .as_deref()
        .unwrap_or("")
        .trim_matches('/')
        .to_string();

    if state
        .metadata
        .count_artifact_entries(artifact.artifact_id)
        .await?
        == 0
    {
        record_resolution("not_uploaded_yet");
        let body = NotUploadedYet {
            outcome: "not_uploaded_yet".to_string(),
            artifact_id: artifact.artifact_id,
            entry: filepath,
            upload_url: format!(
                "{}/artifact/entries/{}/",
                state.base_url(),
                artifact.artifact_id
            ),
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    if filepath.is_empty() {
        let names: Vec<String> = state
            .metadata
            .list_artifact_entries(artifact.artifact_id)
            .await?
            .into_iter()
            .map(|e| e.entry_name)
            .collect();
        let target = resolve_entrypoints(&names, &[])
            .entrypoints
            .into_iter()
            .next()
            .unwrap_or_default();
        let location = view_location(&[
            params.owner.as_str(),
            params.repo.as_str(),
            alias_type.as_str(),
            params.identifier.as_str(),
            params.artifact_name.as_str(),
            target.as_str(),
        ]);
        let location = HeaderValue::from_str(&location)
            .map_err(|e| ApiError::Internal(format!("unrepresentable redirect: {e}")))?;
        record_resolution("redirect");
        return Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response());
    }

    let Some(entry) = state
        .metadata
        .find_artifact_entry(artifact.artifact_id, &filepath)
        .await?
    else {
        record_resolution("upload_not_found");
        return Err(ApiError::UploadNotFound(filepath));
    };

    record_resolution("ok");
    stream_object(
        &state,
        &entry.storage_key,
        &entry.entry_name,
        Some(&entry.content_type),
        alias_type.cache_control(),
        &[
            ("artifactci-path", entry.entry_name.clone()),
            ("artifactci-name", artifact.name.clone()),
            ("artifactci-identifier", params.identifier.clone()),
            ("artifactci-alias-type", alias_type.as_str().to_string()),
        ],
    )
    .await
}

/// GET /artifact/blob/{owner}/{repo}/{*rest} - Serve an uploaded file by pathname.
#[tracing::instrument(skip(state, headers))]
pub async fn view_upload(
    State(state): State<AppState>,
    Path((owner, repo, rest)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let identity = require_identity(&headers, &state.config.auth.identity_header)?;
    require_read_permission(&state, &identity, &owner, &repo).await?;

    let pathname = format!("{owner}/{repo}/{}", rest.trim_end_matches('/'));
    let Some(upload) = state
        .metadata
        .find_upload(&pathname, OffsetDateTime::now_utc())
        .await?
    else {
        record_resolution("upload_not_found");
        return Err(ApiError::UploadNotFound(pathname));
    };
    let key = state
        .blob_key(&upload.blob_url)
        .ok_or_else(|| ApiError::Internal(format!("unservable blob url {}", upload.blob_url)))?;

    record_resolution("ok");
    stream_object(
        &state,
        key,
        &upload.pathname,
        Some(&upload.mime_type),
        CACHE_CONTROL_IMMUTABLE,
        &[("artifactci-path", upload.pathname.clone())],
    )
    .await
}

/// PUT /artifact/entries/{artifact_id}/{*entry_name} - Store one extracted file.
#[tracing::instrument(skip(state, req))]
pub async fn put_artifact_entry(
    State(state): State<AppState>,
    Path((artifact_id, entry_name)): Path<(String, String)>,
    req: Request,
) -> ApiResult<(StatusCode, Json<EntryCreated>)> {
    let identity = require_identity(req.headers(), &state.config.auth.identity_header)?;
    let artifact_id = ArtifactId::parse(&artifact_id)?;
    validate_local_path(&entry_name)?;

    let artifact = state
        .metadata
        .get_artifact(*artifact_id.as_uuid())
        .await?
        .ok_or_else(|| ApiError::ArtifactNotFound(artifact_id.to_string()))?;
    let repo = state
        .metadata
        .get_repository(artifact.repo_id)
        .await?
        .ok_or_else(|| ApiError::Internal("artifact without repository".to_string()))?;
    require_read_permission(&state, &identity, &repo.owner, &repo.name).await?;

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| mime::essence(v).to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| mime::lookup(&entry_name).to_string());

    let data = axum::body::to_bytes(req.into_body(), state.config.server.max_body_size)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    let size_bytes = i64::try_from(data.len())
        .map_err(|_| ApiError::BadRequest("entry too large".to_string()))?;

    let storage_key = entry_storage_key(artifact.artifact_id, &entry_name);
    state.storage.put(&storage_key, data).await?;

    let entry = ArtifactEntryRow {
        entry_id: Uuid::new_v4(),
        artifact_id: artifact.artifact_id,
        entry_name: entry_name.clone(),
        storage_key,
        content_type,
        size_bytes,
        created_at: OffsetDateTime::now_utc(),
    };
    state.metadata.insert_artifact_entry(&entry, &[]).await?;
    let aliases = reassign_aliases(&state, artifact.artifact_id, entry.entry_id).await?;
    tracing::info!(artifact_id = %artifact.artifact_id, entry = %entry_name, "artifact entry stored");

    Ok((
        StatusCode::CREATED,
        Json(EntryCreated {
            entry_id: entry.entry_id,
            entry_name,
            aliases,
        }),
    ))
}

/// Recompute aliases over every entry of the artifact, so an alias moves to
/// the entry that now scores best for it. Returns the aliases of `entry_id`.
async fn reassign_aliases(
    state: &AppState,
    artifact_id: Uuid,
    entry_id: Uuid,
) -> ApiResult<Vec<String>> {
    // newest first, so a re-uploaded name keeps its newest entry
    let mut latest: Vec<ArtifactEntryRow> = Vec::new();
    for entry in state.metadata.list_artifact_entries(artifact_id).await? {
        if !latest.iter().any(|e| e.entry_name == entry.entry_name) {
            latest.push(entry);
        }
    }

    let names: Vec<String> = latest.iter().map(|e| e.entry_name.clone()).collect();
    let resolution = resolve_entrypoints(&names, &[]);
    let assigned: Vec<(Uuid, Vec<String>)> = latest
        .iter()
        .map(|e| (e.entry_id, resolution.aliases_for(&e.entry_name).to_vec()))
        .collect();
    state
        .metadata
        .replace_artifact_entry_aliases(artifact_id, &assigned)
        .await?;

    Ok(assigned
        .into_iter()
        .find(|(id, _)| *id == entry_id)
        .map(|(_, aliases)| aliases)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_location_escapes_each_segment() {
        let location = view_location(&["octo", "widgets", "run", "1", "site", "my report#1.html"]);
        assert_eq!(location, "/artifact/view/octo/widgets/run/1/site/my%20report%231.html");

        let nested = view_location(&["octo", "widgets", "branch", "feature/x", "site", "docs/a b"]);
        assert_eq!(nested, "/artifact/view/octo/widgets/branch/feature/x/site/docs/a%20b");
        assert!(HeaderValue::from_str(&view_location(&["o", "r", "run", "1", "n", "ünï.html"])).is_ok());
    }
}
