//! Shared handler helpers.

use crate::auth::Identity;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use artifactci_core::artifact::content_disposition_for;
use artifactci_core::mime;
use artifactci_storage::ObjectMeta;
use axum::body::Body;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderName,
    LAST_MODIFIED,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

/// Require at least read collaboration on `owner/repo`.
pub async fn require_read_permission(
    state: &AppState,
    identity: &Identity,
    owner: &str,
    repo: &str,
) -> ApiResult<()> {
    let level = state
        .github
        .collaborator_permission(owner, repo, &identity.login)
        .await
        .map_err(|e| ApiError::Internal(format!("permission check failed: {e}")))?;

    if !level.can_read() {
        crate::metrics::record_resolution("not_authorized");
        return Err(ApiError::Forbidden(format!(
            "{} cannot read {owner}/{repo}",
            identity.login
        )));
    }
    Ok(())
}

/// Top-level storage directory holding extracted artifact entries.
const ENTRY_KEY_ROOT: &str = "artifacts";

/// Storage key of an extracted artifact entry.
pub fn entry_storage_key(artifact_id: uuid::Uuid, entry_name: &str) -> String {
    format!("{ENTRY_KEY_ROOT}/{artifact_id}/{entry_name}")
}

/// Whether `key` lands under the entry root once empty and `.` segments are
/// dropped. Those keys are only served behind a permission check.
pub fn is_entry_key(key: &str) -> bool {
    key.split(['/', '\\'])
        .find(|segment| !segment.is_empty() && *segment != ".")
        == Some(ENTRY_KEY_ROOT)
}

/// Last path segment, used as the download filename.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Stream a stored object back to the caller.
///
/// `content_type` wins over the backend's when given. `extra` headers are
/// added after the passthrough ones.
pub async fn stream_object(
    state: &AppState,
    key: &str,
    display_path: &str,
    content_type: Option<&str>,
    cache_control: &str,
    extra: &[(&'static str, String)],
) -> ApiResult<Response> {
    let meta: ObjectMeta = state.storage.head(key).await?;
    let stream = state.storage.get_stream(key).await?;

    let content_type = content_type
        .map(str::to_string)
        .or_else(|| meta.content_type.clone())
        .unwrap_or_else(|| mime::lookup(display_path).to_string());

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, CONTENT_TYPE, &content_type);
    insert_header(&mut headers, CONTENT_LENGTH, &meta.size.to_string());
    insert_header(&mut headers, CACHE_CONTROL, cache_control);
    insert_header(
        &mut headers,
        CONTENT_DISPOSITION,
        &content_disposition_for(&content_type, file_name(display_path)),
    );
    if let Some(etag) = &meta.etag {
        insert_header(&mut headers, ETAG, etag);
    }
    if let Some(last_modified) = meta.last_modified_http() {
        insert_header(&mut headers, LAST_MODIFIED, &last_modified);
    }
    for (name, value) in extra {
        insert_header(&mut headers, HeaderName::from_static(name), value);
    }

    let key_for_log = key.to_string();
    let body = Body::from_stream(stream.map(move |result| {
        result.map_err(|e| {
            tracing::error!(key = %key_for_log, error = %e, "object streaming failed mid-transfer");
            std::io::Error::other(e.to_string())
        })
    }));

    Ok((StatusCode::OK, headers, body).into_response())
}
