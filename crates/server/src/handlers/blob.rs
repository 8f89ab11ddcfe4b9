//! Direct blob uploads authorized by client tokens, and raw blob reads.

use crate::auth::require_bearer_token;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{file_name, is_entry_key, stream_object};
use crate::handlers::upload::record_completed_upload;
use crate::state::AppState;
use artifactci_core::artifact::{CACHE_CONTROL_IMMUTABLE, content_disposition_for};
use artifactci_core::mime;
use artifactci_core::upload::BlobResult;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::HeaderValue;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::Response;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::Instrument;

const SUFFIX_LEN: usize = 12;

/// Insert a random suffix before the extension of the last segment.
///
/// `a/index.html` becomes `a/index-<suffix>.html`.
pub fn with_random_suffix(pathname: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    insert_suffix(pathname, &suffix)
}

fn insert_suffix(pathname: &str, suffix: &str) -> String {
    let (dir, base) = match pathname.rsplit_once('/') {
        Some((dir, base)) => (Some(dir), base),
        None => (None, pathname),
    };
    let base = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{base}-{suffix}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{base}"),
        None => base,
    }
}

/// PUT /blob/{*pathname} - Store a blob with a client token.
#[tracing::instrument(skip(state, req))]
pub async fn put_blob(
    State(state): State<AppState>,
    Path(pathname): Path<String>,
    req: Request,
) -> ApiResult<Json<BlobResult>> {
    let token = require_bearer_token(req.headers())?;
    let claims = state.signer.verify(token, OffsetDateTime::now_utc())?;
    if claims.pathname != pathname {
        return Err(ApiError::Forbidden(
            "client token was issued for a different pathname".to_string(),
        ));
    }

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| mime::essence(v).to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| mime::lookup(&pathname).to_string());
    if !claims.allows_content_type(&content_type) {
        return Err(ApiError::BadRequest(format!(
            "content type {content_type} is not allowed by the client token"
        )));
    }

    if is_entry_key(&pathname) {
        return Err(ApiError::Forbidden(format!(
            "{pathname} is reserved for artifact entries"
        )));
    }

    let key = if claims.add_random_suffix {
        with_random_suffix(&pathname)
    } else {
        pathname.clone()
    };

    let data = axum::body::to_bytes(req.into_body(), state.config.server.max_body_size)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    let size = data.len();
    state.storage.put(&key, data).await?;

    let url = state.blob_url(&key);
    let blob = BlobResult {
        download_url: format!("{url}?download=1"),
        url,
        content_disposition: content_disposition_for(&content_type, file_name(&pathname)),
        pathname,
        content_type,
    };
    tracing::info!(key = %key, size, "blob stored");

    let background_state = state.clone();
    let completed = blob.clone();
    let token_payload = claims.token_payload;
    tokio::spawn(
        async move {
            if let Err(e) =
                record_completed_upload(&background_state, &completed, &token_payload).await
            {
                tracing::error!(error = %e, "failed to record completed upload");
            }
        }
        .instrument(tracing::Span::current()),
    );

    Ok(Json(blob))
}

#[derive(Debug, Default, Deserialize)]
pub struct BlobQuery {
    #[serde(default)]
    pub download: Option<String>,
}

/// GET /blob/{*key} - Serve a stored blob.
///
/// Artifact entries are not blobs; they are read through the artifact view.
pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BlobQuery>,
) -> ApiResult<Response> {
    if is_entry_key(&key) {
        return Err(ApiError::NotFound(key));
    }
    let mut response = stream_object(&state, &key, &key, None, CACHE_CONTROL_IMMUTABLE, &[]).await?;
    if query.download.is_some() {
        let disposition = format!(
            "attachment; filename=\"{}\"",
            file_name(&key).replace(['"', '\\'], "_")
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response.headers_mut().insert(CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}
