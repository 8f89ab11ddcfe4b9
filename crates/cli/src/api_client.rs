use anyhow::{Context, Result};
use artifactci_core::upload::{BlobResult, UploadEvent};
use artifactci_core::{BulkRequest, BulkResponse};
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => anyhow::bail!("API error ({}): {}: {}", status, err.code, err.message),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }
        serde_json::from_str(&body).with_context(|| format!("unexpected response: {body}"))
    }

    /// Declare a manifest and receive one client token per file.
    pub async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        let url = self.url("/upload")?;
        let event = UploadEvent::Bulk(request.clone());
        let response = self.http.post(url).json(&event).send().await?;
        Self::read_json(response).await
    }

    /// PUT one file with its client token.
    pub async fn put_blob(
        &self,
        pathname: &str,
        client_token: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<BlobResult> {
        let url = self.url(&format!("/blob/{pathname}"))?;
        let response = retry_request(|| {
            self.http
                .put(url.clone())
                .bearer_auth(client_token)
                .header(CONTENT_TYPE, content_type)
                .body(data.clone())
                .send()
        })
        .await?;
        Self::read_json(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/health")?;
        let response = self.http.get(url).send().await?;
        Self::read_json(response).await
    }
}

/// Retry transport errors and 5xx answers with exponential backoff.
async fn retry_request<F, Fut>(mut make_request: F) -> reqwest::Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
{
    const MAX_RETRIES: u32 = 3;
    let mut attempt = 0;

    loop {
        match make_request().await {
            Ok(response) if response.status().is_server_error() => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Ok(response);
                }
                let delay = Duration::from_secs(1 << (attempt - 1)); // 1s, 2s, 4s
                tracing::warn!(
                    status = %response.status(),
                    delay_secs = delay.as_secs(),
                    "server error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(e);
                }
                let delay = Duration::from_secs(1 << (attempt - 1));
                tracing::warn!(error = %e, delay_secs = delay.as_secs(), "request error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
