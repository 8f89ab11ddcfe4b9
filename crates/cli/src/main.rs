//! CI-side uploader for artifactci.

mod api_client;

use anyhow::{Context, Result};
use api_client::ApiClient;
use artifactci_core::upload::validate_local_path;
use artifactci_core::{
    BULK_CHUNK_SIZE, BulkFile, BulkRequest, BulkResponse, BulkResult, ClientPayload,
    GithubActionsContext,
};
use clap::{Args, Parser, Subcommand};
use futures::{StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Maximum number of files uploaded at once.
const UPLOAD_CONCURRENCY: usize = 10;

#[derive(Parser)]
#[command(name = "artifactci")]
#[command(about = "Upload CI job outputs to an artifactci server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ServerArgs {
    /// artifactci server URL
    #[arg(long, env = "ARTIFACTCI_SERVER")]
    server: String,
}

/// The GitHub Actions environment of the running job.
#[derive(Args, Clone)]
struct GithubEnvArgs {
    #[arg(long = "ref", env = "GITHUB_REF")]
    git_ref: String,
    #[arg(long, env = "GITHUB_SHA")]
    sha: String,
    #[arg(long, env = "GITHUB_RUN_ID")]
    run_id: u64,
    #[arg(long, env = "GITHUB_RUN_ATTEMPT", default_value_t = 1)]
    run_attempt: u32,
    /// Workflow job key or display name
    #[arg(long, env = "GITHUB_JOB")]
    job: String,
    /// owner/repo
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: String,
    #[arg(long, env = "GITHUB_SERVER_URL", default_value = "https://github.com")]
    github_origin: String,
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    github_api_url: String,
    /// Token used to read job statuses; public repositories work without one
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files or directories
    Upload {
        /// Files or directories, relative to the working directory
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Days to keep the uploads
        #[arg(long, default_value_t = 90)]
        retention_days: u16,
        #[command(flatten)]
        server: ServerArgs,
        #[command(flatten)]
        github: GithubEnvArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Upload {
            paths,
            retention_days,
            server,
            github,
        } => handle_upload_command(&paths, retention_days, &server, github).await,
        Commands::Health { server } => handle_health_command(&server).await,
    }
}

/// One file to upload: its manifest path and where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalFile {
    local_path: String,
    disk_path: PathBuf,
}

/// Manifest path of `path`: relative, `/`-separated, without `.` segments.
fn to_local_path(path: &Path) -> Result<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(
                segment
                    .to_str()
                    .with_context(|| format!("path is not UTF-8: {}", path.display()))?
                    .to_string(),
            ),
            Component::CurDir => {}
            Component::ParentDir => {
                anyhow::bail!("path must not leave the working directory: {}", path.display())
            }
            Component::RootDir | Component::Prefix(_) => {
                anyhow::bail!("path must be relative: {}", path.display())
            }
        }
    }
    let local_path = segments.join("/");
    validate_local_path(&local_path)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    Ok(local_path)
}

/// Expand `paths` into files, walking directories. Sorted by manifest path.
fn collect_files(root: &Path, paths: &[PathBuf]) -> Result<Vec<LocalFile>> {
    let mut files = BTreeMap::new();
    for path in paths {
        if path.is_absolute() {
            anyhow::bail!("path must be relative: {}", path.display());
        }
        let on_disk = root.join(path);
        if !on_disk.exists() {
            anyhow::bail!("no such file or directory: {}", path.display());
        }
        for entry in walkdir::WalkDir::new(&on_disk).follow_links(true) {
            let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("{} is outside the working directory", entry.path().display()))?;
            let local_path = to_local_path(relative)?;
            files.insert(
                local_path.clone(),
                LocalFile {
                    local_path,
                    disk_path: entry.path().to_path_buf(),
                },
            );
        }
    }
    Ok(files.into_values().collect())
}

fn build_request(
    server_url: &str,
    github: GithubEnvArgs,
    retention_days: u16,
    files: &[LocalFile],
) -> BulkRequest {
    BulkRequest {
        callback_url: format!("{}/upload", server_url.trim_end_matches('/')),
        client_payload: ClientPayload {
            github_token: github.github_token.filter(|t| !t.is_empty()),
            context: GithubActionsContext {
                git_ref: github.git_ref,
                sha: github.sha,
                run_id: github.run_id,
                run_attempt: github.run_attempt,
                job: github.job,
                repository: github.repository,
                github_origin: github.github_origin,
                github_api_url: github.github_api_url,
                github_retention_days: retention_days,
            },
        },
        files: files
            .iter()
            .map(|f| BulkFile {
                local_path: f.local_path.clone(),
                multipart: false,
            })
            .collect(),
    }
}

async fn upload_one(client: &ApiClient, result: &BulkResult, disk_path: &Path) -> Result<()> {
    let data = tokio::fs::read(disk_path)
        .await
        .with_context(|| format!("failed to read {}", disk_path.display()))?;
    client
        .put_blob(
            &result.pathname,
            &result.client_token,
            &result.content_type,
            data,
        )
        .await
        .with_context(|| format!("failed to upload {}", result.local_path))?;
    tracing::debug!(pathname = %result.pathname, "uploaded");
    Ok(())
}

/// PUT every file of `response`, chunk by chunk, stopping at the first failure.
async fn upload_files(
    client: &ApiClient,
    response: &BulkResponse,
    files: &[LocalFile],
) -> Result<()> {
    let disk_paths: BTreeMap<&str, &Path> = files
        .iter()
        .map(|f| (f.local_path.as_str(), f.disk_path.as_path()))
        .collect();

    for chunk in response.results.chunks(BULK_CHUNK_SIZE) {
        futures::stream::iter(chunk)
            .map(|result| {
                let disk_path = disk_paths.get(result.local_path.as_str()).copied();
                async move {
                    let disk_path = disk_path.with_context(|| {
                        format!("server returned unknown path {}", result.local_path)
                    })?;
                    upload_one(client, result, disk_path).await
                }
            })
            .buffer_unordered(UPLOAD_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;
    }
    Ok(())
}

async fn handle_upload_command(
    paths: &[PathBuf],
    retention_days: u16,
    server: &ServerArgs,
    github: GithubEnvArgs,
) -> Result<()> {
    let root = std::env::current_dir().context("failed to read working directory")?;
    let files = collect_files(&root, paths)?;
    if files.is_empty() {
        anyhow::bail!("nothing to upload");
    }

    let client = ApiClient::new(&server.server)?;
    let request = build_request(client.base_url(), github, retention_days, &files);
    let response = client
        .bulk(&request)
        .await
        .context("upload request was rejected")?;
    tracing::info!(files = response.results.len(), "client tokens received");

    upload_files(&client, &response, &files).await?;

    println!("Uploaded {} file(s):", response.results.len());
    for result in &response.results {
        println!("  {} -> {}", result.local_path, result.view_url);
    }
    if !response.entrypoints.is_empty() {
        println!("Entrypoints:");
        for entrypoint in &response.entrypoints {
            println!("  {entrypoint}");
        }
    }
    Ok(())
}

async fn handle_health_command(server: &ServerArgs) -> Result<()> {
    let client = ApiClient::new(&server.server)?;
    let health = client.health().await?;
    println!("Status: {}", health.status);
    println!("Version: {}", health.version);
    Ok(())
}
