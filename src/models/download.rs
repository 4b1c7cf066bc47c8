//! Model download pipeline
//!
//! Populates `<models_dir>/<model_id>` from a manifest entry. Files are
//! written to a `<destination>.tmp` staging directory first and the staging
//! directory is only promoted once every file has been fetched, so a model
//! directory is never observed half written. Any failure removes the staging
//! directory and reports every collected reason; nothing is retried.

use super::storage;
use crate::manifest::{HubSource, ManifestEntry, ModelSource};
use futures::StreamExt;
use serde::Deserialize;
use std::fmt;
use reqwest::Url;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;

/// Default public hub endpoint
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Time allowed to establish a connection to the hub
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest pause allowed between two reads of a hub response
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Every reason a download did not complete, in the order they were recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailures(Vec<String>);

impl DownloadFailures {
    pub fn single(reason: impl Into<String>) -> Self {
        Self(vec![reason.into()])
    }

    pub fn reasons(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for DownloadFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for reason in &self.0 {
            writeln!(f, "{}", reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for DownloadFailures {}

/// Partial model info returned by the hub's metadata endpoint
#[derive(Debug, Deserialize)]
struct HubModelInfo {
    #[serde(default)]
    siblings: Vec<HubSibling>,
}

#[derive(Debug, Deserialize)]
struct HubSibling {
    rfilename: String,
}

/// HTTP client for a model hub
///
/// Listing uses `GET {endpoint}/api/models/{repo}`, files are fetched from
/// `GET {endpoint}/{repo}/resolve/main/{file}`. Redirects are followed.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HubClient {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeouts(endpoint, token, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// A stalled hub fails the affected file once `read_timeout` elapses
    /// without data, so an in-flight download always finishes.
    pub fn with_timeouts(
        endpoint: &str,
        token: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("model-host/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Endpoint URL extended with percent-encoded path segments
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, String> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| format!("Invalid hub endpoint {}: {}", self.endpoint, e))?;
        url.path_segments_mut()
            .map_err(|_| format!("Invalid hub endpoint {}", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn listing_url(&self, repo: &str) -> Result<Url, String> {
        self.url(["api", "models"].into_iter().chain(repo.split('/')))
    }

    fn file_url(&self, repo: &str, file: &str) -> Result<Url, String> {
        self.url(
            repo.split('/')
                .chain(["resolve", "main"])
                .chain(file.split('/')),
        )
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List every file in a repository
    pub async fn list_files(&self, repo: &str) -> Result<Vec<String>, String> {
        let url = self.listing_url(repo)?;

        let response = self
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Failed to retrieve model info: {} ({})", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "Failed to retrieve model info: {} (Status: {})",
                url,
                status.as_u16()
            ));
        }

        let info: HubModelInfo = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse model info from {}: {}", url, e))?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// Fetch one file, appending the body to `target` as it arrives
    pub async fn download_file(&self, repo: &str, file: &str, target: &Path) -> Result<(), String> {
        let url = self.file_url(repo, file)?;

        let response = self
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Failed to download: {} ({})", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "Failed to download: {} (Status: {})",
                url,
                status.as_u16()
            ));
        }

        let mut out = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .await
            .map_err(|e| format!("Failed to open {:?}: {}", target, e))?;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| format!("Failed to download: {} ({})", url, e))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| format!("Failed to write {:?}: {}", target, e))?;
        }
        out.flush()
            .await
            .map_err(|e| format!("Failed to write {:?}: {}", target, e))?;

        tracing::debug!(file = %file, target = ?target, "Downloaded file");
        Ok(())
    }
}

/// Fetches declared models into local storage
#[derive(Debug, Clone)]
pub struct Downloader {
    hub: HubClient,
}

impl Downloader {
    pub fn new(hub: HubClient) -> Self {
        Self { hub }
    }

    /// Populate `destination` from the entry's source
    ///
    /// On success `destination` holds the complete model. On failure neither
    /// `destination` (unless it pre-existed) nor its staging directory is
    /// left behind.
    pub async fn fetch(
        &self,
        entry: &ManifestEntry,
        destination: &Path,
    ) -> Result<(), DownloadFailures> {
        tracing::info!(
            model_id = %entry.model_id,
            source = %entry.source.kind(),
            destination = ?destination,
            "Starting model download"
        );

        match &entry.source {
            ModelSource::RemoteHub(hub) => self.fetch_remote(hub, destination).await,
            ModelSource::LocalPath(path) => fetch_local(path, destination).await,
            ModelSource::Unknown { kind, .. } => Err(DownloadFailures::single(format!(
                "Unsupported model source '{}' for model '{}'",
                kind, entry.model_id
            ))),
        }
    }

    async fn fetch_remote(
        &self,
        source: &HubSource,
        destination: &Path,
    ) -> Result<(), DownloadFailures> {
        let files = self
            .hub
            .list_files(&source.repo)
            .await
            .map_err(DownloadFailures::single)?;

        let total = files.len();
        let selected: Vec<String> = files.into_iter().filter(|f| source.includes(f)).collect();
        if selected.is_empty() {
            return Err(DownloadFailures::single(format!(
                "No files in {} match include filter '{}'",
                source.repo, source.include_filter
            )));
        }

        tracing::info!(
            repo = %source.repo,
            total_files = total,
            selected_files = selected.len(),
            "Resolved model file listing"
        );

        let staging = prepare_staging(destination).await?;

        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();

        // Files are stored flat under the model directory by base name
        let mut names = HashSet::new();
        for file in selected {
            let Some(name) = file_name(&file) else {
                failures.push(format!("Refusing to download {}: no file name", file));
                continue;
            };
            if !names.insert(name.clone()) {
                failures.push(format!(
                    "Refusing to download {}: another selected file is also named {}",
                    file, name
                ));
                continue;
            }

            if tokio::fs::try_exists(destination.join(&name))
                .await
                .unwrap_or(false)
            {
                tracing::debug!(file = %file, "File already exists at destination, skipping");
                continue;
            }

            let target = staging.join(&name);
            let hub = self.hub.clone();
            let repo = source.repo.clone();
            tasks.spawn(async move { hub.download_file(&repo, &file, &target).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => {
                    tracing::warn!(reason = %reason, "File download failed");
                    failures.push(reason);
                }
                Err(e) => failures.push(format!("Download task failed: {}", e)),
            }
        }

        finish_staging(&staging, destination, failures).await
    }
}

async fn fetch_local(source: &Path, destination: &Path) -> Result<(), DownloadFailures> {
    let staging = prepare_staging(destination).await?;

    let failures = match copy_dir(source, &staging).await {
        Ok(()) => Vec::new(),
        Err(e) => vec![format!(
            "Failed to copy {:?} to {:?}: {}",
            source, destination, e
        )],
    };

    finish_staging(&staging, destination, failures).await
}

/// Create an empty staging directory for `destination`
///
/// A leftover staging directory is discarded first since files are written
/// in append mode.
async fn prepare_staging(destination: &Path) -> Result<PathBuf, DownloadFailures> {
    let staging = storage::staging_dir(destination);

    if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
        tracing::warn!(staging = ?staging, "Discarding leftover staging directory");
        tokio::fs::remove_dir_all(&staging).await.map_err(|e| {
            DownloadFailures::single(format!(
                "Failed to remove temporary directory: {:?} : {}",
                staging, e
            ))
        })?;
    }

    tokio::fs::create_dir_all(&staging).await.map_err(|e| {
        DownloadFailures::single(format!(
            "Failed to create temporary directory: {:?} : {}",
            staging, e
        ))
    })?;

    Ok(staging)
}

/// Promote the staging directory, or discard it if anything failed
async fn finish_staging(
    staging: &Path,
    destination: &Path,
    mut failures: Vec<String>,
) -> Result<(), DownloadFailures> {
    if failures.is_empty() {
        match promote(staging, destination).await {
            Ok(()) => {
                tracing::info!(destination = ?destination, "All files downloaded and moved to destination");
                return Ok(());
            }
            Err(e) => failures.push(format!(
                "Failed to rename temporary directory to destination: {:?} : {}",
                destination, e
            )),
        }
    }

    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => {
            tracing::warn!(staging = ?staging, "Download failed, temporary directory removed");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => failures.push(format!(
            "Failed to remove temporary directory: {:?} : {}",
            staging, e
        )),
    }

    Err(DownloadFailures(failures))
}

/// Move a complete staging directory into place
///
/// Normally a single rename. When the destination already exists the staged
/// files are moved into it one by one.
async fn promote(staging: &Path, destination: &Path) -> std::io::Result<()> {
    if !tokio::fs::try_exists(destination).await? {
        return tokio::fs::rename(staging, destination).await;
    }

    let mut pending = vec![(staging.to_path_buf(), destination.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::rename(entry.path(), target).await?;
            }
        }
    }

    tokio::fs::remove_dir_all(staging).await
}

/// Recursively copy a directory tree
async fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), dest));
            } else {
                tokio::fs::copy(entry.path(), &dest).await?;
            }
        }
    }

    Ok(())
}

/// Base name of a remote file, `None` when the path has no usable one
fn file_name(file: &str) -> Option<String> {
    Path::new(file)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
