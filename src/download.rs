use crate::config::ModelSource;
use anyhow::{anyhow, Context};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    time::timeout,
};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest wait for response headers or for the next body chunk.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Local cache of model artifacts fetched from a model hub.
pub struct ArtifactStore {
    client: reqwest::Client,
    hub_url: String,
    cache_dir: PathBuf,
    stall_timeout: Duration,
}

impl ArtifactStore {
    pub fn new(hub_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Self::with_timeouts(hub_url, cache_dir, CONNECT_TIMEOUT, STALL_TIMEOUT)
    }

    /// A whole-request timeout would cut off large weight files on slow links, so
    /// only connecting and each wait for data are bounded.
    pub fn with_timeouts(
        hub_url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        connect_timeout: Duration,
        stall_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            hub_url: hub_url.into(),
            cache_dir: cache_dir.into(),
            stall_timeout,
        })
    }

    pub fn local_path(&self, source: &ModelSource, file: &str) -> PathBuf {
        self.cache_dir.join(&source.repo).join(file)
    }

    pub fn remote_url(&self, source: &ModelSource, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.hub_url, source.repo, source.revision, file
        )
    }

    pub async fn download_if_not_exists(
        &self,
        source: &ModelSource,
        file: &str,
    ) -> anyhow::Result<PathBuf> {
        let file_path = self.local_path(source, file);
        if file_path.exists() {
            return Ok(file_path);
        }

        let download_url = self.remote_url(source, file);
        info!("downloading {}", download_url);

        let response = timeout(self.stall_timeout, self.client.get(&download_url).send())
            .await
            .map_err(|_| anyhow!("no response from {download_url}"))??
            .error_for_status()
            .with_context(|| format!("failed to fetch {download_url}"))?;

        if let Some(parent_dir) = file_path.parent() {
            fs::create_dir_all(parent_dir).await?;
        }

        // stream into a sibling so an interrupted download is never picked up as complete
        let temp_download_path = partial_path(&file_path);
        if let Err(e) = self.stream_to(response, &temp_download_path).await {
            if let Err(remove_err) = fs::remove_file(&temp_download_path).await {
                warn!("failed to remove {:?}: {}", temp_download_path, remove_err);
            }
            return Err(e.context(format!("failed to download {download_url}")));
        }
        fs::rename(&temp_download_path, &file_path).await?;

        info!("file {:?} downloaded", file_path);

        Ok(file_path)
    }

    async fn stream_to(&self, mut response: reqwest::Response, path: &Path) -> anyhow::Result<()> {
        let mut file = File::create(path).await?;
        while let Some(chunk) = timeout(self.stall_timeout, response.chunk())
            .await
            .map_err(|_| anyhow!("download stalled for {:?}", self.stall_timeout))??
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}
