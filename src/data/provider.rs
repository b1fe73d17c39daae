/// Data providers: where raw archive bytes come from
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{ConversionError, Result};
use crate::types::ApiConfig;

/// Source of raw file bytes keyed by path
pub trait DataProvider: Send + Sync + 'static {
    /// Bytes stored at `path`, or `None` if there is nothing there
    fn fetch(&self, path: &Path) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;
}

/// Reads straight from local disk
#[derive(Debug, Clone, Default)]
pub struct DefaultDataProvider;

impl DataProvider for DefaultDataProvider {
    async fn fetch(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Local disk first; on a miss, downloads from the remote data library
/// and stores the file under the local data root.
pub struct ApiDataProvider {
    local: DefaultDataProvider,
    client: Client,
    base_url: String,
    token: String,
    data_root: PathBuf,
}

impl ApiDataProvider {
    pub fn new(config: &ApiConfig, data_root: impl Into<PathBuf>) -> Self {
        ApiDataProvider {
            local: DefaultDataProvider,
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            data_root: data_root.into(),
        }
    }

    fn remote_url(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.data_root).map_err(|_| {
            ConversionError::InvalidParameter(format!(
                "{} is outside data root {}",
                path.display(),
                self.data_root.display()
            ))
        })?;

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        Ok(format!("{}/{}", self.base_url, parts.join("/")))
    }
}

impl DataProvider for ApiDataProvider {
    async fn fetch(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.local.fetch(path).await? {
            debug!("Data already on disk for {}", path.display());
            return Ok(Some(bytes));
        }

        let url = self.remote_url(path)?;
        info!("📥 Downloading {} from data library", url);

        let response = self.client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!("Data library has no file for {}", path.display());
            return Ok(None);
        }

        let bytes = response.error_for_status()?.bytes().await?.to_vec();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;

        info!("✅ Stored {} bytes at {}", bytes.len(), path.display());
        Ok(Some(bytes))
    }
}
