use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::source_map::{rewrite_source_map_url, source_map_url, url_basename};
use crate::{FetchError, FetchedScript, ScriptFetcher};

/// File name the debugger worker is stored under in the sources storage path
pub const DEBUGGER_WORKER_FILE_BASENAME: &str = "debuggerWorker.js";

/// Fallback name when a script URL has no usable last path segment
const DEFAULT_SCRIPT_BASENAME: &str = "script.js";

/// Downloads scripts over HTTP and stores them under `sources_storage_path`.
#[derive(Clone)]
pub struct HttpScriptImporter {
    client: reqwest::Client,
    sources_storage_path: PathBuf,
}

impl HttpScriptImporter {
    pub fn new(sources_storage_path: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            sources_storage_path: sources_storage_path.into(),
        }
    }

    pub fn sources_storage_path(&self) -> &Path {
        &self.sources_storage_path
    }

    /// Download `debuggerWorker.js` from the packager and store it as
    /// `<storage>/<file_name>`.
    pub async fn download_debugger_worker(
        &self,
        packager_host: &str,
        file_name: &str,
    ) -> Result<PathBuf, FetchError> {
        let url = format!("http://{}/{}", packager_host, DEBUGGER_WORKER_FILE_BASENAME);
        let contents = fetch_text(&self.client, &url).await?;
        let path = self.sources_storage_path.join(file_name);
        store(&path, &contents).await?;
        info!("Downloaded {} from the packager", DEBUGGER_WORKER_FILE_BASENAME);
        Ok(path)
    }

    /// Download an app script and store it as `<storage>/<basename of url path>`.
    ///
    /// When the bundle names a source map, the map is downloaded next to it
    /// (best-effort) and the bundle's comment is rewritten to the local file.
    pub async fn download_app_script(&self, url: &str) -> Result<FetchedScript, FetchError> {
        let script_url = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut contents = fetch_text(&self.client, script_url.as_str()).await?;

        if let Some(map_url) = source_map_url(&script_url, &contents) {
            match self.download_source_map(&map_url).await {
                Ok(local_name) => {
                    contents = rewrite_source_map_url(&contents, &local_name);
                }
                Err(e) => {
                    warn!("Couldn't download the source map at <{}>: {}", map_url, e);
                }
            }
        }

        let basename = url_basename(&script_url).unwrap_or(DEFAULT_SCRIPT_BASENAME);
        let filepath = self.sources_storage_path.join(basename);
        store(&filepath, &contents).await?;
        debug!("Stored app script <{}> at {}", url, filepath.display());

        Ok(FetchedScript { filepath, contents })
    }

    async fn download_source_map(&self, map_url: &Url) -> Result<String, FetchError> {
        let name = url_basename(map_url)
            .ok_or_else(|| FetchError::InvalidUrl {
                url: map_url.to_string(),
                reason: "source map url has no file name".to_string(),
            })?
            .to_string();
        let body = fetch_text(&self.client, map_url.as_str()).await?;
        store(&self.sources_storage_path.join(&name), &body).await?;
        Ok(name)
    }
}

impl ScriptFetcher for HttpScriptImporter {
    fn fetch(
        &self,
        url: &str,
        debug_adapter_port: u16,
    ) -> BoxFuture<'static, Result<FetchedScript, FetchError>> {
        let importer = self.clone();
        let url = url.to_string();
        async move {
            debug!(debug_adapter_port, "Importing script <{}>", url);
            importer.download_app_script(&url).await
        }
        .boxed()
    }
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let request_error = |source| FetchError::Request {
        url: url.to_string(),
        source,
    };

    let resp = client.get(url).send().await.map_err(request_error)?;
    if !resp.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: resp.status().as_u16(),
        });
    }
    resp.text().await.map_err(request_error)
}

async fn store(path: &Path, contents: &str) -> Result<(), FetchError> {
    let store_error = |source| FetchError::Store {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(store_error)?;
    }
    tokio::fs::write(path, contents).await.map_err(store_error)
}
