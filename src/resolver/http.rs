use super::Resolver;
use super::archive;
use crate::cache::DownloadCoordinator;
use crate::cache::paths::module_dir_name;
use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::retry::download_with_retry;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::io;
use std::path::PathBuf;
use tokio_util::io::StreamReader;
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// Resolves `http://` and `https://` handles pointing at tar or tar.gz modules
///
/// The archive is streamed straight into the coordinator's temporary
/// directory and unpacked there; nothing is buffered in memory or on disk
/// beyond the unpacked files.
pub struct HttpCompressedResolver {
    cache_dir: PathBuf,
    coordinator: DownloadCoordinator,
    client: reqwest::Client,
    http: HttpConfig,
}

impl HttpCompressedResolver {
    /// Cache modules under `cache_dir`, downloading through `coordinator`
    pub fn new(cache_dir: PathBuf, coordinator: DownloadCoordinator, http: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self {
            cache_dir,
            coordinator,
            client,
            http,
        })
    }

    /// Where `handle` is cached: `<cache_dir>/<sha256 of handle>`
    pub fn module_dir(&self, handle: &str) -> PathBuf {
        self.cache_dir.join(module_dir_name(handle))
    }

    /// The URL actually requested for `handle`, with the format query appended
    pub fn request_url(&self, handle: &str) -> Result<Url> {
        let mut url = Url::parse(handle).map_err(|e| Error::InvalidArchive {
            handle: handle.to_string(),
            reason: format!("not a valid URL: {e}"),
        })?;
        if let Some(query) = &self.http.format_query {
            url.query_pairs_mut().append_pair(&query.key, &query.value);
        }
        Ok(url)
    }
}

async fn fetch(client: &reqwest::Client, url: &Url) -> Result<reqwest::Response> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

#[async_trait]
impl Resolver for HttpCompressedResolver {
    async fn is_supported(&self, handle: &str) -> bool {
        handle.starts_with("http://") || handle.starts_with("https://")
    }

    async fn resolve(&self, handle: &str) -> Result<PathBuf> {
        let module_dir = self.module_dir(handle);
        let url = self.request_url(handle)?;
        let client = self.client.clone();
        let retry = self.http.retry.clone();
        let cancel = self.coordinator.cancel_token().clone();

        self.coordinator
            .acquire(handle, &module_dir, move |_handle, temp_dir| async move {
                let response = download_with_retry(&retry, || fetch(&client, &url)).await?;
                if response.url() != &url {
                    tracing::info!(url = %url, final_url = %response.url(), "Module request redirected");
                }
                let source = response.url().to_string();
                let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
                archive::unpack_async(StreamReader::new(body), temp_dir, source, cancel).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "http-compressed"
    }
}
