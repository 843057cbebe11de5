use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, TryStreamExt};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, instrument};

pub static USER_AGENT: &str = concat!("map-tile-downloader/", env!("CARGO_PKG_VERSION"));

/// Transfers a single tile image to disk.
pub trait TileFetcher: Send + Sync {
    /// Downloads `url` into `dest`, returning the number of bytes written.
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpFetcher { client })
    }

    #[instrument(level = "debug", skip(self))]
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let dir = dest
            .parent()
            .ok_or_else(|| anyhow!("tile path {} has no parent directory", dest.display()))?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create tile directory {}", dir.display()))?;

        let res = self.client.get(url).send().await?.error_for_status()?;
        debug!(status = %res.status(), "fetched tile");

        // Stream into a sibling temp file so an interrupted transfer never
        // leaves a truncated tile at `dest`.
        let temp = NamedTempFile::new_in(dir)?;
        let mut tokio_file = File::from_std(temp.reopen()?);
        let mut byte_stream = res
            .bytes_stream()
            .map_err(|e| futures::io::Error::new(futures::io::ErrorKind::Other, e))
            .into_async_read()
            .compat();

        let written = tokio::io::copy(&mut byte_stream, &mut tokio_file).await?;
        tokio_file.flush().await?;
        drop(tokio_file);

        temp.persist(dest)
            .with_context(|| format!("failed to move tile into {}", dest.display()))?;
        Ok(written)
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
        self.download(url, dest).boxed()
    }
}
