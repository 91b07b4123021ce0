//! HTTP fetcher that materializes RPMs into the cache tree.
//!
//! Files land directly under their final `medias/<host>/<media>/` path; a
//! failed transfer removes the partial file so a half-written RPM never
//! satisfies a later `have` query.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::cache::hostname_from_url;
use crate::error::{Result, UrpmError};
use crate::model::{DownloadItem, DownloadOutcome};
use crate::ports::{PackageFetcher, ProgressFn};
use crate::USER_AGENT;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reqwest-backed [`PackageFetcher`] writing under a cache base directory.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
        })
    }

    fn destination(&self, item: &DownloadItem) -> PathBuf {
        self.cache_dir
            .join("medias")
            .join(hostname_from_url(&item.url))
            .join(&item.media)
            .join(&item.filename)
    }

    async fn fetch_one(&self, item: &DownloadItem, progress: &ProgressFn) -> Result<()> {
        let dest = self.destination(item);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(&item.url).send().await?.error_for_status()?;
        let total = response
            .content_length()
            .unwrap_or(item.size.max(0) as u64);

        let mut file = fs::File::create(&dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&dest).await;
                    return Err(UrpmError::Network(e));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = fs::remove_file(&dest).await;
                return Err(UrpmError::Io(e));
            }
            written += chunk.len() as u64;
            progress(item, written, total);
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl PackageFetcher for HttpFetcher {
    async fn download(&self, items: &[DownloadItem], progress: &ProgressFn) -> DownloadOutcome {
        let mut outcome = DownloadOutcome::default();

        for item in items {
            // Already materialized with the expected size: nothing to fetch.
            if let Ok(meta) = self.destination(item).metadata() {
                if meta.is_file() && (item.size <= 0 || meta.len() == item.size as u64) {
                    debug!("{} already cached", item.filename);
                    progress(item, meta.len(), meta.len());
                    outcome.cached += 1;
                    continue;
                }
            }

            match self.fetch_one(item, progress).await {
                Ok(()) => outcome.downloaded += 1,
                Err(e) => {
                    warn!("download of {} failed: {}", item.filename, e);
                    outcome.errors.push(format!("{}: {}", item.filename, e));
                }
            }
        }

        outcome
    }
}
