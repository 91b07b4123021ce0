//! Metadata freshness probing.
//!
//! Detecting an upstream change must be cheap enough to run hourly against
//! every media, so the prober never downloads the index. It compares the
//! local cached copy's size and mtime against an HTTP HEAD of the remote one
//! and fails open: any doubt means "changed" and a redundant sync, never a
//! missed update.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use reqwest::header;
use tracing::{debug, error, info, warn};

use crate::cache::{synthesis_path, synthesis_url};
use crate::error::Result;
use crate::model::MediaDescriptor;
use crate::ports::MediaSync;
use crate::store::PackageStore;
use crate::USER_AGENT;

const HEAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters for one freshness pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshnessSummary {
    pub checked: usize,
    pub changed: usize,
}

/// Decides, per enabled media, whether the upstream synthesis index differs
/// from the local cached copy.
#[derive(Debug)]
pub struct FreshnessProber {
    client: reqwest::Client,
    base_dir: PathBuf,
}

impl FreshnessProber {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HEAD_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_dir: base_dir.into(),
        })
    }

    /// Probe every enabled media and hand the changed ones to `sync` with
    /// `force=true`.
    pub async fn run_check(&self, store: &PackageStore, sync: &dyn MediaSync) -> Result<FreshnessSummary> {
        let media_list = store.list_media().await?;
        debug!("found {} media in database", media_list.len());

        let mut summary = FreshnessSummary::default();
        for media in media_list {
            if !media.enabled || media.url.is_empty() {
                continue;
            }
            summary.checked += 1;

            if !self.synthesis_changed(&media).await {
                debug!("media {}: synthesis unchanged", media.name);
                continue;
            }
            summary.changed += 1;
            info!("media {}: synthesis changed, refreshing", media.name);

            let outcome = sync.sync_media(store, &media.name, true).await;
            if outcome.success {
                info!("media {}: synced {} packages", media.name, outcome.packages_count);
            } else {
                error!(
                    "media {}: sync failed - {}",
                    media.name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Ok(summary)
    }

    /// Whether the remote synthesis index differs from the local copy.
    pub async fn synthesis_changed(&self, media: &MediaDescriptor) -> bool {
        let local = synthesis_path(&self.base_dir, &media.url, &media.name);

        let meta = match local.metadata() {
            Ok(meta) => meta,
            Err(_) => {
                debug!("local file missing: {}", local.display());
                return true;
            }
        };
        let local_size = meta.len();
        let local_mtime = meta.modified().ok();

        let remote = synthesis_url(&media.url);
        let response = match self.client.head(&remote).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("could not check {}: {}", remote, e);
                return true;
            }
        };
        if !response.status().is_success() {
            warn!("HTTP HEAD failed for {}: {}", remote, response.status());
            return true;
        }

        let remote_size = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let remote_mtime = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        debug!(
            "media {}: local size={} remote size={:?} remote mtime={:?}",
            media.name, local_size, remote_size, remote_mtime
        );

        synthesis_differs(local_size, local_mtime, remote_size, remote_mtime)
    }
}

/// The comparison itself, `Some` meaning the header was present and parsed.
///
/// A known remote size that differs wins; otherwise a strictly newer remote
/// mtime wins; otherwise the index is considered current. Unparseable
/// headers just drop out of the comparison.
fn synthesis_differs(
    local_size: u64,
    local_mtime: Option<SystemTime>,
    remote_size: Option<u64>,
    remote_mtime: Option<SystemTime>,
) -> bool {
    if let Some(remote_size) = remote_size {
        if remote_size != local_size {
            return true;
        }
    }
    if let (Some(local), Some(remote)) = (local_mtime, remote_mtime) {
        if remote > local {
            return true;
        }
    }
    false
}
