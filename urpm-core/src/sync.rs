//! Synthesis-index sync.
//!
//! Downloads a media's `synthesis.hdlist.cz`, parses it, and swaps the
//! media's package rows wholesale. The synthesis format is a gzip-compressed
//! text file with one `@`-separated record line per field:
//!
//! ```text
//! @summary@Fast web browser
//! @filesize@62148930
//! @info@firefox-115.0-1.mga10.x86_64@0@248019731@Networking/WWW
//! ```
//!
//! `@info@` closes a package: its first field is the NEVRA (minus `.rpm`),
//! then epoch, installed size, and group.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::cache::{synthesis_path, synthesis_url};
use crate::error::{Result, UrpmError};
use crate::model::{MediaDescriptor, PackageRecord, SyncOutcome};
use crate::ports::MediaSync;
use crate::store::PackageStore;
use crate::USER_AGENT;

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Production [`MediaSync`]: fetch, decode, parse, replace.
#[derive(Debug)]
pub struct SynthesisSync {
    client: reqwest::Client,
    base_dir: PathBuf,
}

impl SynthesisSync {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_dir: base_dir.into(),
        })
    }

    async fn sync_inner(
        &self,
        store: &PackageStore,
        media: &MediaDescriptor,
        force: bool,
    ) -> Result<SyncOutcome> {
        let local = synthesis_path(&self.base_dir, &media.url, &media.name);

        // Without force, an already-materialized index is taken as current;
        // the freshness prober is the component that decides staleness.
        if !force && media.last_sync.is_some() && local.exists() {
            debug!("media {}: index present, skipping unforced sync", media.name);
            return Ok(SyncOutcome::ok(media.package_count));
        }

        let remote = synthesis_url(&media.url);
        info!("media {}: fetching {}", media.name, remote);
        let response = self
            .client
            .get(&remote)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        let packages = parse_synthesis(&decode_synthesis(&body)?, media);
        debug!("media {}: parsed {} packages", media.name, packages.len());

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, &body).await?;

        store
            .replace_packages(&media.name, &packages, Utc::now())
            .await?;
        store
            .record_event(
                "sync",
                Some(&media.name),
                &format!("{} packages", packages.len()),
            )
            .await?;

        Ok(SyncOutcome::ok(packages.len() as i64))
    }
}

#[async_trait]
impl MediaSync for SynthesisSync {
    async fn sync_media(&self, store: &PackageStore, media_name: &str, force: bool) -> SyncOutcome {
        let media = match store.get_media(media_name).await {
            Ok(Some(media)) => media,
            Ok(None) => return SyncOutcome::failed(format!("unknown media {media_name}")),
            Err(e) => return SyncOutcome::failed(e.to_string()),
        };
        if media.url.is_empty() {
            return SyncOutcome::failed(format!("media {media_name} has no URL"));
        }

        match self.sync_inner(store, &media, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("media {}: sync failed: {}", media_name, e);
                SyncOutcome::failed(e.to_string())
            }
        }
    }
}

/// Gunzip the raw index body.
fn decode_synthesis(body: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(body);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| UrpmError::InvalidSynthesis(format!("bad gzip stream: {e}")))?;
    // Synthesis files are latin-1-ish; lossy decoding keeps every record.
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Parse the decoded synthesis text into package rows for `media`.
fn parse_synthesis(text: &str, media: &MediaDescriptor) -> Vec<PackageRecord> {
    let base_url = media.url.trim_end_matches('/');
    let mut packages = Vec::new();
    let mut summary = String::new();

    for line in text.lines() {
        let mut fields = line.split('@');
        // Lines start with '@', so the first field is empty.
        let Some("") = fields.next() else { continue };
        match fields.next() {
            Some("summary") => {
                summary = fields.next().unwrap_or("").to_string();
            }
            Some("info") => {
                let Some(nevra) = fields.next() else { continue };
                let Some((name, version, release, arch)) = split_nevra(nevra) else {
                    warn!("media {}: unparseable package entry {}", media.name, nevra);
                    continue;
                };
                let epoch = fields
                    .next()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                let size = fields
                    .next()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);

                let filename = format!("{nevra}.rpm");
                packages.push(PackageRecord {
                    name: name.to_string(),
                    epoch,
                    version: version.to_string(),
                    release: release.to_string(),
                    arch: arch.to_string(),
                    url: format!("{base_url}/{filename}"),
                    filename,
                    size,
                    media: media.name.clone(),
                    summary: std::mem::take(&mut summary),
                });
            }
            _ => {}
        }
    }

    packages
}

/// Split `name-version-release.arch` from the right, so dashes inside the
/// package name survive.
fn split_nevra(nevra: &str) -> Option<(&str, &str, &str, &str)> {
    let (rest, arch) = nevra.rsplit_once('.')?;
    let (rest, release) = rest.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() || release.is_empty() || arch.is_empty() {
        return None;
    }
    Some((name, version, release, arch))
}
