//! The on-disk cache tree.
//!
//! Layout: `<base>/medias/<hostname>/<media>/{media_info/synthesis.hdlist.cz,
//! *.rpm}` where `<hostname>` is the network host of the media URL,
//! lowercased. The filesystem is authoritative; no database row shadows an
//! artifact. Writers stage files under their final paths and readers tolerate
//! `ENOENT` by reporting the file missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::SYNTHESIS_NAME;

/// Network host component of a media URL, lowercased. URLs without a host
/// (file paths, garbage) collapse into a `local` bucket.
pub fn hostname_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| "local".to_string())
}

/// `<base>/medias/<hostname>/<media>` for one media.
pub fn media_dir(base: &Path, media_url: &str, media_name: &str) -> PathBuf {
    base.join("medias")
        .join(hostname_from_url(media_url))
        .join(media_name)
}

/// Local path of a media's cached synthesis index.
pub fn synthesis_path(base: &Path, media_url: &str, media_name: &str) -> PathBuf {
    media_dir(base, media_url, media_name)
        .join("media_info")
        .join(SYNTHESIS_NAME)
}

/// Remote URL of a media's synthesis index.
pub fn synthesis_url(media_url: &str) -> String {
    format!("{}/media_info/{}", media_url.trim_end_matches('/'), SYNTHESIS_NAME)
}

/// One cache hit returned by [`lookup`].
#[derive(Debug, Clone, Serialize)]
pub struct CachedArtifact {
    pub filename: String,
    pub size: u64,
    /// Relative `hostname/media/filename`, fetchable from the daemon's
    /// static `/medias/` service.
    pub path: String,
}

/// Result of a `have` query over the cache tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheReport {
    pub available: Vec<CachedArtifact>,
    pub missing: Vec<String>,
    pub available_count: usize,
    pub missing_count: usize,
}

/// Which of `filenames` already sit in the cache tree under `base`.
///
/// The search walks `medias/*/*/filename` and stops at the first hit per
/// filename. Names that are empty or lack the `.rpm` extension are reported
/// missing without touching the filesystem. Stat errors on a candidate skip
/// to the next media directory.
pub fn lookup(base: &Path, filenames: &[String]) -> CacheReport {
    let mut report = CacheReport::default();
    let medias_dir = base.join("medias");

    for filename in filenames {
        if filename.is_empty() || !filename.ends_with(".rpm") {
            report.missing.push(if filename.is_empty() {
                "<invalid>".to_string()
            } else {
                filename.clone()
            });
            continue;
        }

        match find_artifact(&medias_dir, filename) {
            Some(artifact) => report.available.push(artifact),
            None => report.missing.push(filename.clone()),
        }
    }

    report.available_count = report.available.len();
    report.missing_count = report.missing.len();
    report
}

fn find_artifact(medias_dir: &Path, filename: &str) -> Option<CachedArtifact> {
    let hosts = fs::read_dir(medias_dir).ok()?;

    for host_entry in hosts.flatten() {
        let host_path = host_entry.path();
        if !host_path.is_dir() {
            continue;
        }
        let Ok(media_dirs) = fs::read_dir(&host_path) else {
            continue;
        };
        for media_entry in media_dirs.flatten() {
            let media_path = media_entry.path();
            if !media_path.is_dir() {
                continue;
            }
            let candidate = media_path.join(filename);
            let Ok(meta) = candidate.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            return Some(CachedArtifact {
                filename: filename.to_string(),
                size: meta.len(),
                path: format!(
                    "{}/{}/{}",
                    host_entry.file_name().to_string_lossy(),
                    media_entry.file_name().to_string_lossy(),
                    filename
                ),
            });
        }
    }
    None
}

/// Summary of one cleanup sweep.
#[derive(Debug, Clone, Default)]
pub struct CleanupStats {
    pub removed: u64,
    pub freed_bytes: u64,
    pub errors: u64,
}

/// Delete every `*.rpm` under `base` whose mtime is older than `max_age`.
///
/// Fresh artifacts are retained unconditionally; the pre-download engine runs
/// this right after writing new files, so their mtimes protect them.
/// Per-file errors are logged and skipped.
pub fn sweep_expired(base: &Path, max_age: Duration) -> CleanupStats {
    sweep_before(base, SystemTime::now() - max_age)
}

/// [`sweep_expired`] with an explicit cutoff instant.
pub fn sweep_before(base: &Path, cutoff: SystemTime) -> CleanupStats {
    let mut stats = CleanupStats::default();

    for entry in walkdir::WalkDir::new(base)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if entry.path().extension().is_none_or(|ext| ext != "rpm") {
            continue;
        }

        let (size, mtime) = match entry.metadata() {
            Ok(meta) => match meta.modified() {
                Ok(mtime) => (meta.len(), mtime),
                Err(e) => {
                    warn!("could not read mtime of {}: {}", entry.path().display(), e);
                    stats.errors += 1;
                    continue;
                }
            },
            Err(e) => {
                warn!("could not stat {}: {}", entry.path().display(), e);
                stats.errors += 1;
                continue;
            }
        };

        if mtime >= cutoff {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("removed old cached file: {}", entry.path().display());
                stats.removed += 1;
                stats.freed_bytes += size;
            }
            Err(e) => {
                warn!("could not remove {}: {}", entry.path().display(), e);
                stats.errors += 1;
            }
        }
    }

    stats
}
