//! Record types shared between the store, the scheduler, and the HTTP
//! surface. Everything here serializes straight into the daemon's JSON
//! payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named upstream package repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub name: String,
    /// Base URL of the remote repository.
    pub url: String,
    pub enabled: bool,
    /// Marks update channels.
    pub update_media: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub package_count: i64,
}

/// One package row, keyed by `(name, epoch, version, release, arch)`.
///
/// Rows are replaced wholesale whenever a media resyncs; they are never
/// mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub epoch: i64,
    pub version: String,
    pub release: String,
    pub arch: String,
    /// Absolute fetch URL.
    pub url: String,
    /// RPM basename.
    pub filename: String,
    pub size: i64,
    /// Owning media name.
    pub media: String,
    pub summary: String,
}

impl PackageRecord {
    /// `version-release` shorthand used in upgrade payloads.
    pub fn evr_string(&self) -> String {
        if self.epoch > 0 {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        } else {
            format!("{}-{}", self.version, self.release)
        }
    }
}

/// A LAN neighbor willing to serve cached RPMs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub media: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of syncing one media's synthesis index.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub packages_count: i64,
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn ok(packages_count: i64) -> Self {
        Self {
            success: true,
            packages_count,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            packages_count: 0,
            error: Some(error.into()),
        }
    }
}

/// One proposed upgrade, produced by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeAction {
    pub name: String,
    /// Installed `[epoch:]version-release`.
    pub from_evr: String,
    /// Candidate `[epoch:]version-release`.
    pub evr: String,
    pub arch: String,
    pub size: i64,
    pub url: Option<String>,
    pub filename: Option<String>,
}

/// Resolver result: ordered actions plus any per-package problems.
#[derive(Debug, Clone, Default)]
pub struct UpgradePlan {
    pub actions: Vec<UpgradeAction>,
    pub success: bool,
    pub problems: Vec<String>,
}

impl UpgradePlan {
    pub fn total_size(&self) -> i64 {
        self.actions.iter().map(|a| a.size).sum()
    }
}

/// One file the fetcher should materialize into the cache tree.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub url: String,
    pub filename: String,
    pub size: i64,
    /// Owning media name; decides the `medias/<host>/<media>/` placement.
    pub media: String,
}

/// Per-run download counters.
#[derive(Debug, Clone, Default)]
pub struct DownloadOutcome {
    /// Files actually transferred.
    pub downloaded: u64,
    /// Files already present with the expected size.
    pub cached: u64,
    pub errors: Vec<String>,
}

/// An installed package as reported by the host's RPM database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub epoch: i64,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl InstalledPackage {
    pub fn evr_string(&self) -> String {
        if self.epoch > 0 {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        } else {
            format!("{}-{}", self.version, self.release)
        }
    }
}

/// Audit row appended by sync, pre-download, and cleanup operations.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: i64,
    pub operation: String,
    pub media: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
