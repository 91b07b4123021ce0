//! Collaborator contracts the daemon schedules against.
//!
//! The scheduler and the HTTP surface only see these traits; production
//! implementations live in [`crate::sync`], [`crate::resolver`], and
//! [`crate::download`], and tests wire fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DownloadItem, DownloadOutcome, SyncOutcome, UpgradePlan};
use crate::store::PackageStore;

/// Rewrites one media's package rows from its upstream synthesis index.
#[async_trait]
pub trait MediaSync: Send + Sync {
    /// Sync `media_name` through the given store handle. `force` refetches
    /// even when the local index looks current. Never panics; failures come
    /// back inside the outcome.
    async fn sync_media(&self, store: &PackageStore, media_name: &str, force: bool) -> SyncOutcome;
}

/// Computes the pending-upgrade set for this host. No side effects on the
/// store.
#[async_trait]
pub trait UpgradeResolver: Send + Sync {
    async fn resolve_upgrade(&self, store: &PackageStore) -> Result<UpgradePlan>;
}

/// Progress callback: `(item, bytes_downloaded, bytes_total)`.
pub type ProgressFn = dyn Fn(&DownloadItem, u64, u64) + Send + Sync;

/// Materializes files into the cache tree.
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    async fn download(&self, items: &[DownloadItem], progress: &ProgressFn) -> DownloadOutcome;
}
