//! Speculative pre-downloading of pending upgrades.
//!
//! On an idle host, every RPM a pending upgrade needs is materialized into
//! the cache ahead of time, so the eventual user-triggered upgrade works
//! offline. Each run resolves, gates on total size and idleness, downloads,
//! and then sweeps stale artifacts; freshly written files carry new mtimes,
//! which keeps the sweep away from them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use urpm_core::cache;
use urpm_core::error::{Result, UrpmError};
use urpm_core::idle::IdleProbe;
use urpm_core::model::{DownloadItem, DownloadOutcome};
use urpm_core::ports::{PackageFetcher, UpgradeResolver};
use urpm_core::store::PackageStore;
use urpm_core::CleanupStats;

use crate::config::DaemonConfig;

/// Why a run stopped before downloading anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoUpdates,
    TooLarge,
    NotIdle,
}

/// Outcome of one engine run. Cleanup statistics exist exactly when the
/// download phase ran.
#[derive(Debug)]
pub enum PredownloadRun {
    Skipped(SkipReason),
    Completed {
        outcome: DownloadOutcome,
        cleanup: CleanupStats,
    },
}

/// The pre-download pipeline: resolve, gate, fetch, sweep.
pub struct PredownloadEngine {
    resolver: Arc<dyn UpgradeResolver>,
    fetcher: Arc<dyn PackageFetcher>,
    idle: IdleProbe,
    base_dir: PathBuf,
    max_total_bytes: u64,
    cache_max_age: Duration,
}

impl std::fmt::Debug for PredownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredownloadEngine")
            .field("base_dir", &self.base_dir)
            .field("max_total_bytes", &self.max_total_bytes)
            .finish_non_exhaustive()
    }
}

impl PredownloadEngine {
    pub fn new(
        config: &DaemonConfig,
        resolver: Arc<dyn UpgradeResolver>,
        fetcher: Arc<dyn PackageFetcher>,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            idle: IdleProbe::new(config.max_cpu_load, config.max_net_kbps),
            base_dir: config.base_dir.clone(),
            max_total_bytes: config.max_predownload_bytes,
            cache_max_age: config.cache_max_age,
        }
    }

    /// Swap the idle probe, e.g. for one reading fixture stat files.
    #[cfg(test)]
    pub fn with_idle_probe(mut self, idle: IdleProbe) -> Self {
        self.idle = idle;
        self
    }

    /// One full pipeline run against the given store handle.
    pub async fn run(&self, store: &PackageStore) -> Result<PredownloadRun> {
        let plan = self.resolver.resolve_upgrade(store).await?;
        if !plan.success {
            return Err(UrpmError::Resolver(plan.problems.join("; ")));
        }
        if plan.actions.is_empty() {
            debug!("no updates to pre-download");
            return Ok(PredownloadRun::Skipped(SkipReason::NoUpdates));
        }

        let total = plan.total_size().max(0) as u64;
        if total > self.max_total_bytes {
            info!(
                "updates too large to pre-download: {:.1} MB",
                total as f64 / 1024.0 / 1024.0
            );
            return Ok(PredownloadRun::Skipped(SkipReason::TooLarge));
        }

        if !self.idle.is_idle() {
            debug!("skipping pre-download: system not idle");
            return Ok(PredownloadRun::Skipped(SkipReason::NotIdle));
        }

        let items = self.build_items(store, &plan.actions).await?;
        info!(
            "pre-downloading {} packages ({:.1} MB)",
            items.len(),
            total as f64 / 1024.0 / 1024.0
        );

        let outcome = self
            .fetcher
            .download(&items, &|item, downloaded, total| {
                if total > 0 {
                    debug!(
                        "pre-downloading {}: {}%",
                        item.filename,
                        downloaded * 100 / total
                    );
                }
            })
            .await;
        info!(
            "pre-download complete: {} downloaded, {} cached, {} errors",
            outcome.downloaded,
            outcome.cached,
            outcome.errors.len()
        );
        store
            .record_event(
                "predownload",
                None,
                &format!(
                    "{} downloaded, {} cached, {} errors",
                    outcome.downloaded,
                    outcome.cached,
                    outcome.errors.len()
                ),
            )
            .await?;

        let cleanup = self.run_cleanup(store).await?;
        Ok(PredownloadRun::Completed { outcome, cleanup })
    }

    /// Translate upgrade actions into download items via the store, so the
    /// items carry the owning media for cache placement. Actions whose
    /// package row has vanished are skipped.
    async fn build_items(
        &self,
        store: &PackageStore,
        actions: &[urpm_core::model::UpgradeAction],
    ) -> Result<Vec<DownloadItem>> {
        let mut items = Vec::with_capacity(actions.len());
        for action in actions {
            let Some(pkg) = store.get_package(&action.name).await? else {
                warn!("no package row for pending upgrade {}", action.name);
                continue;
            };
            if pkg.url.is_empty() || pkg.filename.is_empty() {
                continue;
            }
            items.push(DownloadItem {
                url: pkg.url,
                filename: pkg.filename,
                size: if action.size > 0 { action.size } else { pkg.size },
                media: pkg.media,
            });
        }
        Ok(items)
    }

    /// Post-predownload sweep of month-old artifacts.
    async fn run_cleanup(&self, store: &PackageStore) -> Result<CleanupStats> {
        info!("running cache cleanup");
        let base = self.base_dir.clone();
        let max_age = self.cache_max_age;
        let stats = tokio::task::spawn_blocking(move || cache::sweep_expired(&base, max_age))
            .await
            .map_err(|e| UrpmError::Internal(format!("cleanup task failed: {e}")))?;

        if stats.removed > 0 {
            info!(
                "cache cleanup: removed {} files ({:.1} MB)",
                stats.removed,
                stats.freed_bytes as f64 / 1024.0 / 1024.0
            );
        } else {
            debug!("cache cleanup: no files to remove");
        }
        store
            .record_event(
                "cleanup",
                None,
                &format!("{} files, {} bytes", stats.removed, stats.freed_bytes),
            )
            .await?;
        Ok(stats)
    }
}
