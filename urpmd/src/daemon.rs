//! Daemon wiring and the query surface behind the HTTP handlers.
//!
//! [`DaemonBuilder`] constructs every component up front and injects the
//! collaborators (sync, resolver, fetcher), so tests can wire fakes where
//! production wires the HTTP-backed implementations. Each background
//! component gets its own store handle; the [`Daemon`] keeps one for the
//! read-only query surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{watch, RwLock};
use tracing::{error, info};

use urpm_core::cache::{self, CacheReport};
use urpm_core::download::HttpFetcher;
use urpm_core::error::{Result, UrpmError};
use urpm_core::freshness::FreshnessProber;
use urpm_core::model::{MediaDescriptor, PackageRecord, Peer};
use urpm_core::ports::{MediaSync, PackageFetcher, UpgradeResolver};
use urpm_core::resolver::RpmResolver;
use urpm_core::store::PackageStore;
use urpm_core::sync::SynthesisSync;

use crate::config::DaemonConfig;
use crate::discovery::PeerDiscovery;
use crate::predownload::PredownloadEngine;
use crate::scheduler::Scheduler;

/// Builds a [`Daemon`] plus its scheduler, defaulting every collaborator to
/// the production implementation.
pub struct DaemonBuilder {
    config: DaemonConfig,
    sync: Option<Arc<dyn MediaSync>>,
    resolver: Option<Arc<dyn UpgradeResolver>>,
    fetcher: Option<Arc<dyn PackageFetcher>>,
}

impl std::fmt::Debug for DaemonBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DaemonBuilder {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            sync: None,
            resolver: None,
            fetcher: None,
        }
    }

    pub fn with_sync(mut self, sync: Arc<dyn MediaSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UpgradeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PackageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Open the store handles and assemble the daemon and its scheduler.
    pub async fn build(self) -> Result<(Arc<Daemon>, Scheduler)> {
        let config = self.config;
        config.ensure_directories()?;

        let sync: Arc<dyn MediaSync> = match self.sync {
            Some(sync) => sync,
            None => Arc::new(SynthesisSync::new(&config.base_dir)?),
        };
        let resolver: Arc<dyn UpgradeResolver> = self
            .resolver
            .unwrap_or_else(|| Arc::new(RpmResolver::host()));
        let fetcher: Arc<dyn PackageFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config.base_dir)?),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("opening database: {}", config.db_path.display());
        let store = PackageStore::open(&config.db_path).await?;
        let discovery =
            PeerDiscovery::open(&config.db_path, config.peer_ttl, shutdown_rx.clone()).await?;

        let prober = FreshnessProber::new(&config.base_dir)?;
        let engine = PredownloadEngine::new(&config, Arc::clone(&resolver), fetcher);
        let scheduler = Scheduler::new(&config, Arc::clone(&sync), prober, engine, shutdown_rx);

        let daemon = Arc::new(Daemon {
            config,
            store,
            resolver,
            sync,
            discovery,
            started_at: Utc::now(),
            last_refresh: RwLock::new(None),
            shutdown_tx,
        });
        Ok((daemon, scheduler))
    }
}

/// The running daemon: configuration, the query-surface store handle, and
/// the shared collaborators.
pub struct Daemon {
    config: DaemonConfig,
    store: PackageStore,
    resolver: Arc<dyn UpgradeResolver>,
    sync: Arc<dyn MediaSync>,
    discovery: Arc<PeerDiscovery>,
    started_at: DateTime<Utc>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Spawn the background components: the scheduler task and discovery's
    /// expiry sweep.
    pub fn start_background(&self, scheduler: Scheduler) {
        tokio::spawn(scheduler.run());
        self.discovery.start();
    }

    /// A receiver that flips to `true` when shutdown begins.
    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Flip the shutdown flag. Background loops observe it within a second.
    pub fn begin_shutdown(&self) {
        info!("stopping urpmd...");
        let _ = self.shutdown_tx.send(true);
    }

    /// Close the handles owned by the daemon side (the scheduler closes its
    /// own when its loop exits).
    pub async fn finish_shutdown(&self) {
        self.discovery.stop().await;
        self.store.close().await;
        info!("urpmd stopped");
    }

    // ---------- query surface ----------

    pub async fn status(&self) -> Value {
        let uptime = (Utc::now() - self.started_at).num_seconds();
        let last_refresh = self.last_refresh.read().await;
        json!({
            "running": !*self.shutdown_tx.borrow(),
            "start_time": self.started_at.to_rfc3339(),
            "uptime_seconds": uptime,
            "last_refresh": last_refresh.map(|t| t.to_rfc3339()),
            "db_path": self.config.db_path.display().to_string(),
            "base_dir": self.config.base_dir.display().to_string(),
            "host": self.config.host,
            "port": self.config.port,
        })
    }

    pub async fn media_list(&self) -> Result<Vec<MediaDescriptor>> {
        self.store.list_media().await
    }

    /// Per-name availability, with search suggestions for misses.
    pub async fn check_available(&self, names: &[String]) -> Result<Value> {
        let mut packages = serde_json::Map::new();
        for name in names {
            let entry = match self.store.get_package(name).await? {
                Some(pkg) => json!({
                    "available": true,
                    "version": pkg.version,
                    "release": pkg.release,
                    "arch": pkg.arch,
                    "media": pkg.media,
                    "summary": pkg.summary,
                }),
                None => {
                    let matches = self.store.search(name, 5).await?;
                    json!({
                        "available": false,
                        "suggestions": matches.iter().map(|m| m.name.clone()).collect::<Vec<_>>(),
                    })
                }
            };
            packages.insert(name.clone(), entry);
        }
        Ok(json!({ "packages": packages }))
    }

    /// The pending-upgrade set, shaped like the pre-download engine sees it.
    pub async fn available_updates(&self) -> Result<Value> {
        let plan = self.resolver.resolve_upgrade(&self.store).await?;
        let updates: Vec<Value> = plan
            .actions
            .iter()
            .map(|a| {
                json!({
                    "name": a.name,
                    "current": a.from_evr,
                    "available": a.evr,
                    "arch": a.arch,
                    "size": a.size,
                })
            })
            .collect();
        Ok(json!({
            "count": updates.len(),
            "updates": updates,
            "total_size": plan.total_size(),
        }))
    }

    pub async fn search(&self, pattern: &str, limit: i64) -> Result<Vec<PackageRecord>> {
        self.store.search(pattern, limit).await
    }

    /// Sync one media, or every enabled media, recording the refresh time.
    pub async fn refresh_metadata(&self, media_name: Option<&str>, force: bool) -> Result<Value> {
        let mut results = serde_json::Map::new();

        let targets: Vec<String> = match media_name {
            Some(name) => vec![name.to_string()],
            None => self
                .media_list()
                .await?
                .into_iter()
                .filter(|m| m.enabled)
                .map(|m| m.name)
                .collect(),
        };

        for name in targets {
            let outcome = self.sync.sync_media(&self.store, &name, force).await;
            if !outcome.success {
                error!(
                    "media {}: sync failed - {}",
                    name,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.insert(
                name,
                json!({
                    "success": outcome.success,
                    "packages": outcome.packages_count,
                    "error": outcome.error,
                }),
            );
        }

        let now = Utc::now();
        *self.last_refresh.write().await = Some(now);

        Ok(json!({
            "success": true,
            "timestamp": now.to_rfc3339(),
            "results": results,
        }))
    }

    /// Which of `filenames` the local cache tree already holds.
    pub async fn have(&self, filenames: Vec<String>) -> Result<CacheReport> {
        let base = self.config.base_dir.clone();
        tokio::task::spawn_blocking(move || cache::lookup(&base, &filenames))
            .await
            .map_err(|e| UrpmError::Internal(format!("cache lookup failed: {e}")))
    }

    pub async fn peers(&self) -> Result<Vec<Peer>> {
        self.discovery.get_peers().await
    }

    pub async fn register_peer(&self, host: &str, port: u16, media: Vec<String>) -> Result<Peer> {
        self.discovery.register_peer(host, port, media).await
    }
}
