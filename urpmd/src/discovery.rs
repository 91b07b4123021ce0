//! LAN peer registry.
//!
//! Peers are not authenticated; anything on the LAN that registers itself is
//! taken at its word and served cached RPMs. Registration upserts on
//! `(host, port)`, and a background sweep expires rows whose `last_seen` has
//! aged past the TTL, so a host that went away stops being suggested.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use urpm_core::error::Result;
use urpm_core::model::Peer;
use urpm_core::store::PackageStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Peer directory with its own store handle and expiry task.
pub struct PeerDiscovery {
    store: PackageStore,
    ttl: chrono::Duration,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for PeerDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerDiscovery")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PeerDiscovery {
    /// Open discovery's own handle onto the package database.
    pub async fn open(
        db_path: &Path,
        ttl: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>> {
        let store = PackageStore::open(db_path).await?;
        Ok(Arc::new(Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(15)),
            shutdown,
        }))
    }

    /// Spawn the expiry sweep.
    pub fn start(self: &Arc<Self>) {
        let discovery = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "peer discovery started (ttl={}s)",
                discovery.ttl.num_seconds()
            );
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if *discovery.shutdown.borrow() {
                    info!("peer discovery shutting down");
                    break;
                }
                discovery.expire_stale().await;
            }
        });
    }

    /// Close discovery's store handle. Call after the shutdown flag flips.
    pub async fn stop(&self) {
        self.store.close().await;
    }

    pub async fn get_peers(&self) -> Result<Vec<Peer>> {
        self.store.list_peers().await
    }

    /// Register or refresh a peer, returning its stored row.
    pub async fn register_peer(&self, host: &str, port: u16, media: Vec<String>) -> Result<Peer> {
        let now = Utc::now();
        self.store.upsert_peer(host, port, &media, now).await?;
        debug!("peer {}:{} registered ({} media)", host, port, media.len());
        Ok(Peer {
            host: host.to_string(),
            port,
            media,
            last_seen: now,
        })
    }

    async fn expire_stale(&self) {
        let cutoff = Utc::now() - self.ttl;
        match self.store.expire_peers(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!("expired {} stale peers", removed),
            Err(e) => warn!("peer expiry failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shutdown_rx() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    async fn discovery(ttl: Duration) -> Arc<PeerDiscovery> {
        let store = PackageStore::open_in_memory().await.unwrap();
        Arc::new(PeerDiscovery {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap(),
            shutdown: shutdown_rx(),
        })
    }

    #[tokio::test]
    async fn registration_shows_up_in_peer_listing() {
        let discovery = discovery(Duration::from_secs(900)).await;
        discovery
            .register_peer("10.0.0.7", 8573, vec!["main".into()])
            .await
            .unwrap();

        let peers = discovery.get_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].host, "10.0.0.7");
        assert_eq!(peers[0].media, vec!["main".to_string()]);
    }

    #[tokio::test]
    async fn reregistration_is_idempotent() {
        let discovery = discovery(Duration::from_secs(900)).await;
        let media = vec!["main".to_string()];
        discovery.register_peer("10.0.0.7", 8573, media.clone()).await.unwrap();
        discovery.register_peer("10.0.0.7", 8573, media).await.unwrap();

        assert_eq!(discovery.get_peers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_peers_are_expired() {
        let discovery = discovery(Duration::ZERO).await;
        discovery.register_peer("10.0.0.7", 8573, Vec::new()).await.unwrap();

        // Zero TTL: the row is already past the cutoff.
        discovery.expire_stale().await;
        assert!(discovery.get_peers().await.unwrap().is_empty());
    }
}
