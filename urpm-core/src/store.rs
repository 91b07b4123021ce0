//! The embedded package database.
//!
//! SQLite wants one handle per thread, so every component opens its own
//! [`PackageStore`] and closes it on shutdown. A handle wraps a
//! single-connection pool: concurrent calls through one handle serialize on
//! that connection, readers through different handles never block each other
//! (WAL journal).

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::Result;
use crate::evr::EvrKey;
use crate::model::{AuditEvent, MediaDescriptor, PackageRecord, Peer};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    name          TEXT PRIMARY KEY,
    url           TEXT NOT NULL,
    enabled       INTEGER NOT NULL DEFAULT 1,
    update_media  INTEGER NOT NULL DEFAULT 0,
    last_sync     TEXT,
    package_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS packages (
    name     TEXT NOT NULL,
    epoch    INTEGER NOT NULL DEFAULT 0,
    version  TEXT NOT NULL,
    release  TEXT NOT NULL,
    arch     TEXT NOT NULL,
    url      TEXT NOT NULL,
    filename TEXT NOT NULL,
    size     INTEGER NOT NULL DEFAULT 0,
    media    TEXT NOT NULL REFERENCES media(name) ON DELETE CASCADE,
    summary  TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (name, epoch, version, release, arch)
);

CREATE INDEX IF NOT EXISTS idx_packages_media ON packages(media);

CREATE TABLE IF NOT EXISTS peers (
    host      TEXT NOT NULL,
    port      INTEGER NOT NULL,
    media     TEXT NOT NULL DEFAULT '[]',
    last_seen TEXT NOT NULL,
    PRIMARY KEY (host, port)
);

CREATE TABLE IF NOT EXISTS events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    operation  TEXT NOT NULL,
    media      TEXT,
    detail     TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
"#;

/// One component's handle onto the package database.
#[derive(Debug, Clone)]
pub struct PackageStore {
    pool: SqlitePool,
}

impl PackageStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        Self::open_with(options).await
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::open_with(options).await
    }

    async fn open_with(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!("package store opened");
        Ok(Self { pool })
    }

    /// Close this handle. Other handles onto the same file stay valid.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("package store closed");
    }

    // ---------- media ----------

    pub async fn list_media(&self) -> Result<Vec<MediaDescriptor>> {
        let rows = sqlx::query(
            "SELECT name, url, enabled, update_media, last_sync, package_count \
             FROM media ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(media_from_row).collect())
    }

    pub async fn get_media(&self, name: &str) -> Result<Option<MediaDescriptor>> {
        let row = sqlx::query(
            "SELECT name, url, enabled, update_media, last_sync, package_count \
             FROM media WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(media_from_row))
    }

    /// Create or replace a media descriptor. Admin surface; sync never calls
    /// this.
    pub async fn add_media(
        &self,
        name: &str,
        url: &str,
        enabled: bool,
        update_media: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO media (name, url, enabled, update_media) VALUES (?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET url = excluded.url, \
             enabled = excluded.enabled, update_media = excluded.update_media",
        )
        .bind(name)
        .bind(url)
        .bind(enabled)
        .bind(update_media)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_media(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM packages WHERE media = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM media WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Swap in a freshly parsed package set for one media and stamp its sync
    /// time. The whole replacement is one transaction, so readers see either
    /// the old rows or the new rows.
    pub async fn replace_packages(
        &self,
        media: &str,
        packages: &[PackageRecord],
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM packages WHERE media = ?")
            .bind(media)
            .execute(&mut *tx)
            .await?;

        for pkg in packages {
            sqlx::query(
                "INSERT OR REPLACE INTO packages \
                 (name, epoch, version, release, arch, url, filename, size, media, summary) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&pkg.name)
            .bind(pkg.epoch)
            .bind(&pkg.version)
            .bind(&pkg.release)
            .bind(&pkg.arch)
            .bind(&pkg.url)
            .bind(&pkg.filename)
            .bind(pkg.size)
            .bind(media)
            .bind(&pkg.summary)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE media SET package_count = \
             (SELECT COUNT(*) FROM packages WHERE media = ?), last_sync = ? WHERE name = ?",
        )
        .bind(media)
        .bind(synced_at)
        .bind(media)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ---------- packages ----------

    /// Newest record carrying `name`, across all media.
    pub async fn get_package(&self, name: &str) -> Result<Option<PackageRecord>> {
        let rows = sqlx::query(
            "SELECT name, epoch, version, release, arch, url, filename, size, media, summary \
             FROM packages WHERE name = ?",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(package_from_row)
            .max_by_key(|pkg| EvrKey::from(pkg)))
    }

    /// Substring search over package names, ordered by name.
    pub async fn search(&self, pattern: &str, limit: i64) -> Result<Vec<PackageRecord>> {
        let like = format!("%{}%", pattern);
        let rows = sqlx::query(
            "SELECT DISTINCT name, epoch, version, release, arch, url, filename, size, media, summary \
             FROM packages WHERE name LIKE ? ORDER BY name LIMIT ?",
        )
        .bind(like)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(package_from_row).collect())
    }

    /// Every package row. The resolver reduces this to the newest candidate
    /// per name.
    pub async fn all_packages(&self) -> Result<Vec<PackageRecord>> {
        let rows = sqlx::query(
            "SELECT name, epoch, version, release, arch, url, filename, size, media, summary \
             FROM packages",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(package_from_row).collect())
    }

    // ---------- peers ----------

    pub async fn list_peers(&self) -> Result<Vec<Peer>> {
        let rows = sqlx::query("SELECT host, port, media, last_seen FROM peers ORDER BY host, port")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Peer {
                host: row.get("host"),
                port: row.get::<i64, _>("port") as u16,
                media: serde_json::from_str(row.get::<&str, _>("media")).unwrap_or_default(),
                last_seen: row.get("last_seen"),
            })
            .collect())
    }

    /// Insert or refresh a peer row, updating `last_seen`.
    pub async fn upsert_peer(
        &self,
        host: &str,
        port: u16,
        media: &[String],
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let media_json = serde_json::to_string(media)?;
        sqlx::query(
            "INSERT INTO peers (host, port, media, last_seen) VALUES (?, ?, ?, ?) \
             ON CONFLICT(host, port) DO UPDATE SET media = excluded.media, \
             last_seen = excluded.last_seen",
        )
        .bind(host)
        .bind(port as i64)
        .bind(media_json)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop peers not seen since `cutoff`. Returns the number removed.
    pub async fn expire_peers(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM peers WHERE last_seen < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---------- audit events ----------

    pub async fn record_event(
        &self,
        operation: &str,
        media: Option<&str>,
        detail: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO events (operation, media, detail, created_at) VALUES (?, ?, ?, ?)")
            .bind(operation)
            .bind(media)
            .bind(detail)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn recent_events(&self, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT id, operation, media, detail, created_at \
             FROM events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AuditEvent {
                id: row.get("id"),
                operation: row.get("operation"),
                media: row.get("media"),
                detail: row.get("detail"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

fn media_from_row(row: &sqlx::sqlite::SqliteRow) -> MediaDescriptor {
    MediaDescriptor {
        name: row.get("name"),
        url: row.get("url"),
        enabled: row.get("enabled"),
        update_media: row.get("update_media"),
        last_sync: row.get("last_sync"),
        package_count: row.get("package_count"),
    }
}

fn package_from_row(row: &sqlx::sqlite::SqliteRow) -> PackageRecord {
    PackageRecord {
        name: row.get("name"),
        epoch: row.get("epoch"),
        version: row.get("version"),
        release: row.get("release"),
        arch: row.get("arch"),
        url: row.get("url"),
        filename: row.get("filename"),
        size: row.get("size"),
        media: row.get("media"),
        summary: row.get("summary"),
    }
}
