//! Daemon configuration.
//!
//! Built once from CLI flags in `main` and passed by reference; nothing here
//! is globally mutable. `--dev` swaps the system paths for per-user ones,
//! listens on all interfaces, and shortens every scheduler interval so a
//! full cycle fits in a coffee break.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const PROD_PORT: u16 = 8573;
pub const DEV_PORT: u16 = 8574;

const PROD_DB_PATH: &str = "/var/lib/urpm/packages.db";
const PROD_BASE_DIR: &str = "/var/cache/urpm";
const PROD_PID_FILE: &str = "/run/urpmd.pid";

/// Scheduler tick and base intervals, in one place so prod and dev stay in
/// ratio.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleParams {
    /// Universal time quantum; every delay is a multiple of this.
    pub tick: Duration,
    pub metadata_interval: Duration,
    pub predownload_interval: Duration,
}

impl ScheduleParams {
    pub fn production() -> Self {
        Self {
            tick: Duration::from_secs(60),
            metadata_interval: Duration::from_secs(3600),
            predownload_interval: Duration::from_secs(7200),
        }
    }

    pub fn dev() -> Self {
        Self {
            tick: Duration::from_secs(10),
            metadata_interval: Duration::from_secs(60),
            predownload_interval: Duration::from_secs(120),
        }
    }
}

/// Everything the daemon needs to run, resolved from flags.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub base_dir: PathBuf,
    pub pid_file: PathBuf,
    pub host: String,
    pub port: u16,
    pub foreground: bool,
    pub verbose: bool,
    pub dev_mode: bool,

    pub schedule: ScheduleParams,
    /// Pre-download ceiling; bigger pending-upgrade sets wait for the user.
    pub max_predownload_bytes: u64,
    pub max_cpu_load: f64,
    pub max_net_kbps: f64,
    /// Cached RPMs older than this are swept after each pre-download.
    pub cache_max_age: Duration,
    /// Peers unseen for this long are expired by discovery.
    pub peer_ttl: Duration,
}

impl DaemonConfig {
    /// Resolve flags into a config. `dev` implies foreground, verbose, user
    /// paths, and listening on all interfaces.
    pub fn resolve(
        dev: bool,
        foreground: bool,
        verbose: bool,
        host: Option<String>,
        port: Option<u16>,
    ) -> Self {
        let (db_path, base_dir, pid_file, default_port, default_host, schedule) = if dev {
            let home = std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"));
            let root = home.join(".urpm");
            (
                root.join("packages.db"),
                root.join("cache"),
                root.join("urpmd.pid"),
                DEV_PORT,
                "0.0.0.0".to_string(),
                ScheduleParams::dev(),
            )
        } else {
            (
                PathBuf::from(PROD_DB_PATH),
                PathBuf::from(PROD_BASE_DIR),
                PathBuf::from(PROD_PID_FILE),
                PROD_PORT,
                DEFAULT_HOST.to_string(),
                ScheduleParams::production(),
            )
        };

        Self {
            db_path,
            base_dir,
            pid_file,
            host: host.unwrap_or(default_host),
            port: port.unwrap_or(default_port),
            foreground: foreground || dev,
            verbose: verbose || dev,
            dev_mode: dev,
            schedule,
            max_predownload_bytes: 500 * 1024 * 1024,
            max_cpu_load: 0.5,
            max_net_kbps: 100.0,
            cache_max_age: Duration::from_secs(30 * 24 * 3600),
            peer_ttl: Duration::from_secs(15 * 60),
        }
    }

    /// Path of the log file used when running detached.
    pub fn log_file(&self) -> PathBuf {
        self.base_dir.join("urpmd.log")
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults() {
        let config = DaemonConfig::resolve(false, false, false, None, None);
        assert_eq!(config.db_path, PathBuf::from(PROD_DB_PATH));
        assert_eq!(config.port, PROD_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert!(!config.foreground);
        assert_eq!(config.schedule.tick, Duration::from_secs(60));
        assert_eq!(config.schedule.metadata_interval, Duration::from_secs(3600));
        assert_eq!(config.schedule.predownload_interval, Duration::from_secs(7200));
    }

    #[test]
    fn dev_implies_foreground_verbose_and_open_host() {
        let config = DaemonConfig::resolve(true, false, false, None, None);
        assert!(config.foreground);
        assert!(config.verbose);
        assert!(config.dev_mode);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, DEV_PORT);
        assert_eq!(config.schedule.tick, Duration::from_secs(10));
        assert!(config.db_path.ends_with(".urpm/packages.db"));
    }

    #[test]
    fn explicit_flags_override_mode_defaults() {
        let config =
            DaemonConfig::resolve(true, false, false, Some("10.0.0.5".into()), Some(9000));
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 9000);
    }
}
