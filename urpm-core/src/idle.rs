//! Host idleness detection.
//!
//! Pre-downloads only run when the host looks idle: the 1-minute load average
//! is below a threshold and non-loopback network traffic is below a KB/s
//! threshold. Both probes fail open; a host we cannot measure is treated as
//! idle.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

const DEFAULT_MAX_CPU_LOAD: f64 = 0.5;
const DEFAULT_MAX_NET_KBPS: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
struct NetSample {
    at: Instant,
    rx_bytes: u64,
    tx_bytes: u64,
}

/// Samples `/proc/loadavg` and `/proc/net/dev` to decide whether background
/// downloads would disturb anyone.
#[derive(Debug)]
pub struct IdleProbe {
    loadavg_path: PathBuf,
    netdev_path: PathBuf,
    max_cpu_load: f64,
    max_net_kbps: f64,
    last_sample: Mutex<Option<NetSample>>,
}

impl Default for IdleProbe {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CPU_LOAD, DEFAULT_MAX_NET_KBPS)
    }
}

impl IdleProbe {
    pub fn new(max_cpu_load: f64, max_net_kbps: f64) -> Self {
        Self {
            loadavg_path: PathBuf::from("/proc/loadavg"),
            netdev_path: PathBuf::from("/proc/net/dev"),
            max_cpu_load,
            max_net_kbps,
            last_sample: Mutex::new(None),
        }
    }

    /// Probe against alternate stat files. Tests point this at fixtures.
    pub fn with_paths(mut self, loadavg: impl Into<PathBuf>, netdev: impl Into<PathBuf>) -> Self {
        self.loadavg_path = loadavg.into();
        self.netdev_path = netdev.into();
        self
    }

    /// Both predicates must hold.
    pub fn is_idle(&self) -> bool {
        if !self.cpu_idle() {
            debug!("CPU not idle (load >= {})", self.max_cpu_load);
            return false;
        }
        if !self.network_idle() {
            debug!("network not idle (>= {} KB/s)", self.max_net_kbps);
            return false;
        }
        true
    }

    /// 1-minute load average below the threshold.
    pub fn cpu_idle(&self) -> bool {
        match fs::read_to_string(&self.loadavg_path) {
            Ok(content) => match parse_loadavg(&content) {
                Some(load) => load < self.max_cpu_load,
                None => {
                    warn!("could not parse load average from {}", self.loadavg_path.display());
                    true
                }
            },
            Err(e) => {
                warn!("could not read {}: {}", self.loadavg_path.display(), e);
                true
            }
        }
    }

    /// Traffic since the previous call below the threshold.
    ///
    /// The first call records a baseline and reports idle; so does a call
    /// less than one second after the previous one, where the rate would be
    /// mostly noise. The baseline advances on every call.
    pub fn network_idle(&self) -> bool {
        let content = match fs::read_to_string(&self.netdev_path) {
            Ok(content) => content,
            Err(e) => {
                warn!("could not read {}: {}", self.netdev_path.display(), e);
                return true;
            }
        };
        let (rx_bytes, tx_bytes) = parse_net_dev(&content);
        let now = Instant::now();

        let mut guard = self.last_sample.lock();
        let previous = guard.replace(NetSample { at: now, rx_bytes, tx_bytes });

        let Some(prev) = previous else {
            return true;
        };

        let elapsed = now.duration_since(prev.at).as_secs_f64();
        if elapsed < 1.0 {
            return true;
        }

        let delta = rx_bytes.saturating_sub(prev.rx_bytes) + tx_bytes.saturating_sub(prev.tx_bytes);
        let rate_kbps = delta as f64 / elapsed / 1024.0;
        debug!("network rate: {:.1} KB/s", rate_kbps);
        rate_kbps < self.max_net_kbps
    }
}

/// First whitespace-separated token of the load-average file.
fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Total `(rx_bytes, tx_bytes)` across all interfaces except loopback.
///
/// `/proc/net/dev` lines look like `eth0: 1234 9 0 0 0 0 0 0 5678 7 ...`;
/// rx_bytes is the first stat field, tx_bytes the ninth.
fn parse_net_dev(content: &str) -> (u64, u64) {
    let mut total_rx = 0u64;
    let mut total_tx = 0u64;

    for line in content.lines() {
        let Some((iface, stats)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = stats.split_whitespace().collect();
        if fields.len() >= 9 {
            total_rx += fields[0].parse::<u64>().unwrap_or(0);
            total_tx += fields[8].parse::<u64>().unwrap_or(0);
        }
    }

    (total_rx, total_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::Duration;

    const NET_DEV_HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

    fn write_file(path: &std::path::Path, content: &str) {
        File::create(path).unwrap().write_all(content.as_bytes()).unwrap();
    }

    fn net_dev(rx: u64, tx: u64) -> String {
        format!(
            "{NET_DEV_HEADER}    lo: 999999 10 0 0 0 0 0 0 999999 10 0 0 0 0 0 0\n  eth0: {rx} 9 0 0 0 0 0 0 {tx} 7 0 0 0 0 0 0\n"
        )
    }

    #[test]
    fn loadavg_takes_the_first_token() {
        assert_eq!(parse_loadavg("0.42 0.30 0.25 1/234 5678\n"), Some(0.42));
        assert_eq!(parse_loadavg(""), None);
        assert_eq!(parse_loadavg("garbage"), None);
    }

    #[test]
    fn net_dev_sums_everything_but_loopback() {
        let (rx, tx) = parse_net_dev(&net_dev(1000, 2000));
        assert_eq!(rx, 1000);
        assert_eq!(tx, 2000);
    }

    #[test]
    fn cpu_idle_compares_against_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let loadavg = tmp.path().join("loadavg");

        write_file(&loadavg, "0.10 0.20 0.30 1/100 42\n");
        let probe = IdleProbe::new(0.5, 100.0).with_paths(&loadavg, tmp.path().join("none"));
        assert!(probe.cpu_idle());

        write_file(&loadavg, "3.50 2.00 1.00 5/100 42\n");
        assert!(!probe.cpu_idle());
    }

    #[test]
    fn unreadable_probe_files_fail_open() {
        let probe = IdleProbe::new(0.5, 100.0).with_paths("/nonexistent/loadavg", "/nonexistent/netdev");
        assert!(probe.cpu_idle());
        assert!(probe.network_idle());
        assert!(probe.is_idle());
    }

    #[test]
    fn first_network_sample_is_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let netdev = tmp.path().join("net_dev");
        write_file(&netdev, &net_dev(0, 0));

        let probe = IdleProbe::new(0.5, 100.0).with_paths(tmp.path().join("loadavg"), &netdev);
        assert!(probe.network_idle());
    }

    #[test]
    fn rapid_resample_is_idle_even_under_load() {
        let tmp = tempfile::tempdir().unwrap();
        let netdev = tmp.path().join("net_dev");
        write_file(&netdev, &net_dev(0, 0));

        let probe = IdleProbe::new(0.5, 100.0).with_paths(tmp.path().join("loadavg"), &netdev);
        assert!(probe.network_idle());

        // A gigabyte "transferred" within the same second still counts idle.
        write_file(&netdev, &net_dev(1_000_000_000, 0));
        assert!(probe.network_idle());
    }

    #[test]
    fn sustained_traffic_is_not_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let netdev = tmp.path().join("net_dev");
        write_file(&netdev, &net_dev(10_000_000, 0));

        let probe = IdleProbe::new(0.5, 100.0).with_paths(tmp.path().join("loadavg"), &netdev);
        // Backdate the baseline so the next call sees a 10 s window.
        *probe.last_sample.lock() = Some(NetSample {
            at: Instant::now() - Duration::from_secs(10),
            rx_bytes: 0,
            tx_bytes: 0,
        });
        // 10 MB over 10 s is ~1000 KB/s, well over the 100 KB/s threshold.
        assert!(!probe.network_idle());

        // Quiet window afterwards: rate drops to zero.
        *probe.last_sample.lock() = Some(NetSample {
            at: Instant::now() - Duration::from_secs(10),
            rx_bytes: 10_000_000,
            tx_bytes: 0,
        });
        assert!(probe.network_idle());
    }
}
