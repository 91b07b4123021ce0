//! Upgrade resolution.
//!
//! The installed set comes from the host RPM database via the `rpm` binary
//! (querying it directly would mean decoding raw headers); candidates come
//! from the package store. Planning is pure so it can run on fixture data.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, UrpmError};
use crate::evr::EvrKey;
use crate::model::{InstalledPackage, PackageRecord, UpgradeAction, UpgradePlan};
use crate::ports::UpgradeResolver;
use crate::store::PackageStore;

const RPM_QUERY_FORMAT: &str = "%{NAME}\t%{EPOCHNUM}\t%{VERSION}\t%{RELEASE}\t%{ARCH}\n";

/// Production [`UpgradeResolver`] for one host architecture.
#[derive(Debug, Clone)]
pub struct RpmResolver {
    arch: String,
    rpm_command: String,
}

impl RpmResolver {
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            rpm_command: "rpm".to_string(),
        }
    }

    /// Resolver for the architecture this daemon runs on.
    pub fn host() -> Self {
        Self::new(std::env::consts::ARCH)
    }

    async fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        let output = Command::new(&self.rpm_command)
            .args(["-qa", "--qf", RPM_QUERY_FORMAT])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| UrpmError::Resolver(format!("could not run rpm: {e}")))?;

        if !output.status.success() {
            return Err(UrpmError::Resolver(format!(
                "rpm -qa exited with {}",
                output.status
            )));
        }

        Ok(parse_installed(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl UpgradeResolver for RpmResolver {
    async fn resolve_upgrade(&self, store: &PackageStore) -> Result<UpgradePlan> {
        let installed = self.installed_packages().await?;
        debug!("{} installed packages", installed.len());
        let candidates = store.all_packages().await?;
        Ok(plan_upgrades(&installed, candidates, &self.arch))
    }
}

/// One line per package, tab-separated per [`RPM_QUERY_FORMAT`]. Pubkey
/// pseudo-packages carry no architecture and are skipped.
fn parse_installed(stdout: &str) -> Vec<InstalledPackage> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?;
            let epoch = fields.next()?.parse::<i64>().unwrap_or(0);
            let version = fields.next()?;
            let release = fields.next()?;
            let arch = fields.next()?;
            if name.is_empty() || arch.is_empty() || arch == "(none)" {
                return None;
            }
            Some(InstalledPackage {
                name: name.to_string(),
                epoch,
                version: version.to_string(),
                release: release.to_string(),
                arch: arch.to_string(),
            })
        })
        .collect()
}

/// For each installed package, propose the newest store candidate with a
/// strictly greater EVR on a compatible architecture (exact match or
/// `noarch`). Actions come back ordered by package name.
pub fn plan_upgrades(
    installed: &[InstalledPackage],
    candidates: Vec<PackageRecord>,
    host_arch: &str,
) -> UpgradePlan {
    let mut plan = UpgradePlan {
        success: true,
        ..Default::default()
    };

    for current in installed {
        let best = candidates
            .iter()
            .filter(|c| c.name == current.name)
            .filter(|c| arch_compatible(&c.arch, &current.arch, host_arch))
            .max_by_key(|c| EvrKey::from(*c));

        let Some(best) = best else { continue };
        let current_key = EvrKey::new(current.epoch, &current.version, &current.release);
        if EvrKey::from(best) <= current_key {
            continue;
        }

        plan.actions.push(UpgradeAction {
            name: current.name.clone(),
            from_evr: current.evr_string(),
            evr: best.evr_string(),
            arch: best.arch.clone(),
            size: best.size,
            url: Some(best.url.clone()),
            filename: Some(best.filename.clone()),
        });
    }

    plan.actions.sort_by(|a, b| a.name.cmp(&b.name));
    plan
}

fn arch_compatible(candidate: &str, installed: &str, host: &str) -> bool {
    candidate == "noarch" || candidate == installed || candidate == host
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(name: &str, version: &str, arch: &str) -> InstalledPackage {
        InstalledPackage {
            name: name.into(),
            epoch: 0,
            version: version.into(),
            release: "1.mga10".into(),
            arch: arch.into(),
        }
    }

    fn candidate(name: &str, version: &str, arch: &str, size: i64) -> PackageRecord {
        PackageRecord {
            name: name.into(),
            epoch: 0,
            version: version.into(),
            release: "1.mga10".into(),
            arch: arch.into(),
            url: format!("http://mirror.example/main/{name}-{version}-1.mga10.{arch}.rpm"),
            filename: format!("{name}-{version}-1.mga10.{arch}.rpm"),
            size,
            media: "main".into(),
            summary: String::new(),
        }
    }

    #[test]
    fn parses_rpm_query_lines() {
        let out = "firefox\t0\t115.0\t1.mga10\tx86_64\ngpg-pubkey\t0\t1\t1\t(none)\n";
        let pkgs = parse_installed(out);
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].name, "firefox");
        assert_eq!(pkgs[0].arch, "x86_64");
    }

    #[test]
    fn proposes_only_strictly_newer_candidates() {
        let installed = [installed("firefox", "115.0", "x86_64")];
        let candidates = vec![
            candidate("firefox", "115.0", "x86_64", 100),
            candidate("firefox", "116.0", "x86_64", 200),
        ];

        let plan = plan_upgrades(&installed, candidates, "x86_64");
        assert!(plan.success);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].evr, "116.0-1.mga10");
        assert_eq!(plan.actions[0].from_evr, "115.0-1.mga10");
        assert_eq!(plan.actions[0].size, 200);
    }

    #[test]
    fn up_to_date_hosts_get_an_empty_plan() {
        let installed = [installed("firefox", "116.0", "x86_64")];
        let candidates = vec![candidate("firefox", "116.0", "x86_64", 100)];
        assert!(plan_upgrades(&installed, candidates, "x86_64").actions.is_empty());
    }

    #[test]
    fn foreign_arch_candidates_are_ignored_noarch_is_not() {
        let installed = [
            installed("firefox", "115.0", "x86_64"),
            installed("hplip-doc", "3.0", "noarch"),
        ];
        let candidates = vec![
            candidate("firefox", "116.0", "aarch64", 100),
            candidate("hplip-doc", "3.1", "noarch", 50),
        ];

        let plan = plan_upgrades(&installed, candidates, "x86_64");
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].name, "hplip-doc");
    }

    #[test]
    fn actions_are_ordered_by_name() {
        let installed = [
            installed("zsh", "5.0", "x86_64"),
            installed("bash", "5.1", "x86_64"),
        ];
        let candidates = vec![
            candidate("zsh", "5.9", "x86_64", 1),
            candidate("bash", "5.2", "x86_64", 1),
        ];

        let plan = plan_upgrades(&installed, candidates, "x86_64");
        let names: Vec<_> = plan.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["bash", "zsh"]);
    }
}
