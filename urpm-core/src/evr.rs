//! Epoch-version-release ordering.
//!
//! Versions split into alternating numeric and alphabetic runs; numeric runs
//! compare as integers, alphabetic runs lexically, and numeric runs order
//! below alphabetic ones. A version that extends another past a shared prefix
//! orders newer. This is a simplified rpmvercmp, good enough to pick the
//! newest candidate per package name.

use std::cmp::Ordering;

use crate::model::PackageRecord;

/// One run of a version string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart {
    Num(u64),
    Alpha(String),
}

fn split_version(v: &str) -> Vec<VersionPart> {
    let mut parts = Vec::new();
    let mut chars = v.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut run = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    run.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // Saturate rather than fail on absurdly long numeric runs.
            parts.push(VersionPart::Num(run.parse().unwrap_or(u64::MAX)));
        } else if c.is_ascii_alphabetic() {
            let mut run = String::new();
            while let Some(&a) = chars.peek() {
                if a.is_ascii_alphabetic() {
                    run.push(a);
                    chars.next();
                } else {
                    break;
                }
            }
            parts.push(VersionPart::Alpha(run));
        } else {
            // Separators only delimit runs.
            chars.next();
        }
    }

    if parts.is_empty() {
        parts.push(VersionPart::Num(0));
    }
    parts
}

/// Sortable epoch-version-release key. Higher means newer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvrKey {
    epoch: i64,
    version: Vec<VersionPart>,
    release: Vec<VersionPart>,
}

impl EvrKey {
    pub fn new(epoch: i64, version: &str, release: &str) -> Self {
        Self {
            epoch,
            version: split_version(version),
            release: split_version(release),
        }
    }
}

impl From<&PackageRecord> for EvrKey {
    fn from(pkg: &PackageRecord) -> Self {
        Self::new(pkg.epoch, &pkg.version, &pkg.release)
    }
}

/// Compare two `(epoch, version, release)` triples.
pub fn compare_evr(a: (i64, &str, &str), b: (i64, &str, &str)) -> Ordering {
    EvrKey::new(a.0, a.1, a.2).cmp(&EvrKey::new(b.0, b.1, b.2))
}

/// Keep only the newest record per package name, preserving no particular
/// order.
pub fn filter_latest(packages: Vec<PackageRecord>) -> Vec<PackageRecord> {
    let mut latest: std::collections::HashMap<String, PackageRecord> = std::collections::HashMap::new();
    for pkg in packages {
        let newer = match latest.get(&pkg.name) {
            Some(seen) => EvrKey::from(&pkg) > EvrKey::from(seen),
            None => true,
        };
        if newer {
            latest.insert(pkg.name.clone(), pkg);
        }
    }
    latest.into_values().collect()
}
