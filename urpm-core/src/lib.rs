//! # urpm-core
//!
//! Shared plumbing for the urpm daemon: the package database, the on-disk
//! cache tree, repository freshness probing, and the collaborators the daemon
//! schedules (synthesis sync, upgrade resolution, pre-downloads).
//!
//! ## Overview
//!
//! The crate is organized around a single embedded SQLite store (the *package
//! database*) that holds media descriptors, package metadata extracted from
//! upstream synthesis indexes, peers, and per-operation audit rows. SQLite
//! wants one handle per thread, so every component opens its own
//! [`store::PackageStore`] and closes it on shutdown.
//!
//! Cached RPMs live in a `medias/<hostname>/<media>/` tree under the daemon's
//! base directory; the [`cache`] module owns that layout.

pub mod cache;
pub mod download;
pub mod error;
pub mod evr;
pub mod freshness;
pub mod idle;
pub mod model;
pub mod ports;
pub mod resolver;
pub mod store;
pub mod sync;

pub use cache::{CacheReport, CachedArtifact, CleanupStats};
pub use error::{Result, UrpmError};
pub use evr::EvrKey;
pub use model::*;
pub use ports::{MediaSync, PackageFetcher, UpgradeResolver};
pub use store::PackageStore;

/// User agent sent on every request to upstream mirrors.
pub const USER_AGENT: &str = "urpmd/0.1";

/// Basename of the compressed synthesis index upstream publishes per media.
pub const SYNTHESIS_NAME: &str = "synthesis.hdlist.cz";
