//! Shared application state.
//!
//! Every mutable table lives in one [`State`] record behind a single mutex.
//! Critical sections are short and never span an await point, so one coarse
//! lock keeps the admission and publication rules atomic without finer
//! locking.

use crate::cache::{BuildStatus, PkgDocMetadata, PkgsHistory};
use crate::manifest::ManifestStore;
use crate::symbols::SymbolIndex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Capacity of the build-history ring.
pub const BUILD_HISTORY_CAP: usize = 100;

/// One completed (or terminated) build attempt, newest at the front of the
/// ring. Volatile.
#[derive(Debug, Clone, Serialize)]
pub struct BuildHistoryItem {
    pub name: String,
    pub build_time: i64,
    pub build_status: BuildStatus,
    pub doc_build_status: BuildStatus,
}

/// Service configuration, resolved from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root holding one subtree per package.
    pub workspace: PathBuf,
    /// Local mirror of the upstream manifest.
    pub packages_file: PathBuf,
    /// First-seen history cache file.
    pub cache_file: PathBuf,
    /// Upstream manifest URL.
    pub upstream_url: String,
    /// Package installer binary.
    pub nimble_bin: PathBuf,
    /// Documentation tool binary.
    pub nim_bin: PathBuf,
    /// Cap for the install subprocess, and for `wait_completion`.
    pub build_timeout: Duration,
    /// Cap for each doc / jsondoc subprocess.
    pub doc_timeout: Duration,
    /// Age at which a cached build is considered stale.
    pub build_expiry: Duration,
    /// Poller period.
    pub poll_interval: Duration,
    /// Public key for update-endpoint verification, resolved content.
    pub update_public_key: Option<String>,
    /// Public base URL used in feeds and badges.
    pub base_url: String,
}

impl Config {
    /// Per-package workspace directory.
    pub fn pkg_dir(&self, name: &str) -> PathBuf {
        self.workspace.join(name)
    }
}

/// All mutable service state.
#[derive(Debug, Default)]
pub struct State {
    pub manifest: ManifestStore,
    pub symbols: SymbolIndex,
    /// Normalized name -> build metadata, for every package that has ever
    /// entered the pipeline.
    pub pkgs_doc_files: HashMap<String, PkgDocMetadata>,
    /// Packages admitted but not yet holding the build slot.
    pub waiting: HashSet<String>,
    /// Packages holding the build slot. At most one.
    pub building: HashSet<String>,
    pub build_history: VecDeque<BuildHistoryItem>,
    /// Normalized name -> view counter. Volatile.
    pub most_queried: HashMap<String, u64>,
    pub history: PkgsHistory,
}

impl State {
    /// Append to the ring history, evicting the oldest past capacity.
    pub fn push_build_history(&mut self, item: BuildHistoryItem) {
        self.build_history.push_front(item);
        while self.build_history.len() > BUILD_HISTORY_CAP {
            self.build_history.pop_back();
        }
    }
}

/// Shared handle: configuration plus the single state lock.
pub struct AppState {
    pub config: Config,
    state: Mutex<State>,
}

impl AppState {
    pub fn new(config: Config, state: State) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Take the state lock. Callers must not hold the guard across awaits.
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
pub fn test_config(root: &std::path::Path) -> Config {
    Config {
        workspace: root.join("workspace"),
        packages_file: root.join("packages.json"),
        cache_file: root.join(".cache.json"),
        upstream_url: "http://127.0.0.1:1/packages.json".to_string(),
        nimble_bin: PathBuf::from("/bin/true"),
        nim_bin: PathBuf::from("/bin/true"),
        build_timeout: Duration::from_secs(240),
        doc_timeout: Duration::from_secs(10),
        build_expiry: Duration::from_secs(240 * 60),
        poll_interval: Duration::from_secs(600),
        update_public_key: None,
        base_url: "http://localhost:8080".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_caps_at_capacity_newest_first() {
        let mut state = State::default();
        for i in 0..150 {
            state.push_build_history(BuildHistoryItem {
                name: format!("pkg{}", i),
                build_time: i,
                build_status: BuildStatus::Ok,
                doc_build_status: BuildStatus::Ok,
            });
        }
        assert_eq!(state.build_history.len(), BUILD_HISTORY_CAP);
        assert_eq!(state.build_history.front().unwrap().name, "pkg149");
        assert_eq!(state.build_history.back().unwrap().name, "pkg50");
    }
}
