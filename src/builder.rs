//! Build orchestrator: the per-package state machine and the three-stage
//! pipeline install -> HTML docs -> symbol docs.
//!
//! `request` is non-blocking: it admits the package and spawns a build
//! task; progress is visible through the status endpoint and badges.
//! A single global slot keeps at most one build active, because each build
//! heavily touches disk and network and the installer's lock file is not
//! reentrant.

use crate::cache::{self, BuildStatus, DocBuildOutItem, PkgDocMetadata};
use crate::error::{DirError, Result};
use crate::normalize::normalize;
use crate::runner;
use crate::state::{BuildHistoryItem, SharedState};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a task sleeps between attempts to take the build slot, and how
/// often `wait_completion` re-checks.
const SLOT_POLL: Duration = Duration::from_secs(1);

/// Source-file extension walked for doc generation.
const SRC_EXT: &str = "nim";

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A build task was spawned.
    Queued,
    /// The package is already waiting or building.
    AlreadyQueued,
    /// A build newer than the expiry window exists.
    Fresh,
}

/// Ensure that, eventually, the package's metadata reflects a build no
/// older than the expiry window. Returns immediately.
///
/// `force` bypasses the freshness check but never the in-flight check: a
/// second request while the package is waiting or building is a no-op.
pub fn request(shared: &SharedState, name: &str, force: bool) -> Result<RequestOutcome> {
    let key = normalize(name);
    let now = Utc::now().timestamp();

    // Admission observes pkgs_doc_files, waiting, and building as one
    // atomic snapshot.
    {
        let mut state = shared.lock();
        if !state.manifest.contains(&key) {
            return Err(DirError::PackageNotFound(name.to_string()));
        }
        if state.waiting.contains(&key) || state.building.contains(&key) {
            return Ok(RequestOutcome::AlreadyQueued);
        }
        if let Some(meta) = state.pkgs_doc_files.get(&key) {
            if !force && meta.expire_time > now {
                return Ok(RequestOutcome::Fresh);
            }
        }
        let meta = state.pkgs_doc_files.entry(key.clone()).or_default();
        meta.build_status = BuildStatus::Waiting;
        meta.doc_build_status = BuildStatus::Waiting;
        state.waiting.insert(key.clone());
    }

    let shared = shared.clone();
    tokio::spawn(async move {
        run_build(shared, key).await;
    });
    Ok(RequestOutcome::Queued)
}

/// Suspend the caller until the package is no longer waiting or building,
/// or `timeout` elapses. Returns true when the package reached a terminal
/// state.
pub async fn wait_completion(shared: &SharedState, name: &str, timeout: Duration) -> bool {
    let key = normalize(name);
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let state = shared.lock();
            if !state.waiting.contains(&key) && !state.building.contains(&key) {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(SLOT_POLL).await;
    }
}

/// The build task: slot acquisition, pipeline, terminal publication.
async fn run_build(shared: SharedState, key: String) {
    acquire_slot(&shared, &key).await;
    info!(pkg = %key, "build started");

    let install = install_stage(&shared, &key).await;
    if install.is_ok() {
        if let Err(e) = doc_stages(&shared, &key).await {
            warn!(pkg = %key, error = %e, "doc stages failed");
            let mut state = shared.lock();
            if let Some(meta) = state.pkgs_doc_files.get_mut(&key) {
                meta.doc_build_status = BuildStatus::Failed;
            }
        }
    }

    finish(&shared, &key);
}

/// Wait for the single build slot, then atomically move the package from
/// waiting to building and stamp the attempt times.
async fn acquire_slot(shared: &SharedState, key: &str) {
    loop {
        {
            let mut state = shared.lock();
            if state.building.is_empty() {
                state.waiting.remove(key);
                state.building.insert(key.to_string());
                let expiry = shared.config.build_expiry.as_secs() as i64;
                if let Some(meta) = state.pkgs_doc_files.get_mut(key) {
                    meta.build_status = BuildStatus::Running;
                    meta.doc_build_status = BuildStatus::Running;
                    meta.build_time = Utc::now().timestamp();
                    meta.expire_time = meta.build_time + expiry;
                }
                return;
            }
            debug!(waiting = state.waiting.len(), "build slot busy");
        }
        tokio::time::sleep(SLOT_POLL).await;
    }
}

/// Stage 1: run the installer. Returns Ok(()) only when the install
/// succeeded; on failure or timeout the terminal status is already set.
async fn install_stage(shared: &SharedState, key: &str) -> std::result::Result<(), ()> {
    let config = &shared.config;
    let pkg_dir = config.pkg_dir(key);
    if let Err(e) = std::fs::create_dir_all(&pkg_dir) {
        let mut state = shared.lock();
        if let Some(meta) = state.pkgs_doc_files.get_mut(key) {
            meta.build_status = BuildStatus::Failed;
            meta.build_output = format!("failed to create workspace: {}", e);
        }
        return Err(());
    }

    let args = vec![
        "install".to_string(),
        key.to_string(),
        "--verbose".to_string(),
        format!("--nimbleDir={}", pkg_dir.display()),
        "-y".to_string(),
        "--debug".to_string(),
    ];
    let result = runner::run(&config.nimble_bin, &args, &pkg_dir, config.build_timeout).await;

    let status = if result.success() {
        BuildStatus::Ok
    } else if result.timed_out() {
        BuildStatus::Timeout
    } else {
        BuildStatus::Failed
    };

    let output = if result.timed_out() {
        format!(
            "** Install test timed out after {} seconds **\n{}",
            config.build_timeout.as_secs(),
            result.output
        )
    } else {
        result.output
    };

    {
        let mut state = shared.lock();
        if let Some(meta) = state.pkgs_doc_files.get_mut(key) {
            meta.build_status = status;
            meta.build_output = output;
            if status != BuildStatus::Ok {
                // Doc stages never ran for this attempt.
                meta.doc_build_status = BuildStatus::Waiting;
            }
        }
    }

    if status == BuildStatus::Ok {
        Ok(())
    } else {
        info!(pkg = %key, status = %status, "install stage failed");
        Err(())
    }
}

/// Stages 2-4: HTML docs, version capture, symbol docs.
async fn doc_stages(shared: &SharedState, key: &str) -> Result<()> {
    let config = shared.config.clone();
    let pkg_dir = config.pkg_dir(key);
    let root = find_package_root(&pkg_dir, key)?;
    let sources = collect_sources(&root)?;

    // Stage 2: one `nim doc` run per source file.
    let mut items = Vec::with_capacity(sources.len());
    for source in &sources {
        let rel = source
            .strip_prefix(&root)
            .unwrap_or(source)
            .to_string_lossy()
            .to_string();
        let workdir = source.parent().unwrap_or(&root).to_path_buf();
        let args = vec![
            "doc".to_string(),
            "--index:on".to_string(),
            source.to_string_lossy().to_string(),
        ];
        let result = runner::run(&config.nim_bin, &args, &workdir, config.doc_timeout).await;
        debug!(pkg = %key, file = %rel, exit = result.exit_code, "doc run finished");
        items.push(DocBuildOutItem {
            success: result.success(),
            filename: rel.clone(),
            description: format!("nim doc {}", rel),
            output: result.output,
        });
    }

    let all_ok = items.iter().all(|i| i.success);
    let fnames: Vec<String> = items
        .iter()
        .filter(|i| i.success)
        .map(|i| html_name(&i.filename))
        .collect();
    // One walk for .idx files after the loop; a per-file walk would collect
    // duplicates.
    let idx_fnames = collect_idx_files(&root)?;

    // Stage 3: version capture from the manifest enrichment.
    let version = {
        let state = shared.lock();
        state
            .manifest
            .get(key)
            .and_then(|e| e.github_latest_version.clone())
            .unwrap_or_else(|| "?".to_string())
    };

    {
        let mut state = shared.lock();
        if let Some(meta) = state.pkgs_doc_files.get_mut(key) {
            meta.doc_build_status = if all_ok {
                BuildStatus::Ok
            } else {
                BuildStatus::Failed
            };
            meta.doc_build_output = items;
            meta.fnames = fnames;
            meta.idx_fnames = idx_fnames;
            meta.version = version;
        }
    }

    // Stage 4: symbol docs. Failures are logged but never demote the doc
    // build status.
    for source in &sources {
        let workdir = source.parent().unwrap_or(&root).to_path_buf();
        let args = vec![
            "jsondoc".to_string(),
            source.to_string_lossy().to_string(),
        ];
        let result = runner::run(&config.nim_bin, &args, &workdir, config.doc_timeout).await;
        if result.success() {
            let mut state = shared.lock();
            let count = {
                let symbols = &mut state.symbols;
                symbols.parse_jsondoc(key, &root, source)
            };
            debug!(pkg = %key, file = %source.display(), symbols = count, "symbols indexed");
        } else {
            warn!(pkg = %key, file = %source.display(), exit = result.exit_code, "jsondoc run failed");
        }
    }

    Ok(())
}

/// Terminal actions: ring append, metadata persistence, slot release.
/// The ring append happens before the slot release, so an observer that
/// sees the package out of `building` also sees its history entry.
fn finish(shared: &SharedState, key: &str) {
    let meta_copy = {
        let mut state = shared.lock();
        let item = state.pkgs_doc_files.get(key).map(|meta| BuildHistoryItem {
            name: key.to_string(),
            build_time: meta.build_time,
            build_status: meta.build_status,
            doc_build_status: meta.doc_build_status,
        });
        if let Some(item) = item {
            state.push_build_history(item);
        }
        state.pkgs_doc_files.get(key).cloned()
    };

    if let Some(meta) = meta_copy {
        if let Err(e) = cache::save_metadata(&shared.config.workspace, key, &meta) {
            warn!(pkg = %key, error = %e, "failed to persist build metadata");
        }
        info!(
            pkg = %key,
            build = %meta.build_status,
            docs = %meta.doc_build_status,
            "build finished"
        );
    }

    let mut state = shared.lock();
    state.building.remove(key);
}

/// Locate the installed package root under `<pkg_dir>/pkgs/`.
///
/// Prefers a candidate directory containing a nimble file whose stem
/// normalizes to the requested name; falls back to matching the leading
/// `-`-delimited token of the directory name. First match in iteration
/// order wins.
pub fn find_package_root(pkg_dir: &Path, key: &str) -> Result<PathBuf> {
    let pkgs = pkg_dir.join("pkgs");
    let entries: Vec<PathBuf> = std::fs::read_dir(&pkgs)
        .map_err(|_| DirError::InstallRootNotFound(key.to_string()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();

    for dir in &entries {
        if let Ok(inner) = std::fs::read_dir(dir) {
            for f in inner.filter_map(|e| e.ok()) {
                let p = f.path();
                if p.extension().is_some_and(|e| e == "nimble") {
                    if let Some(stem) = p.file_stem().and_then(|s| s.to_str()) {
                        if normalize(stem) == key {
                            return Ok(dir.clone());
                        }
                    }
                }
            }
        }
    }

    for dir in &entries {
        if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
            let token = name.split('-').next().unwrap_or(name);
            if normalize(token) == key {
                return Ok(dir.clone());
            }
        }
    }

    Err(DirError::InstallRootNotFound(key.to_string()))
}

/// Recursively collect source files under the package root.
fn collect_sources(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == SRC_EXT) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Collect `.idx` files under the package root, as paths relative to it.
fn collect_idx_files(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "idx") {
                out.push(
                    path.strip_prefix(root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .to_string(),
                );
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Map a source path to its generated HTML name.
fn html_name(rel: &str) -> String {
    match rel.rsplit_once('.') {
        Some((stem, _)) => format!("{}.html", stem),
        None => format!("{}.html", rel),
    }
}
