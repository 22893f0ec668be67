//! Startup rehydration of build metadata and the symbol index.
//!
//! Walks `<workspace>/*/nimpkgdir.json` once, loading each package's
//! persisted metadata. Parse failures are logged and skipped; the package
//! simply rebuilds on its next request.

use crate::builder::find_package_root;
use crate::cache::{self, BuildStatus, PKG_METADATA_FILE};
use crate::state::State;
use std::path::Path;
use tracing::{debug, info, warn};

/// Scan the workspace and populate `pkgs_doc_files` and the symbol index.
///
/// Returns the number of packages rehydrated.
pub fn scan(state: &mut State, workspace: &Path) -> usize {
    let entries = match std::fs::read_dir(workspace) {
        Ok(e) => e,
        Err(_) => {
            debug!(path = %workspace.display(), "no workspace to scan");
            return 0;
        }
    };

    let mut loaded = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let name = match dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let meta_path = dir.join(PKG_METADATA_FILE);
        if !meta_path.exists() {
            continue;
        }
        let mut meta = match cache::load_metadata(&meta_path) {
            Ok(m) => m,
            Err(e) => {
                warn!(pkg = %name, error = %e, "skipping unreadable package metadata");
                continue;
            }
        };

        // A transient status on disk means the process died mid-build.
        // Downgrade so the name is not claimed to be queued when it is in
        // neither transient set.
        if !meta.build_status.is_terminal() {
            meta.build_status = BuildStatus::Failed;
        }
        if !meta.doc_build_status.is_terminal() {
            meta.doc_build_status = BuildStatus::Failed;
        }

        if meta.doc_build_status == BuildStatus::Ok {
            replay_symbols(state, workspace, &name);
        }

        state.pkgs_doc_files.insert(name, meta);
        loaded += 1;
    }

    info!(packages = loaded, "workspace scan complete");
    loaded
}

/// Re-run the jsondoc parser over cached per-source JSON files.
fn replay_symbols(state: &mut State, workspace: &Path, name: &str) {
    let pkg_dir = workspace.join(name);
    let root = match find_package_root(&pkg_dir, name) {
        Ok(r) => r,
        Err(_) => return,
    };

    let mut stack = vec![root.clone()];
    let mut symbols = 0;
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "nim") {
                symbols += state.symbols.parse_jsondoc(name, &root, &path);
            }
        }
    }
    debug!(pkg = %name, symbols, "symbol cache replayed");
}
