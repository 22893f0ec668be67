//! On-disk persistence for the first-seen history and per-package build
//! metadata.
//!
//! Two artifacts, both self-describing JSON, both replaced atomically
//! (write-to-temp-then-rename) on every save:
//!
//! - `.cache.json` in the working directory: the global first-seen history.
//! - `<workspace>/<package>/nimpkgdir.json`: one [`PkgDocMetadata`] per
//!   package that has ever entered the build pipeline.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Filename of the per-package metadata artifact.
pub const PKG_METADATA_FILE: &str = "nimpkgdir.json";

/// Lifecycle state of one build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Waiting,
    Running,
    Ok,
    Failed,
    Timeout,
}

impl BuildStatus {
    /// True for states that end an attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Timeout)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// Result of running the documentation tool over one source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocBuildOutItem {
    pub success: bool,
    pub filename: String,
    pub description: String,
    pub output: String,
}

/// Per-package build metadata, persisted after every terminal transition
/// and rehydrated by the directory scanner on startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PkgDocMetadata {
    pub build_status: BuildStatus,
    pub doc_build_status: BuildStatus,
    #[serde(default)]
    pub build_output: String,
    #[serde(default)]
    pub doc_build_output: Vec<DocBuildOutItem>,
    /// Generated HTML filenames, relative to the package doc root.
    #[serde(default)]
    pub fnames: Vec<String>,
    #[serde(default)]
    pub idx_fnames: Vec<String>,
    /// Epoch seconds when the current attempt started.
    #[serde(default)]
    pub build_time: i64,
    /// `build_time + build_expiry`; a refresh is needed past this point.
    #[serde(default)]
    pub expire_time: i64,
    /// Resolved version string, `"?"` when unknown. Never empty on disk.
    #[serde(default)]
    pub version: String,
    /// Reserved for version-based invalidation; persisted but never set.
    #[serde(default)]
    pub last_commitish: String,
}

impl PkgDocMetadata {
    /// Normalize fields before persisting so the serialized artifact honors
    /// its invariants: `version` is non-empty and free of null bytes,
    /// `build_output` carries no raw control characters.
    pub fn normalized(&self) -> Self {
        let mut m = self.clone();
        m.version = m.version.replace('\0', "");
        if m.version.is_empty() {
            m.version = "?".to_string();
        }
        m.build_output = escape_nonprintable(&m.build_output);
        m
    }
}

/// Append-only record of when each package name first appeared upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PkgHistoryItem {
    pub name: String,
    /// Epoch seconds of the first poller tick that saw the name.
    pub first_seen_time: i64,
}

/// The `.cache.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PkgsHistory {
    #[serde(default)]
    pub pkgs_history: Vec<PkgHistoryItem>,
}

impl PkgsHistory {
    pub fn contains(&self, name: &str) -> bool {
        self.pkgs_history.iter().any(|i| i.name == name)
    }

    /// Record a first sighting. Names are recorded exactly once.
    pub fn add(&mut self, name: &str, now: i64) -> bool {
        if self.contains(name) {
            return false;
        }
        self.pkgs_history.push(PkgHistoryItem {
            name: name.to_string(),
            first_seen_time: now,
        });
        true
    }
}

/// Load the first-seen history, initializing (and saving) an empty one when
/// the file is missing or unreadable.
pub fn load_history(path: &Path) -> PkgsHistory {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt history cache, reinitializing");
                let empty = PkgsHistory::default();
                if let Err(e) = save_history(path, &empty) {
                    tracing::warn!(error = %e, "failed to save fresh history cache");
                }
                empty
            }
        },
        Err(_) => {
            let empty = PkgsHistory::default();
            if let Err(e) = save_history(path, &empty) {
                tracing::warn!(error = %e, "failed to save fresh history cache");
            }
            empty
        }
    }
}

/// Persist the first-seen history.
pub fn save_history(path: &Path, history: &PkgsHistory) -> Result<()> {
    write_atomic(path, &serde_json::to_vec_pretty(history)?)
}

/// Load one package's metadata artifact.
pub fn load_metadata(path: &Path) -> Result<PkgDocMetadata> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Persist one package's metadata under its workspace directory.
pub fn save_metadata(workspace: &Path, pkg: &str, meta: &PkgDocMetadata) -> Result<()> {
    let dir = workspace.join(pkg);
    std::fs::create_dir_all(&dir)?;
    let normalized = meta.normalized();
    write_atomic(
        &dir.join(PKG_METADATA_FILE),
        &serde_json::to_vec_pretty(&normalized)?,
    )
}

/// Write a file atomically: to a temp sibling first, then rename over the
/// destination.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Replace control characters (other than newline, carriage return, and
/// tab) with their `\u{..}` escape text.
fn escape_nonprintable(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_control() && c != '\n' && c != '\r' && c != '\t' {
            out.push_str(&format!("\\u{{{:04x}}}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}
