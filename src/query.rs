//! Read-side query operations shared by the HTML pages and the JSON API.
//!
//! Everything here is a pure function over a locked snapshot of the state;
//! no query mutates anything except the explicit view-counter bump.

use crate::normalize::normalize;
use crate::state::{BuildHistoryItem, State};
use crate::symbols::PkgSymbol;
use std::collections::HashMap;

/// Weight for an exact normalized-name match.
const W_EXACT: u32 = 5;
/// Weight for a substring name match or a tag match.
const W_PARTIAL: u32 = 3;
/// Weight for a description-word match.
const W_WORD: u32 = 1;

/// Snapshot of the orchestrator's recent activity.
#[derive(Debug, Clone)]
pub struct BuildHistorySnapshot {
    pub history: Vec<BuildHistoryItem>,
    pub waiting: Vec<String>,
    pub building: Vec<String>,
}

/// Weighted package search.
///
/// The query splits on spaces and commas; each term is lowercased and
/// scored against every package: exact name match +5, substring name match
/// +3, tag match +3, description-word match +1. Results come back sorted by
/// descending score, ties broken by name for stable output.
pub fn search_packages(state: &State, query: &str) -> Vec<(String, u32)> {
    let mut scores: HashMap<String, u32> = HashMap::new();

    for term in query.split([' ', ',']).filter(|t| !t.is_empty()) {
        let term = term.to_lowercase();
        let term_key = normalize(&term);

        for (key, entry) in state.manifest.iter() {
            if *key == term_key {
                *scores.entry(key.clone()).or_default() += W_EXACT;
            } else if key.contains(&term_key) {
                *scores.entry(key.clone()).or_default() += W_PARTIAL;
            }
            if entry.tags.iter().any(|t| t.to_lowercase() == term) {
                *scores.entry(key.clone()).or_default() += W_PARTIAL;
            }
        }
        for key in state.manifest.packages_by_description_word(&term) {
            *scores.entry(key.clone()).or_default() += W_WORD;
        }
    }

    let mut out: Vec<(String, u32)> = scores.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// The `n` most-viewed package names, descending.
pub fn top_queried(state: &State, n: usize) -> Vec<(String, u64)> {
    let mut out: Vec<(String, u64)> = state
        .most_queried
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out.truncate(n);
    out
}

/// Bump the view counter for a package.
pub fn record_view(state: &mut State, name: &str) {
    *state.most_queried.entry(normalize(name)).or_default() += 1;
}

/// Copy of the ring buffer plus the current transient sets.
pub fn build_history_snapshot(state: &State) -> BuildHistorySnapshot {
    BuildHistorySnapshot {
        history: state.build_history.iter().cloned().collect(),
        waiting: state.waiting.iter().cloned().collect(),
        building: state.building.iter().cloned().collect(),
    }
}

/// Cross-package symbol lookup. Empty when absent.
pub fn search_symbol(state: &State, name: &str) -> Vec<PkgSymbol> {
    state.symbols.search_symbol(name)
}

/// Per-package symbol lookup. Empty when absent.
pub fn search_symbol_in_pkg(state: &State, pkg: &str, name: &str) -> Vec<PkgSymbol> {
    state.symbols.search_symbol_in_pkg(&normalize(pkg), name)
}
