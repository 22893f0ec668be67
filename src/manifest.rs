//! Manifest store: the mirrored upstream package list and its derived
//! indexes.
//!
//! The upstream manifest is a JSON array of package objects. Entries are
//! keyed by normalized name everywhere; the raw display name lives only in
//! the entry itself. Loading rebuilds the tag index and the
//! description-word index from scratch so the three structures always refer
//! to the same set of packages.

use crate::error::{DirError, Result};
use crate::normalize::{collision_key, normalize};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Minimum length for a description word to be indexed.
const MIN_WORD_LEN: usize = 3;

/// One package record, copied from the upstream manifest plus optional
/// enrichments. Unknown fields round-trip through `extra` so the update
/// endpoint never drops data it does not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkgManifestEntry {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub web: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_latest_versions_str: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_last_update_time: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// In-memory view of the manifest with its derived indexes.
#[derive(Debug, Default, Clone)]
pub struct ManifestStore {
    /// Normalized name -> entry.
    entries: HashMap<String, PkgManifestEntry>,
    /// Tag (case-sensitive as it arrives) -> normalized package names.
    packages_by_tag: HashMap<String, Vec<String>>,
    /// Lowercased description word (len >= 3) -> normalized package names.
    packages_by_description_word: HashMap<String, Vec<String>>,
}

impl ManifestStore {
    /// Parse a manifest from its JSON text and rebuild all indexes.
    ///
    /// Entries missing `name` or `tags` are skipped with a warning, as are
    /// entries that fail to deserialize. On a normalized-name collision the
    /// first entry wins.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<Value> = serde_json::from_str(json)?;
        let mut store = Self::default();

        for item in raw {
            let obj = match item.as_object() {
                Some(o) => o,
                None => {
                    tracing::warn!("skipping non-object manifest entry");
                    continue;
                }
            };
            if !obj.contains_key("name") || !obj.contains_key("tags") {
                tracing::warn!("skipping manifest entry without name or tags");
                continue;
            }
            let entry: PkgManifestEntry = match serde_json::from_value(item.clone()) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed manifest entry");
                    continue;
                }
            };
            let key = normalize(&entry.name);
            if let Some(existing) = store.entries.get(&key) {
                tracing::warn!(
                    name = %entry.name,
                    existing = %existing.name,
                    "duplicate normalized package name, keeping first"
                );
                continue;
            }
            store.entries.insert(key, entry);
        }

        store.rebuild_indexes();
        Ok(store)
    }

    /// Load the manifest from a local file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn rebuild_indexes(&mut self) {
        self.packages_by_tag.clear();
        self.packages_by_description_word.clear();

        for (key, entry) in &self.entries {
            for tag in &entry.tags {
                self.packages_by_tag
                    .entry(tag.clone())
                    .or_default()
                    .push(key.clone());
            }
            for word in entry.description.split([' ', ',']) {
                if word.len() >= MIN_WORD_LEN {
                    self.packages_by_description_word
                        .entry(word.to_lowercase())
                        .or_default()
                        .push(key.clone());
                }
            }
        }
    }

    /// Look up a package by any spelling of its name.
    pub fn get(&self, name: &str) -> Option<&PkgManifestEntry> {
        self.entries.get(&normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (normalized name, entry) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PkgManifestEntry)> {
        self.entries.iter()
    }

    /// Normalized names of all known packages.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn packages_by_tag(&self, tag: &str) -> &[String] {
        self.packages_by_tag
            .get(tag)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn packages_by_description_word(&self, word: &str) -> &[String] {
        self.packages_by_description_word
            .get(word)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Apply a verified package submission to the manifest file.
///
/// Reads the file fresh, enforces the collision rules, writes the full
/// manifest back sorted by name, and returns the updated entry. Whether a
/// submission counts as an update or an addition is decided by normalized
/// name; a brand-new package is rejected when its collision key (which also
/// ignores dashes) matches any existing package.
///
/// The caller serializes writes to the manifest file with the state lock.
pub fn apply_update(path: &Path, submission: PkgManifestEntry) -> Result<PkgManifestEntry> {
    let json = std::fs::read_to_string(path)?;
    let mut raw: Vec<Value> = serde_json::from_str(&json)?;

    let key = normalize(&submission.name);
    let ckey = collision_key(&submission.name);

    let mut replaced = false;
    for item in raw.iter_mut() {
        let existing_name = item
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if normalize(&existing_name) == key {
            *item = serde_json::to_value(&submission)?;
            replaced = true;
            break;
        }
        if collision_key(&existing_name) == ckey {
            return Err(DirError::NameCollision {
                new: submission.name,
                existing: existing_name,
            });
        }
    }
    if !replaced {
        raw.push(serde_json::to_value(&submission)?);
    }

    raw.sort_by(|a, b| {
        let an = a.get("name").and_then(Value::as_str).unwrap_or_default();
        let bn = b.get("name").and_then(Value::as_str).unwrap_or_default();
        an.to_lowercase().cmp(&bn.to_lowercase())
    });

    crate::cache::write_atomic(path, &serde_json::to_vec_pretty(&raw)?)?;
    Ok(submission)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"name": "Jester", "url": "https://github.com/dom96/jester",
         "tags": ["web", "http"], "description": "A sinatra-like web framework",
         "license": "MIT", "web": "https://github.com/dom96/jester"},
        {"name": "karax", "url": "https://github.com/karaxnim/karax",
         "tags": ["web", "spa"], "description": "Single page applications for Nim",
         "license": "MIT", "web": "https://github.com/karaxnim/karax"},
        {"name": "no_tags_field", "url": "x", "description": "skipped"},
        {"name": "with_underscores", "tags": ["misc"], "description": "ok here"}
    ]"#;

    #[test]
    fn test_load_skips_incomplete_entries() {
        let store = ManifestStore::from_json(SAMPLE).unwrap();
        assert_eq!(store.len(), 3);
        assert!(store.contains("jester"));
        assert!(store.contains("withunderscores"));
        assert!(!store.contains("notagsfield"));
    }

    #[test]
    fn test_lookup_uses_normalized_name() {
        let store = ManifestStore::from_json(SAMPLE).unwrap();
        assert!(store.contains("Jester"));
        assert!(store.contains("JESTER"));
        assert_eq!(store.get("jester").unwrap().name, "Jester");
        // Display form survives only inside the entry.
        assert_eq!(store.get("With_Underscores").unwrap().name, "with_underscores");
    }

    #[test]
    fn test_tag_index_covers_all_tags() {
        let store = ManifestStore::from_json(SAMPLE).unwrap();
        let web = store.packages_by_tag("web");
        assert_eq!(web.len(), 2);
        assert!(web.contains(&"jester".to_string()));
        assert!(web.contains(&"karax".to_string()));
        assert_eq!(store.packages_by_tag("spa"), &["karax".to_string()]);
        assert!(store.packages_by_tag("nonexistent").is_empty());
    }

    #[test]
    fn test_description_word_index_lowercases_and_filters_short_words() {
        let store = ManifestStore::from_json(SAMPLE).unwrap();
        // "A" is below the length cutoff.
        assert!(store.packages_by_description_word("a").is_empty());
        assert_eq!(
            store.packages_by_description_word("sinatra-like"),
            &["jester".to_string()]
        );
        // Words are lowercased on the way in.
        assert_eq!(
            store.packages_by_description_word("single"),
            &["karax".to_string()]
        );
    }

    #[test]
    fn test_normalized_collision_keeps_first() {
        let json = r#"[
            {"name": "foo_bar", "tags": ["a"], "description": "first"},
            {"name": "Foobar", "tags": ["b"], "description": "second"}
        ]"#;
        let store = ManifestStore::from_json(json).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("foobar").unwrap().description, "first");
    }

    #[test]
    fn test_extra_fields_round_trip() {
        let json = r#"[{"name": "x", "tags": [], "alias": "y", "description": ""}]"#;
        let store = ManifestStore::from_json(json).unwrap();
        let entry = store.get("x").unwrap();
        assert_eq!(entry.extra.get("alias").unwrap(), "y");
        let out = serde_json::to_value(entry).unwrap();
        assert_eq!(out.get("alias").unwrap(), "y");
    }

    #[test]
    fn test_apply_update_rejects_dashed_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        std::fs::write(
            &path,
            r#"[{"name": "Foo-Bar", "tags": ["a"], "description": "existing"}]"#,
        )
        .unwrap();

        let submission: PkgManifestEntry = serde_json::from_str(
            r#"{"name": "foobar", "tags": ["b"], "description": "new"}"#,
        )
        .unwrap();
        let err = apply_update(&path, submission).unwrap_err();
        assert!(matches!(err, DirError::NameCollision { .. }));

        // Manifest unchanged on rejection.
        let after: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].get("name").unwrap(), "Foo-Bar");
    }

    #[test]
    fn test_apply_update_replaces_existing_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        std::fs::write(
            &path,
            r#"[{"name": "zzz", "tags": [], "description": ""},
                {"name": "Jester", "tags": ["web"], "description": "old"}]"#,
        )
        .unwrap();

        let submission: PkgManifestEntry = serde_json::from_str(
            r#"{"name": "jester", "tags": ["web", "http"], "description": "updated"}"#,
        )
        .unwrap();
        apply_update(&path, submission).unwrap();

        let after: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].get("name").unwrap(), "jester");
        assert_eq!(after[0].get("description").unwrap(), "updated");
        assert_eq!(after[1].get("name").unwrap(), "zzz");
    }

    #[test]
    fn test_apply_update_appends_new_package() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        std::fs::write(&path, r#"[{"name": "aaa", "tags": [], "description": ""}]"#).unwrap();

        let submission: PkgManifestEntry =
            serde_json::from_str(r#"{"name": "mmm", "tags": ["x"], "description": "new"}"#)
                .unwrap();
        apply_update(&path, submission).unwrap();

        let after: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[1].get("name").unwrap(), "mmm");
    }
}
