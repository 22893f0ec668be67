//! Cross-package symbol index built from the documentation tool's
//! machine-readable output.
//!
//! `nim jsondoc` emits one `<source>.json` per source file. Those files are
//! parsed here, both after a successful doc build and at startup when the
//! directory scanner replays cached output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// One documented declaration extracted from a source file.
///
/// Equality is structural; duplicates are deduplicated on insert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PkgSymbol {
    pub kind: String,
    pub description: String,
    pub code: String,
    pub relative_path: String,
    pub line: u64,
    pub column: u64,
}

/// Symbol lookup tables. Whole `PkgSymbol` values are published under the
/// state lock, so readers never observe torn entries.
#[derive(Debug, Default, Clone)]
pub struct SymbolIndex {
    /// Symbol name -> symbols across all packages.
    by_name: HashMap<String, BTreeSet<PkgSymbol>>,
    /// (normalized package, symbol name) -> symbols.
    by_pkg: HashMap<(String, String), BTreeSet<PkgSymbol>>,
}

impl SymbolIndex {
    /// Parse the jsondoc output for one source file and merge its symbols.
    ///
    /// The JSON is looked for next to the source file first, then in the
    /// `htmldocs` subdirectory. Returns the number of symbols inserted
    /// (0 when the output file is missing, which is logged and skipped).
    pub fn parse_jsondoc(&mut self, pkg: &str, pkg_root: &Path, source: &Path) -> usize {
        let candidate = source.with_extension("json");
        let json_path = if candidate.exists() {
            candidate
        } else {
            let fallback = source
                .parent()
                .unwrap_or(Path::new("."))
                .join("htmldocs")
                .join(candidate.file_name().unwrap_or_default());
            if fallback.exists() {
                fallback
            } else {
                tracing::debug!(source = %source.display(), "no jsondoc output, skipping");
                return 0;
            }
        };

        let text = match std::fs::read_to_string(&json_path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path = %json_path.display(), error = %e, "failed to read jsondoc output");
                return 0;
            }
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path = %json_path.display(), error = %e, "failed to parse jsondoc output");
                return 0;
            }
        };

        // Either a bare array or an object with an "entries" array.
        let entries = match &value {
            Value::Array(a) => a.as_slice(),
            Value::Object(o) => match o.get("entries").and_then(Value::as_array) {
                Some(a) => a.as_slice(),
                None => return 0,
            },
            _ => return 0,
        };

        let relative_path = source
            .strip_prefix(pkg_root)
            .unwrap_or(source)
            .to_string_lossy()
            .to_string();

        let mut inserted = 0;
        for entry in entries {
            let name = match entry.get("name").and_then(Value::as_str) {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => continue,
            };
            let symbol = PkgSymbol {
                kind: entry
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: strip_html_tags(
                    entry
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                ),
                code: entry
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                relative_path: relative_path.clone(),
                line: entry.get("line").and_then(Value::as_u64).unwrap_or(0),
                column: entry.get("col").and_then(Value::as_u64).unwrap_or(0),
            };
            if self.insert(pkg, &name, symbol) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Insert one symbol; returns false when it was already present.
    pub fn insert(&mut self, pkg: &str, name: &str, symbol: PkgSymbol) -> bool {
        let fresh = self
            .by_name
            .entry(name.to_string())
            .or_default()
            .insert(symbol.clone());
        self.by_pkg
            .entry((pkg.to_string(), name.to_string()))
            .or_default()
            .insert(symbol);
        fresh
    }

    /// All symbols with this exact name, across packages.
    pub fn search_symbol(&self, name: &str) -> Vec<PkgSymbol> {
        self.by_name
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Symbols with this name inside one package.
    pub fn search_symbol_in_pkg(&self, pkg: &str, name: &str) -> Vec<PkgSymbol> {
        self.by_pkg
            .get(&(pkg.to_string(), name.to_string()))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct symbol names indexed.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Remove HTML tags from a jsondoc description.
fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_symbol(line: u64) -> PkgSymbol {
        PkgSymbol {
            kind: "skProc".to_string(),
            description: "does a thing".to_string(),
            code: "proc thing()".to_string(),
            relative_path: "src/thing.nim".to_string(),
            line,
            column: 0,
        }
    }

    #[test]
    fn test_insert_deduplicates_structural_equals() {
        let mut idx = SymbolIndex::default();
        assert!(idx.insert("foo", "thing", sample_symbol(3)));
        assert!(!idx.insert("foo", "thing", sample_symbol(3)));
        assert!(idx.insert("foo", "thing", sample_symbol(7)));
        assert_eq!(idx.search_symbol("thing").len(), 2);
        assert_eq!(idx.search_symbol_in_pkg("foo", "thing").len(), 2);
    }

    #[test]
    fn test_search_missing_returns_empty() {
        let idx = SymbolIndex::default();
        assert!(idx.search_symbol("nope").is_empty());
        assert!(idx.search_symbol_in_pkg("foo", "nope").is_empty());
    }

    #[test]
    fn test_cross_package_search_spans_packages() {
        let mut idx = SymbolIndex::default();
        let mut a = sample_symbol(1);
        a.relative_path = "a.nim".to_string();
        let mut b = sample_symbol(1);
        b.relative_path = "b.nim".to_string();
        idx.insert("pkga", "common", a);
        idx.insert("pkgb", "common", b);
        assert_eq!(idx.search_symbol("common").len(), 2);
        assert_eq!(idx.search_symbol_in_pkg("pkga", "common").len(), 1);
    }

    #[test]
    fn test_parse_jsondoc_array_form() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let source = root.join("lib.nim");
        std::fs::write(&source, "proc hello() = discard\n").unwrap();
        std::fs::write(
            root.join("lib.json"),
            r#"[{"name": "hello", "type": "skProc",
                 "description": "Says <em>hello</em>",
                 "code": "proc hello()", "line": 1, "col": 0}]"#,
        )
        .unwrap();

        let mut idx = SymbolIndex::default();
        assert_eq!(idx.parse_jsondoc("greet", root, &source), 1);
        let found = idx.search_symbol("hello");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].description, "Says hello");
        assert_eq!(found[0].relative_path, "lib.nim");
    }

    #[test]
    fn test_parse_jsondoc_entries_object_form() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let source = root.join("lib.nim");
        std::fs::write(&source, "").unwrap();
        std::fs::write(
            root.join("lib.json"),
            r#"{"orig": "lib.nim", "entries": [
                {"name": "World", "type": "skType", "description": "",
                 "code": "type World = object", "line": 4, "col": 2}]}"#,
        )
        .unwrap();

        let mut idx = SymbolIndex::default();
        assert_eq!(idx.parse_jsondoc("greet", root, &source), 1);
        assert_eq!(idx.search_symbol("World")[0].line, 4);
    }

    #[test]
    fn test_parse_jsondoc_htmldocs_fallback() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let source = root.join("lib.nim");
        std::fs::write(&source, "").unwrap();
        std::fs::create_dir(root.join("htmldocs")).unwrap();
        std::fs::write(
            root.join("htmldocs/lib.json"),
            r#"[{"name": "x", "type": "skConst", "description": "", "code": "const x = 1", "line": 1, "col": 0}]"#,
        )
        .unwrap();

        let mut idx = SymbolIndex::default();
        assert_eq!(idx.parse_jsondoc("greet", root, &source), 1);
    }

    #[test]
    fn test_parse_jsondoc_missing_output_skips() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("absent.nim");
        std::fs::write(&source, "").unwrap();
        let mut idx = SymbolIndex::default();
        assert_eq!(idx.parse_jsondoc("greet", dir.path(), &source), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_parse_jsondoc_malformed_json_skips() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("bad.nim");
        std::fs::write(&source, "").unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let mut idx = SymbolIndex::default();
        assert_eq!(idx.parse_jsondoc("greet", dir.path(), &source), 0);
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html_tags("plain"), "plain");
        assert_eq!(strip_html_tags("<p>a <b>b</b></p>"), "a b");
        assert_eq!(strip_html_tags("unclosed <tag"), "unclosed ");
    }
}
