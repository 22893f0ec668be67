//! Package name normalization.
//!
//! Every map key in every index uses the normalized form; the original
//! display form survives only inside the manifest entry itself.

/// Normalize a package name for use as an index key.
///
/// Lowercases the name and strips underscores, matching how the Nim
/// compiler treats identifiers.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Collision key used when admitting new packages through the update
/// endpoint: like [`normalize`] but also ignores dashes, so `foo-bar`
/// and `foobar` cannot coexist.
pub fn collision_key(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
