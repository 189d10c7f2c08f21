//! Location-independent stand-ins for local `replace` targets.
//!
//! A `replace example.com/bar => ../local-bar` directive only works inside
//! the original checkout. Each such path is swapped for `./<sha256 hex of the
//! path>` while the toolchain runs, then swapped back afterwards.
//!
//! Stub ids are the lowercase hex SHA-256 digest of the exact path string,
//! prefixed with `./`. The same path always yields the same id.

use sha2::{Digest, Sha256};

use crate::snapshot::ManifestSnapshot;

/// Ordered pairs of `(original, replacement)` text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionMap {
    pairs: Vec<(String, String)>,
}

impl SubstitutionMap {
    /// Map every local replace target in `snapshot` to its stub id.
    #[must_use]
    pub fn compute(snapshot: &ManifestSnapshot) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for path in snapshot.local_replace_targets() {
            if pairs.iter().any(|(old, _)| old == path) {
                continue;
            }
            pairs.push((path.to_string(), stub_id(path)));
        }
        Self { pairs }
    }

    /// Returns true if there is nothing to substitute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of substituted paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// The stub ids (replacement side).
    pub fn stub_ids(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, stub)| stub.as_str())
    }

    /// Look up the replacement for `original`.
    #[must_use]
    pub fn get(&self, original: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(old, _)| old == original)
            .map(|(_, new)| new.as_str())
    }

    /// The reverse mapping.
    #[must_use]
    pub fn invert(&self) -> Self {
        Self {
            pairs: self
                .pairs
                .iter()
                .map(|(old, new)| (new.clone(), old.clone()))
                .collect(),
        }
    }

    /// Replace the first occurrence of each original with its replacement.
    ///
    /// A path is declared once per manifest, so one occurrence suffices.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        self.pairs
            .iter()
            .fold(text.to_string(), |acc, (old, new)| acc.replacen(old, new, 1))
    }
}

/// `./` followed by the hex SHA-256 of `path`.
fn stub_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    format!("./{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ModuleVersion, Replace};

    fn snapshot_with(targets: &[&str]) -> ManifestSnapshot {
        ManifestSnapshot {
            replaces: targets
                .iter()
                .enumerate()
                .map(|(i, t)| Replace {
                    old: ModuleVersion {
                        path: format!("example.com/m{i}"),
                        version: None,
                    },
                    new: ModuleVersion {
                        path: (*t).to_string(),
                        version: None,
                    },
                })
                .collect(),
            ..ManifestSnapshot::default()
        }
    }

    #[test]
    fn stub_id_is_sha256_hex() {
        let id = stub_id("../local-bar");
        assert_eq!(
            id,
            "./94ff39e151d6e26147edd355769a325a60113925041e57f54cb16469900610cf"
        );
        assert_eq!(id, stub_id("../local-bar"));
        assert_ne!(id, stub_id("../local-baz"));
    }

    #[test]
    fn only_local_targets_are_mapped() {
        let map = SubstitutionMap::compute(&snapshot_with(&[
            "../local-bar",
            "example.com/fork",
            "/abs/dir",
        ]));
        assert_eq!(map.len(), 2);
        assert!(map.get("../local-bar").is_some());
        assert!(map.get("/abs/dir").is_some());
        assert!(map.get("example.com/fork").is_none());
    }

    #[test]
    fn no_local_targets_gives_empty_map() {
        let map = SubstitutionMap::compute(&snapshot_with(&["example.com/fork"]));
        assert!(map.is_empty());
        assert_eq!(map.apply("unchanged"), "unchanged");
    }

    #[test]
    fn repeated_target_maps_once() {
        let map = SubstitutionMap::compute(&snapshot_with(&["../shared", "../shared"]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn apply_then_invert_round_trips() {
        let text = "module example.com/app\n\n\
                    require example.com/bar v1.0.0\n\n\
                    replace example.com/bar => ../local-bar\n\
                    replace example.com/qux => /opt/src/qux // pinned\n";
        let map = SubstitutionMap::compute(&snapshot_with(&["../local-bar", "/opt/src/qux"]));

        let substituted = map.apply(text);
        assert!(!substituted.contains("../local-bar"));
        assert!(substituted.contains(map.get("../local-bar").unwrap()));

        assert_eq!(map.invert().apply(&substituted), text);
    }

    #[test]
    fn apply_replaces_first_occurrence_only() {
        let map = SubstitutionMap::compute(&snapshot_with(&["../x"]));
        let out = map.apply("../x ../x");
        assert!(out.ends_with(" ../x"));
    }
}
