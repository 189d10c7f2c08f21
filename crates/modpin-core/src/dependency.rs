//! Dependency records exchanged with callers.

use serde::{Deserialize, Serialize};

use crate::snapshot::Require;
use crate::GO_MOD;

/// A module the caller wants pinned at a specific version.
///
/// Identity is the module path (`name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Module path, e.g. `example.com/foo`.
    pub name: String,

    /// Target version, with or without a `v` prefix.
    pub version: String,

    /// Manifest requirements referencing this module. An empty list marks the
    /// module as an indirect requirement.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

/// One manifest's view of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// File declaring the requirement.
    pub file: String,

    /// Declared version constraint, if any.
    #[serde(default)]
    pub requirement: Option<String>,

    /// Dependency groups the requirement belongs to.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Where the version was sourced from.
    #[serde(default)]
    pub source: Option<RequirementSource>,
}

/// Registry coordinates a requirement was resolved against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSource {
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

impl Dependency {
    /// A direct dependency declared in `go.mod`.
    #[must_use]
    pub fn direct(name: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            name: name.into(),
            requirements: vec![Requirement::go_mod(Some(version.clone()))],
            version,
        }
    }

    /// An indirect dependency (no source requirement references it).
    #[must_use]
    pub fn indirect(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            requirements: Vec::new(),
        }
    }

    /// Whether this dependency is only pulled in transitively.
    #[must_use]
    pub fn is_indirect(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The version with exactly one leading `v`.
    #[must_use]
    pub fn normalized_version(&self) -> String {
        normalize_version(&self.version)
    }
}

impl From<&Require> for Dependency {
    /// Approximates a dependency from a resolved requirement; `source` is not
    /// populated.
    fn from(req: &Require) -> Self {
        if req.indirect {
            Self::indirect(&req.path, &req.version)
        } else {
            Self::direct(&req.path, &req.version)
        }
    }
}

impl Requirement {
    /// A plain requirement declared in `go.mod`.
    #[must_use]
    pub fn go_mod(requirement: Option<String>) -> Self {
        Self {
            file: GO_MOD.to_string(),
            requirement,
            groups: Vec::new(),
            source: None,
        }
    }
}

/// Enforce a single `v` prefix on a module version.
///
/// `1.2.3`, `v1.2.3` and `V1.2.3` all become `v1.2.3`.
#[must_use]
pub fn normalize_version(version: &str) -> String {
    let bare = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);
    format!("v{bare}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_missing_prefix() {
        assert_eq!(normalize_version("1.2.3"), "v1.2.3");
    }

    #[test]
    fn normalize_keeps_single_prefix() {
        assert_eq!(normalize_version("v1.2.3"), "v1.2.3");
        assert_eq!(normalize_version("V1.2.3"), "v1.2.3");
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["1.2.3", "v1.2.3", "V1.2.3", "v0.0.0-20200101000000-abcdef123456"] {
            let once = normalize_version(input);
            assert_eq!(normalize_version(&once), once);
        }
    }

    #[test]
    fn indirect_flag_follows_requirements() {
        assert!(!Dependency::direct("example.com/a", "v1.0.0").is_indirect());
        assert!(Dependency::indirect("example.com/a", "v1.0.0").is_indirect());
    }

    #[test]
    fn from_resolved_requirement() {
        let req = Require {
            path: "example.com/b".to_string(),
            version: "v2.0.0".to_string(),
            indirect: true,
        };
        let dep = Dependency::from(&req);
        assert_eq!(dep.name, "example.com/b");
        assert!(dep.is_indirect());
    }

    #[test]
    fn deserialize_minimal_json() {
        let dep: Dependency =
            serde_json::from_str(r#"{"name":"example.com/c","version":"1.0.0"}"#).unwrap();
        assert!(dep.is_indirect());
        assert_eq!(dep.normalized_version(), "v1.0.0");
    }
}
