//! Structured view of a `go.mod`, as dumped by `go mod edit -json`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// An immutable capture of a manifest's requirements and replacements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestSnapshot {
    /// The module's own path.
    #[serde(default)]
    pub module: Option<ModuleVersion>,

    /// Go language version directive.
    #[serde(default)]
    pub go: Option<String>,

    /// Required modules, in file order.
    #[serde(default, rename = "Require", deserialize_with = "null_as_empty")]
    pub requires: Vec<Require>,

    /// Replace directives, in file order.
    #[serde(default, rename = "Replace", deserialize_with = "null_as_empty")]
    pub replaces: Vec<Replace>,
}

/// A module path with an optional version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleVersion {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A `require` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Require {
    pub path: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub indirect: bool,
}

/// A `replace` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Replace {
    pub old: ModuleVersion,
    pub new: ModuleVersion,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ManifestSnapshot {
    /// Parse the JSON printed by `go mod edit -json`.
    ///
    /// An empty document yields an empty snapshot.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }

    /// Look up a requirement by module path.
    #[must_use]
    pub fn require(&self, path: &str) -> Option<&Require> {
        self.requires.iter().find(|r| r.path == path)
    }

    /// Requirement paths present here but absent from `later`, in file order.
    #[must_use]
    pub fn removed_in<'a>(&'a self, later: &Self) -> Vec<&'a str> {
        let remaining: HashSet<&str> = later.requires.iter().map(|r| r.path.as_str()).collect();
        self.requires
            .iter()
            .map(|r| r.path.as_str())
            .filter(|p| !remaining.contains(p))
            .collect()
    }

    /// Replace targets that point at the local filesystem.
    pub fn local_replace_targets(&self) -> impl Iterator<Item = &str> {
        self.replaces
            .iter()
            .map(|r| r.new.path.as_str())
            .filter(|p| is_local_path(p))
    }
}

/// Replace targets starting with `.` or `/` are filesystem paths; anything
/// else is a module path.
pub(crate) fn is_local_path(path: &str) -> bool {
    path.starts_with('.') || path.starts_with('/')
}
