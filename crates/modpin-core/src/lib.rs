//! Minimal-delta update engine for Go module manifests.
//!
//! This crate provides:
//! - A line-preserving `go.mod` editor
//! - Hermetic toolchain invocation (local `replace` targets stubbed out)
//! - Classification of `go` command diagnostics into actionable errors
//! - The update orchestrator producing an updated `go.mod`/`go.sum` pair
//! - Registry digest-to-tag resolution for container image dependencies

mod classify;
mod credentials;
mod dependency;
mod error;
mod modfile;
pub mod registry;
mod snapshot;
mod stub;
mod substitute;
mod toolchain;
mod updater;
mod workdir;

pub use classify::{classify, ClassifyRule, ErrorKind, RULES};
pub use credentials::{Credential, CredentialsFinder, DEFAULT_GIT_HOST};
pub use dependency::{normalize_version, Dependency, Requirement, RequirementSource};
pub use error::UpdateError;
pub use modfile::{ModFile, ModFileError};
pub use registry::{
    resolve_version_by_digest, HttpRegistryClient, RegistryError, TagResolver, DEFAULT_REGISTRY,
};
pub use snapshot::{ManifestSnapshot, ModuleVersion, Replace, Require};
pub use stub::{materialize, STUB_MANIFEST, STUB_SOURCE};
pub use substitute::SubstitutionMap;
pub use toolchain::{GoCommands, Invocation, ProcessToolchain, ToolOutput, Toolchain};
pub use updater::{ModUpdater, Stage, UpdatedFiles, UpdaterConfig};
pub use workdir::{GitIdentity, WorkingTree};

/// The manifest filename.
pub const GO_MOD: &str = "go.mod";

/// The lock filename.
pub const GO_SUM: &str = "go.sum";
