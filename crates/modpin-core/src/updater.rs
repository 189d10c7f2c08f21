//! The update orchestrator.
//!
//! Given target versions, produce a `go.mod`/`go.sum` pair that changes only
//! what the targets (and their transitive consequences) require:
//!
//! 1. Capture the original text and a structured snapshot.
//! 2. Swap local `replace` targets for stub modules so the toolchain can run
//!    outside the original checkout.
//! 3. Pin the targets, then let `go get` and `go mod tidy` settle the graph.
//! 4. Snapshot again and diff the requirement paths.
//! 5. Restore the original text and replay only that delta onto it, since
//!    the toolchain's own rewrite reformats and re-pins unrelated entries.
//! 6. Swap the stubs back for the original paths.
//!
//! Any failing toolchain call aborts the whole operation with one classified
//! [`UpdateError`]; no partial result is returned.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::credentials::Credential;
use crate::dependency::Dependency;
use crate::error::UpdateError;
use crate::modfile::ModFile;
use crate::stub::{self, STUB_SOURCE};
use crate::substitute::SubstitutionMap;
use crate::toolchain::{GoCommands, ProcessToolchain, Toolchain};
use crate::workdir::{GitIdentity, WorkingTree};
use crate::{GO_MOD, GO_SUM};

/// Written when the working tree has no Go source for `go get` to analyze.
const PLACEHOLDER_SOURCE: &str = "package dummypkg\n";

/// Settings for an update run.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Set `GOPRIVATE=*` so every module is fetched directly rather than via
    /// the shared module proxy, which cannot see authenticated sources.
    pub bypass_module_proxy: bool,

    /// Wall-clock limit per toolchain invocation.
    pub command_timeout: Option<Duration>,

    /// The `go` executable.
    pub go_binary: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            bypass_module_proxy: true,
            command_timeout: None,
            go_binary: String::from("go"),
        }
    }
}

impl UpdaterConfig {
    /// A process toolchain honouring `command_timeout`.
    #[must_use]
    pub fn process_toolchain(&self) -> ProcessToolchain {
        ProcessToolchain::with_timeout(self.command_timeout)
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if self.bypass_module_proxy {
            env.push(("GOPRIVATE".to_string(), "*".to_string()));
        }
        env
    }
}

/// The updated manifest pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedFiles {
    pub go_mod: String,
    /// `None` when the project had no `go.sum` to begin with.
    pub go_sum: Option<String>,
}

/// Progress through one update, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SnapshottingPre,
    Substituted,
    StubsBuilt,
    DeltaApplying,
    ToolchainResolving,
    SnapshottingPost,
    Diffing,
    Reapplying,
    Unsubstituting,
    Done,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::SnapshottingPre => "snapshotting-pre",
            Self::Substituted => "substituted",
            Self::StubsBuilt => "stubs-built",
            Self::DeltaApplying => "delta-applying",
            Self::ToolchainResolving => "toolchain-resolving",
            Self::SnapshottingPost => "snapshotting-post",
            Self::Diffing => "diffing",
            Self::Reapplying => "reapplying",
            Self::Unsubstituting => "unsubstituting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one update per call. Holds no state between calls.
pub struct ModUpdater<'a, T: Toolchain + ?Sized> {
    toolchain: &'a T,
    config: UpdaterConfig,
}

impl<'a, T: Toolchain + ?Sized> ModUpdater<'a, T> {
    pub fn new(toolchain: &'a T, config: UpdaterConfig) -> Self {
        Self { toolchain, config }
    }

    /// Update `tree` to the given dependency versions.
    ///
    /// A transient git identity built from `credentials` is active for the
    /// duration of the call and removed afterwards, whatever the outcome.
    pub fn update(
        &self,
        tree: &WorkingTree,
        dependencies: &[Dependency],
        credentials: &[Credential],
    ) -> Result<UpdatedFiles, UpdateError> {
        let identity = GitIdentity::configure(credentials)?;
        let mut env = self.config.environment();
        env.extend_from_slice(identity.env());
        self.update_in(tree.dir(), &tree.manifest_label(), dependencies, env)
    }

    /// Update the `go.mod` in `dir` with an explicit environment.
    ///
    /// `manifest_label` names the manifest in classified errors.
    pub fn update_in(
        &self,
        dir: &Path,
        manifest_label: &str,
        dependencies: &[Dependency],
        env: Vec<(String, String)>,
    ) -> Result<UpdatedFiles, UpdateError> {
        let span = tracing::info_span!("update", dir = %dir.display());
        let _entered = span.enter();

        let go = GoCommands::new(
            self.toolchain,
            self.config.go_binary.as_str(),
            dir,
            env,
            manifest_label,
        );
        let go_mod = dir.join(GO_MOD);
        let go_sum = dir.join(GO_SUM);

        enter(Stage::Init);
        let original_go_mod = fs::read_to_string(&go_mod)?;
        let original_go_sum = read_optional(&go_sum)?;

        enter(Stage::SnapshottingPre);
        let original = go.inspect()?;
        let substitutions = SubstitutionMap::compute(&original);

        enter(Stage::Substituted);
        rewrite(&go_mod, |text| substitutions.apply(text))?;

        enter(Stage::StubsBuilt);
        stub::materialize(dir, substitutions.stub_ids())?;

        enter(Stage::DeltaApplying);
        set_requirements(&go_mod, dependencies)?;

        enter(Stage::ToolchainResolving);
        ensure_source(dir)?;
        go.resolve()?;
        go.tidy()?;

        enter(Stage::SnapshottingPost);
        let updated = go.inspect()?;

        enter(Stage::Diffing);
        let removed = original.removed_in(&updated);
        tracing::debug!(
            removed = removed.len(),
            required = updated.requires.len(),
            "requirement delta"
        );

        enter(Stage::Reapplying);
        fs::write(&go_mod, &original_go_mod)?;
        for path in removed {
            go.drop_requirement(path)?;
        }
        let resolved: Vec<Dependency> = updated.requires.iter().map(Dependency::from).collect();
        set_requirements(&go_mod, &resolved)?;

        enter(Stage::Unsubstituting);
        let inverse = substitutions.invert();
        rewrite(&go_mod, |text| inverse.apply(text))?;

        let result = UpdatedFiles {
            go_mod: fs::read_to_string(&go_mod)?,
            go_sum: match original_go_sum {
                Some(_) => read_optional(&go_sum)?,
                None => None,
            },
        };
        enter(Stage::Done);
        tracing::info!(
            targets = dependencies.len(),
            stubs = substitutions.len(),
            "go.mod updated"
        );
        Ok(result)
    }
}

fn enter(stage: Stage) {
    tracing::debug!(%stage, "update stage");
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn rewrite(path: &Path, edit: impl FnOnce(&str) -> String) -> io::Result<()> {
    let text = fs::read_to_string(path)?;
    let updated = edit(&text);
    if updated != text {
        fs::write(path, updated)?;
    }
    Ok(())
}

/// Pin each dependency at its normalized version.
fn set_requirements(go_mod: &Path, dependencies: &[Dependency]) -> Result<(), UpdateError> {
    let mut file = ModFile::parse(&fs::read_to_string(go_mod)?);
    let mut changed = false;
    for dep in dependencies {
        changed |= file.set_requirement(&dep.name, &dep.normalized_version(), dep.is_indirect())?;
    }
    if changed {
        fs::write(go_mod, file.to_string())?;
    }
    Ok(())
}

/// `go get` needs at least one package to analyze.
fn ensure_source(dir: &Path) -> io::Result<()> {
    let pattern = format!("{}/*.go", glob::Pattern::escape(&dir.to_string_lossy()));
    let has_source = glob::glob(&pattern).is_ok_and(|mut paths| paths.next().is_some());
    if !has_source {
        fs::write(dir.join(STUB_SOURCE), PLACEHOLDER_SOURCE)?;
    }
    Ok(())
}
