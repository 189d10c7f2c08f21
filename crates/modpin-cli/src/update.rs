//! Implementation of the `modpin update` command.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use modpin_core::{
    Dependency, ManifestSnapshot, ModFile, ModUpdater, UpdatedFiles, WorkingTree, GO_MOD, GO_SUM,
};

use crate::config::Config;

/// Options for the update command.
#[derive(Debug, Default)]
pub struct UpdateOptions {
    /// Module directory, or a path relative to `repo_root` when set.
    pub dir: PathBuf,
    /// Run inside this git checkout instead of a private copy.
    pub repo_root: Option<PathBuf>,
    /// Targets as `module@version`.
    pub targets: Vec<String>,
    /// Target modules to pin as `// indirect`.
    pub indirect: Vec<String>,
    /// Report changes without writing them.
    pub dry_run: bool,
}

/// Requirement changes between the old and new `go.mod`.
#[derive(Debug, Default)]
pub struct UpdateResult {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<RequirementChange>,
}

/// A requirement whose version changed.
#[derive(Debug, PartialEq, Eq)]
pub struct RequirementChange {
    pub name: String,
    pub old: String,
    pub new: String,
}

impl UpdateResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Print a summary of the changes.
    pub fn print_summary(&self) {
        if self.is_empty() {
            println!("No requirement changes.");
            return;
        }

        if !self.added.is_empty() {
            println!("Added:");
            for name in &self.added {
                println!("  + {name}");
            }
        }

        if !self.removed.is_empty() {
            println!("Removed:");
            for name in &self.removed {
                println!("  - {name}");
            }
        }

        if !self.updated.is_empty() {
            println!("Updated:");
            for change in &self.updated {
                println!("  {} {} -> {}", change.name, change.old, change.new);
            }
        }
    }
}

/// Pin the targets and rewrite the module's `go.mod`/`go.sum`.
pub fn update_modules(options: &UpdateOptions, config: &Config) -> Result<UpdateResult> {
    let dependencies = options
        .targets
        .iter()
        .map(|t| parse_target(t, &options.indirect))
        .collect::<Result<Vec<_>>>()?;
    if dependencies.is_empty() {
        bail!("Nothing to update. Pass at least one --dep module@version.");
    }

    let updater_config = config.updater_config();
    let toolchain = updater_config.process_toolchain();
    let updater = ModUpdater::new(&toolchain, updater_config);

    let module_dir = match &options.repo_root {
        Some(root) => root.join(&options.dir),
        None => options.dir.clone(),
    };
    let go_mod_path = module_dir.join(GO_MOD);
    let old_go_mod = fs::read_to_string(&go_mod_path)
        .with_context(|| format!("Failed to read {}", go_mod_path.display()))?;

    let files = {
        // The tree is released, and a checkout restored, before anything is
        // written back.
        let tree = match &options.repo_root {
            Some(root) => WorkingTree::checkout_with(
                root,
                &options.dir.to_string_lossy(),
                config.git_binary(),
            )
            .with_context(|| format!("Failed to open checkout at {}", root.display()))?,
            None => {
                let tree = WorkingTree::copy_of(&module_dir)
                    .with_context(|| format!("Failed to copy {}", module_dir.display()))?;
                if options.dir.is_relative() {
                    tree.with_manifest_dir(&options.dir)
                } else {
                    tree
                }
            }
        };
        updater.update(&tree, &dependencies, &config.credentials)?
    };

    let result = compute_changes(
        &ModFile::parse(&old_go_mod).snapshot(),
        &ModFile::parse(&files.go_mod).snapshot(),
    );

    if options.dry_run {
        if files.go_mod != old_go_mod {
            println!("Would update {GO_MOD} (dry run)");
        }
    } else {
        write_files(&module_dir, &old_go_mod, &files)?;
    }

    Ok(result)
}

/// Split `module@version` into a target dependency.
fn parse_target(target: &str, indirect: &[String]) -> Result<Dependency> {
    let Some((name, version)) = target.rsplit_once('@') else {
        bail!("Invalid target '{target}'. Expected module@version.");
    };
    if name.is_empty() || version.is_empty() {
        bail!("Invalid target '{target}'. Expected module@version.");
    }
    Ok(if indirect.iter().any(|m| m == name) {
        Dependency::indirect(name, version)
    } else {
        Dependency::direct(name, version)
    })
}

fn write_files(dir: &Path, old_go_mod: &str, files: &UpdatedFiles) -> Result<()> {
    if files.go_mod != old_go_mod {
        let path = dir.join(GO_MOD);
        fs::write(&path, &files.go_mod)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Updated {GO_MOD}");
    }
    if let Some(go_sum) = &files.go_sum {
        let path = dir.join(GO_SUM);
        fs::write(&path, go_sum)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Compare requirements of two manifests.
fn compute_changes(old: &ManifestSnapshot, new: &ManifestSnapshot) -> UpdateResult {
    let versions = |snap: &ManifestSnapshot| -> BTreeMap<String, String> {
        snap.requires
            .iter()
            .map(|r| (r.path.clone(), r.version.clone()))
            .collect()
    };
    let old = versions(old);
    let new = versions(new);

    let mut result = UpdateResult::default();
    for (name, version) in &new {
        match old.get(name) {
            None => result.added.push(name.clone()),
            Some(previous) if previous != version => result.updated.push(RequirementChange {
                name: name.clone(),
                old: previous.clone(),
                new: version.clone(),
            }),
            Some(_) => {}
        }
    }
    result.removed = old
        .keys()
        .filter(|name| !new.contains_key(*name))
        .cloned()
        .collect();
    result
}
