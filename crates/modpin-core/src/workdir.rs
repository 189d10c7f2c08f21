//! Scoped working directories and transient git identity.
//!
//! Both types release their resources on drop, on success and on failure.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

use crate::credentials::{Credential, CredentialsFinder};
use crate::{GO_MOD, GO_SUM};

/// The directory one update operates in.
#[derive(Debug)]
pub struct WorkingTree {
    root: PathBuf,
    dir: PathBuf,
    kind: TreeKind,
    /// Overrides the label derived from `root` and `dir`.
    label: Option<String>,
}

#[derive(Debug)]
enum TreeKind {
    /// A caller-owned git checkout, restored to `HEAD` on release.
    Checkout { git: String },
    /// A private directory deleted on release.
    Temporary(TempDir),
}

impl WorkingTree {
    /// Reuse the git checkout at `repo_root`, working in `directory`
    /// (relative to the root; `/` or empty for the root itself).
    ///
    /// The checkout must have no uncommitted or untracked changes. On release
    /// it is reset to `HEAD`, which removes everything the update wrote.
    pub fn checkout(repo_root: impl Into<PathBuf>, directory: &str) -> io::Result<Self> {
        Self::checkout_with(repo_root, directory, "git")
    }

    /// [`WorkingTree::checkout`] using the given `git` executable.
    pub fn checkout_with(
        repo_root: impl Into<PathBuf>,
        directory: &str,
        git: &str,
    ) -> io::Result<Self> {
        let root = repo_root.into();
        let dir = root.join(directory.trim_start_matches('/'));
        if !dir.join(GO_MOD).is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {GO_MOD} in {}", dir.display()),
            ));
        }
        ensure_clean(git, &root)?;
        Ok(Self {
            root,
            dir,
            kind: TreeKind::Checkout {
                git: git.to_string(),
            },
            label: None,
        })
    }

    /// A fresh directory holding the given manifest pair.
    pub fn temporary(go_mod: &str, go_sum: Option<&str>) -> io::Result<Self> {
        let tmp = tempfile::Builder::new().prefix("modpin-").tempdir()?;
        fs::write(tmp.path().join(GO_MOD), go_mod)?;
        if let Some(go_sum) = go_sum {
            fs::write(tmp.path().join(GO_SUM), go_sum)?;
        }
        Ok(Self {
            root: tmp.path().to_path_buf(),
            dir: tmp.path().to_path_buf(),
            kind: TreeKind::Temporary(tmp),
            label: None,
        })
    }

    /// A private copy of the module directory at `dir`, nested packages
    /// included. `.git` and `vendor` directories are left out.
    pub fn copy_of(dir: &Path) -> io::Result<Self> {
        if !dir.join(GO_MOD).is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {GO_MOD} in {}", dir.display()),
            ));
        }
        // glob drops a leading `./` from what it yields, so walk an absolute
        // path to keep `strip_prefix` working.
        let dir = fs::canonicalize(dir)?;
        let dir = dir.as_path();
        let tmp = tempfile::Builder::new().prefix("modpin-").tempdir()?;
        let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
        let entries = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut copied = 0usize;
        for entry in entries {
            let path = entry.map_err(glob::GlobError::into_error)?;
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            if relative
                .components()
                .any(|c| matches!(c.as_os_str().to_str(), Some(".git" | "vendor")))
            {
                continue;
            }
            let target = tmp.path().join(relative);
            if path.is_dir() {
                fs::create_dir_all(&target)?;
            } else if path.is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&path, &target)?;
                copied += 1;
            }
        }
        tracing::debug!(from = %dir.display(), files = copied, "copied module directory");

        Ok(Self {
            root: tmp.path().to_path_buf(),
            dir: tmp.path().to_path_buf(),
            kind: TreeKind::Temporary(tmp),
            label: None,
        })
    }

    /// Report the manifest as living in `directory` of the caller's
    /// project, for trees that are private copies.
    #[must_use]
    pub fn with_manifest_dir(mut self, directory: &Path) -> Self {
        self.label = Some(label_for(directory));
        self
    }

    /// The directory containing `go.mod`.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `go.mod` lives relative to the checkout root, for error reports.
    #[must_use]
    pub fn manifest_label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => manifest_label(&self.root, &self.dir),
        }
    }
}

impl Drop for WorkingTree {
    fn drop(&mut self) {
        let TreeKind::Checkout { git } = &self.kind else {
            return;
        };
        for args in [&["reset", "--hard", "--quiet"][..], &["clean", "-fdq"][..]] {
            let status = Command::new(git)
                .args(args)
                .current_dir(&self.root)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if !status.is_ok_and(|s| s.success()) {
                tracing::warn!(root = %self.root.display(), ?args, "failed to restore checkout");
            }
        }
    }
}

/// `go.mod` at the root, `/<dir>/go.mod` below it.
fn manifest_label(root: &Path, dir: &Path) -> String {
    label_for(dir.strip_prefix(root).unwrap_or(dir))
}

fn label_for(relative: &Path) -> String {
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        GO_MOD.to_string()
    } else {
        format!("/{}/{GO_MOD}", parts.join("/"))
    }
}

/// Fail unless `git status` reports nothing to lose.
fn ensure_clean(git: &str, root: &Path) -> io::Result<()> {
    let output = Command::new(git)
        .args(["status", "--porcelain"])
        .current_dir(root)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "{} is not a git checkout",
            root.display()
        )));
    }
    if !output.stdout.is_empty() {
        return Err(io::Error::other(format!(
            "checkout at {} has uncommitted changes",
            root.display()
        )));
    }
    Ok(())
}

/// A throwaway git configuration carrying HTTPS credentials.
///
/// Exposed to child processes through `GIT_CONFIG_GLOBAL`; nothing in the
/// user's own configuration is touched.
#[derive(Debug)]
pub struct GitIdentity {
    dir: TempDir,
    env: Vec<(String, String)>,
}

impl GitIdentity {
    /// Write a git config and credential store for every `git_source`
    /// credential.
    pub fn configure(credentials: &[Credential]) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("modpin-git-").tempdir()?;
        let store = dir.path().join("credentials");
        let config = dir.path().join("gitconfig");

        let mut store_lines = String::new();
        let mut config_body = String::from(
            "[user]\n\tname = modpin\n\temail = noreply@modpin.invalid\n",
        );
        config_body.push_str(&format!(
            "[credential]\n\thelper = store --file={}\n",
            store.display()
        ));

        for cred in CredentialsFinder::new(credentials).git_sources() {
            let Credential::GitSource { host, .. } = cred else {
                continue;
            };
            // Module fetches may use ssh URLs; route them through https so
            // the stored credentials apply.
            config_body.push_str(&format!(
                "[url \"https://{host}/\"]\n\tinsteadOf = ssh://git@{host}/\n\tinsteadOf = git@{host}:\n"
            ));
            if let Some(password) = cred.password() {
                let user = cred.username().unwrap_or("x-access-token");
                store_lines.push_str(&format!(
                    "https://{}:{}@{host}\n",
                    utf8_percent_encode(user, NON_ALPHANUMERIC),
                    utf8_percent_encode(password, NON_ALPHANUMERIC),
                ));
            }
        }

        fs::write(&store, store_lines)?;
        fs::write(&config, config_body)?;

        let env = vec![
            (
                "GIT_CONFIG_GLOBAL".to_string(),
                config.to_string_lossy().into_owned(),
            ),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ];
        tracing::debug!(config = %config.display(), "configured transient git identity");
        Ok(Self { dir, env })
    }

    /// Environment variables pointing git at this identity.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Directory holding the transient configuration.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
