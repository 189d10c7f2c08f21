//! Errors surfaced by an update operation.

use thiserror::Error;

use crate::modfile::ModFileError;
use crate::registry::RegistryError;

/// The single error an update operation fails with.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// A required module could not be fetched or verified.
    #[error("dependency file not resolvable:\n{0}")]
    DependencyFileNotResolvable(String),

    /// A fetched module declares a different path than the one imported.
    #[error("module path mismatch in {go_mod}: {declared} declares its path as {discovered}")]
    ModulePathMismatch {
        go_mod: String,
        declared: String,
        discovered: String,
    },

    /// The toolchain failed in a way that matched no known pattern.
    #[error("dependency file {file} not parseable: {message}")]
    DependencyFileNotParseable { file: String, message: String },

    /// A non-default registry rejected the supplied credentials.
    #[error("authentication failed for private source {0}")]
    PrivateSourceAuthenticationFailure(String),

    /// A registry failure passed through unfiltered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to edit go.mod: {0}")]
    ModFile(#[from] ModFileError),

    #[error("malformed manifest dump: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
