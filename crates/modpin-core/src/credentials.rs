//! Credentials forwarded to source control and container registries.

use serde::{Deserialize, Serialize};

/// Host used for `git_source` credentials when none is given.
pub const DEFAULT_GIT_HOST: &str = "github.com";

/// A secret for one host, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// HTTPS credentials for fetching private modules over git.
    GitSource {
        #[serde(default = "default_git_host")]
        host: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },

    /// Basic credentials for a container registry.
    DockerRegistry {
        registry: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
}

fn default_git_host() -> String {
    DEFAULT_GIT_HOST.to_string()
}

impl Credential {
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::GitSource { username, .. } | Self::DockerRegistry { username, .. } => {
                username.as_deref()
            }
        }
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        match self {
            Self::GitSource { password, .. } | Self::DockerRegistry { password, .. } => {
                password.as_deref()
            }
        }
    }
}

/// Looks up credentials by host.
#[derive(Debug, Clone, Copy)]
pub struct CredentialsFinder<'a> {
    credentials: &'a [Credential],
}

impl<'a> CredentialsFinder<'a> {
    #[must_use]
    pub fn new(credentials: &'a [Credential]) -> Self {
        Self { credentials }
    }

    /// The first registry credential for `registry`.
    #[must_use]
    pub fn for_registry(&self, registry: &str) -> Option<&'a Credential> {
        self.credentials.iter().find(
            |c| matches!(c, Credential::DockerRegistry { registry: r, .. } if r == registry),
        )
    }

    /// Every git credential, in declaration order.
    pub fn git_sources(&self) -> impl Iterator<Item = &'a Credential> + 'a {
        self.credentials
            .iter()
            .filter(|c| matches!(c, Credential::GitSource { .. }))
    }
}
