//! `modpin.toml` loading, with credentials layered in from the environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use modpin_core::{Credential, UpdaterConfig, DEFAULT_GIT_HOST, DEFAULT_REGISTRY};

/// Config file picked up from the current directory when `--config` is absent.
pub const CONFIG_FILE: &str = "modpin.toml";

/// Username paired with `GITHUB_ACCESS_TOKEN`.
const TOKEN_USERNAME: &str = "modpin";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub updater: UpdaterSection,

    #[serde(default)]
    pub credentials: Vec<Credential>,
}

/// The `[updater]` table.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UpdaterSection {
    #[serde(default = "default_bypass")]
    pub bypass_module_proxy: bool,
    pub timeout_secs: Option<u64>,
    pub go_binary: Option<String>,
    pub git_binary: Option<String>,
}

impl Default for UpdaterSection {
    fn default() -> Self {
        Self {
            bypass_module_proxy: default_bypass(),
            timeout_secs: None,
            go_binary: None,
            git_binary: None,
        }
    }
}

fn default_bypass() -> bool {
    true
}

impl Config {
    /// Read `path`, or `modpin.toml` if present, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None if Path::new(CONFIG_FILE).is_file() => Path::new(CONFIG_FILE),
            None => return Ok(Self::default()),
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Append credentials described by environment variables.
    #[must_use]
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(token) = non_empty("GITHUB_ACCESS_TOKEN") {
            self.credentials.push(Credential::GitSource {
                host: DEFAULT_GIT_HOST.to_string(),
                username: Some(TOKEN_USERNAME.to_string()),
                password: Some(token),
            });
        }

        let user = non_empty("DOCKER_USER");
        let pass = non_empty("DOCKER_PASS");
        if user.is_some() || pass.is_some() {
            self.credentials.push(Credential::DockerRegistry {
                registry: non_empty("DOCKER_REGISTRY")
                    .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
                username: user,
                password: pass,
            });
        }
        self
    }

    #[must_use]
    pub fn updater_config(&self) -> UpdaterConfig {
        let defaults = UpdaterConfig::default();
        UpdaterConfig {
            bypass_module_proxy: self.updater.bypass_module_proxy,
            command_timeout: self.updater.timeout_secs.map(Duration::from_secs),
            go_binary: self
                .updater
                .go_binary
                .clone()
                .unwrap_or(defaults.go_binary),
        }
    }

    #[must_use]
    pub fn git_binary(&self) -> &str {
        self.updater.git_binary.as_deref().unwrap_or("git")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        let updater = config.updater_config();
        assert!(updater.bypass_module_proxy);
        assert_eq!(updater.command_timeout, None);
        assert_eq!(updater.go_binary, "go");
        assert_eq!(config.git_binary(), "git");
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn parses_updater_and_credentials() {
        let config = Config::parse(
            r#"
            [updater]
            bypass-module-proxy = false
            timeout-secs = 300
            go-binary = "/usr/local/go/bin/go"

            [[credentials]]
            type = "git_source"
            username = "bot"
            password = "secret"

            [[credentials]]
            type = "docker_registry"
            registry = "docker.example.com"
            username = "ci"
            password = "hunter2"
            "#,
        )
        .unwrap();

        let updater = config.updater_config();
        assert!(!updater.bypass_module_proxy);
        assert_eq!(updater.command_timeout, Some(Duration::from_secs(300)));
        assert_eq!(updater.go_binary, "/usr/local/go/bin/go");
        assert_eq!(
            config.credentials[0],
            Credential::GitSource {
                host: "github.com".to_string(),
                username: Some("bot".to_string()),
                password: Some("secret".to_string()),
            }
        );
        assert!(matches!(
            &config.credentials[1],
            Credential::DockerRegistry { registry, .. } if registry == "docker.example.com"
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[updater]\nproxy = true\n").is_err());
    }

    #[test]
    fn environment_adds_credentials() {
        let config = Config::default().with_env(env(&[
            ("GITHUB_ACCESS_TOKEN", "ghp_token"),
            ("DOCKER_USER", "ci"),
            ("DOCKER_PASS", "pw"),
        ]));

        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].username(), Some("modpin"));
        assert_eq!(config.credentials[0].password(), Some("ghp_token"));
        assert!(matches!(
            &config.credentials[1],
            Credential::DockerRegistry { registry, .. } if registry == DEFAULT_REGISTRY
        ));
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let config = Config::default().with_env(env(&[("GITHUB_ACCESS_TOKEN", "")]));
        assert!(config.credentials.is_empty());
    }
}
