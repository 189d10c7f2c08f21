//! Implementation of the `modpin resolve-digest` command.

use anyhow::Result;

use modpin_core::{resolve_version_by_digest, HttpRegistryClient, TagResolver};

use crate::config::Config;

#[derive(Debug)]
pub struct DigestOptions {
    pub image: String,
    pub digest: String,
    pub registry: Option<String>,
}

/// Find the tag of `options.image` whose manifest has `options.digest`.
pub fn resolve_digest(options: &DigestOptions, config: &Config) -> Result<Option<String>> {
    let client = HttpRegistryClient::new(options.registry.as_deref(), &config.credentials)?;
    lookup(&client, options)
}

fn lookup(resolver: &dyn TagResolver, options: &DigestOptions) -> Result<Option<String>> {
    let tag = resolve_version_by_digest(
        resolver,
        options.registry.as_deref(),
        &options.image,
        Some(options.digest.as_str()),
    )?;
    match &tag {
        Some(tag) => tracing::info!(image = %options.image, %tag, "digest resolved"),
        None => tracing::info!(image = %options.image, "no tag carries digest"),
    }
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modpin_core::RegistryError;

    struct Tags(Vec<(&'static str, &'static str)>);

    impl TagResolver for Tags {
        fn tags(&self, _repo: &str) -> Result<Vec<String>, RegistryError> {
            Ok(self.0.iter().map(|(t, _)| (*t).to_string()).collect())
        }

        fn digest(&self, _repo: &str, tag: &str) -> Result<String, RegistryError> {
            self.0
                .iter()
                .find(|(t, _)| *t == tag)
                .map(|(_, d)| (*d).to_string())
                .ok_or_else(|| RegistryError::NotFound(tag.to_string()))
        }
    }

    fn options(digest: &str, registry: Option<&str>) -> DigestOptions {
        DigestOptions {
            image: "team/app".to_string(),
            digest: digest.to_string(),
            registry: registry.map(String::from),
        }
    }

    #[test]
    fn finds_matching_tag() {
        let registry = Tags(vec![("1.0", "sha256:aaa"), ("1.1", "sha256:bbb")]);
        let tag = lookup(&registry, &options("sha256:bbb", None)).unwrap();
        assert_eq!(tag.as_deref(), Some("1.1"));
    }

    #[test]
    fn unknown_digest_is_none() {
        let registry = Tags(vec![("1.0", "sha256:aaa")]);
        assert_eq!(lookup(&registry, &options("sha256:zzz", None)).unwrap(), None);
    }

    struct Denied;

    impl TagResolver for Denied {
        fn tags(&self, _repo: &str) -> Result<Vec<String>, RegistryError> {
            Err(RegistryError::Authentication {
                registry: "docker.example.com".to_string(),
            })
        }

        fn digest(&self, _repo: &str, _tag: &str) -> Result<String, RegistryError> {
            unreachable!()
        }
    }

    #[test]
    fn private_registry_auth_failure_surfaces() {
        let err = lookup(&Denied, &options("sha256:aaa", Some("docker.example.com"))).unwrap_err();
        assert!(err.to_string().contains("docker.example.com"));
    }
}
