//! Container registry lookups: which tag carries a given manifest digest.
//!
//! The lookup is abstracted behind [`TagResolver`]; [`HttpRegistryClient`]
//! speaks the Docker Registry HTTP API v2.

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, LINK, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::credentials::{Credential, CredentialsFinder};
use crate::error::UpdateError;

/// The public default registry.
pub const DEFAULT_REGISTRY: &str = "registry.hub.docker.com";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Errors from talking to a registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Credentials were missing or rejected.
    #[error("authentication failed for registry {registry}")]
    Authentication { registry: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse registry response: {0}")]
    Json(String),
}

/// Lists tags and reads manifest digests for a repository.
pub trait TagResolver {
    /// All tags of `repo`.
    fn tags(&self, repo: &str) -> Result<Vec<String>, RegistryError>;

    /// The manifest digest `tag` currently points at.
    fn digest(&self, repo: &str, tag: &str) -> Result<String, RegistryError>;
}

/// Whether `registry` is the public default.
#[must_use]
pub fn is_standard_registry(registry: Option<&str>) -> bool {
    registry.map_or(true, |r| r == DEFAULT_REGISTRY)
}

/// Official images on the default registry live under `library/`.
#[must_use]
pub fn docker_repo_name(image: &str, registry: Option<&str>) -> String {
    if is_standard_registry(registry) && !image.contains('/') {
        format!("library/{image}")
    } else {
        image.to_string()
    }
}

/// Find the tag of `image` whose manifest digest equals `digest`.
///
/// Returns `Ok(None)` when `digest` is `None` or no tag matches. An
/// authentication failure against a non-default registry becomes
/// [`UpdateError::PrivateSourceAuthenticationFailure`]; against the default
/// registry the underlying error is passed through unchanged.
pub fn resolve_version_by_digest<R: TagResolver + ?Sized>(
    resolver: &R,
    registry: Option<&str>,
    image: &str,
    digest: Option<&str>,
) -> Result<Option<String>, UpdateError> {
    let Some(digest) = digest else {
        return Ok(None);
    };
    let repo = docker_repo_name(image, registry);

    match find_tag(resolver, &repo, digest) {
        Ok(tag) => Ok(tag),
        Err(e @ RegistryError::Authentication { .. }) => match registry {
            Some(private) if !is_standard_registry(registry) => {
                tracing::warn!(registry = private, "private registry rejected credentials");
                Err(UpdateError::PrivateSourceAuthenticationFailure(
                    private.to_string(),
                ))
            }
            _ => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

fn find_tag<R: TagResolver + ?Sized>(
    resolver: &R,
    repo: &str,
    digest: &str,
) -> Result<Option<String>, RegistryError> {
    for tag in resolver.tags(repo)? {
        match resolver.digest(repo, &tag) {
            Ok(d) if d == digest => return Ok(Some(tag)),
            Ok(_) => {}
            // Some listed tags have no manifest; skip them.
            Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Docker Registry HTTP API v2 client.
pub struct HttpRegistryClient {
    registry: String,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    http: Client,
    tokens: Mutex<HashMap<String, String>>,
}

impl HttpRegistryClient {
    /// A client for `registry` (the default registry when `None`), using the
    /// matching `docker_registry` credential if one exists.
    pub fn new(registry: Option<&str>, credentials: &[Credential]) -> Result<Self, RegistryError> {
        let registry = registry.unwrap_or(DEFAULT_REGISTRY).to_string();
        let cred = CredentialsFinder::new(credentials).for_registry(&registry);
        let http = Client::builder()
            .user_agent(format!("modpin/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        Ok(Self {
            base_url: format!("https://{registry}"),
            username: cred.and_then(|c| c.username()).map(String::from),
            password: cred.and_then(|c| c.password()).map(String::from),
            registry,
            http,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Point the client at a different base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn authorize(&self, req: RequestBuilder, repo: &str) -> RequestBuilder {
        let token = self
            .tokens
            .lock()
            .ok()
            .and_then(|t| t.get(repo).cloned());
        match (token, &self.username) {
            (Some(token), _) => req.bearer_auth(token),
            (None, Some(user)) => req.basic_auth(user, self.password.as_deref()),
            (None, None) => req,
        }
    }

    /// Send a request, negotiating a bearer token once on 401.
    fn send(
        &self,
        build: impl Fn() -> RequestBuilder,
        repo: &str,
    ) -> Result<Response, RegistryError> {
        let response = self
            .authorize(build(), repo)
            .send()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return self.check(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge);
        let Some(challenge) = challenge else {
            return self.check(response);
        };

        let token = self.fetch_token(&challenge)?;
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(repo.to_string(), token.clone());
        }
        let retry = build()
            .bearer_auth(token)
            .send()
            .map_err(|e| RegistryError::Network(e.to_string()))?;
        self.check(retry)
    }

    fn fetch_token(&self, challenge: &HashMap<String, String>) -> Result<String, RegistryError> {
        let realm = challenge
            .get("realm")
            .ok_or_else(|| RegistryError::Network("bearer challenge without realm".into()))?;
        let query: Vec<(&str, &str)> = ["service", "scope"]
            .into_iter()
            .filter_map(|k| challenge.get(k).map(|v| (k, v.as_str())))
            .collect();

        let mut req = self.http.get(realm).query(&query);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }
        let response = self.check(
            req.send()
                .map_err(|e| RegistryError::Network(e.to_string()))?,
        )?;
        let body: TokenResponse = response
            .json()
            .map_err(|e| RegistryError::Json(e.to_string()))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| RegistryError::Json("token response without token".into()))
    }

    fn check(&self, response: Response) -> Result<Response, RegistryError> {
        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RegistryError::Authentication {
                    registry: self.registry.clone(),
                })
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(response.url().to_string())),
            s => Err(RegistryError::Network(format!(
                "registry returned status {s} for {}",
                response.url()
            ))),
        }
    }
}

impl TagResolver for HttpRegistryClient {
    fn tags(&self, repo: &str) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        let mut url = format!("{}/v2/{repo}/tags/list", self.base_url);
        loop {
            let response = self.send(|| self.http.get(&url), repo)?;
            let next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let page: TagList = response
                .json()
                .map_err(|e| RegistryError::Json(e.to_string()))?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) if next.starts_with("http") => url = next,
                Some(next) => url = format!("{}{next}", self.base_url),
                None => break,
            }
        }
        tracing::debug!(repo, count = tags.len(), "listed registry tags");
        Ok(tags)
    }

    fn digest(&self, repo: &str, tag: &str) -> Result<String, RegistryError> {
        let url = format!("{}/v2/{repo}/manifests/{tag}", self.base_url);
        let response = self.send(|| self.http.head(&url).header(ACCEPT, MANIFEST_MEDIA_TYPES), repo)?;
        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| RegistryError::NotFound(format!("{repo}:{tag} digest")))
    }
}

/// Parse `Bearer realm="..",service="..",scope=".."`.
fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    static PARAM: OnceLock<Option<Regex>> = OnceLock::new();
    let rest = header.strip_prefix("Bearer ")?;
    let re = PARAM
        .get_or_init(|| Regex::new(r#"(\w+)="([^"]*)""#).ok())
        .as_ref()?;
    let params: HashMap<String, String> = re
        .captures_iter(rest)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect();
    params.contains_key("realm").then_some(params)
}

/// The target of a `Link: <..>; rel="next"` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params.contains("rel=\"next\"").then(|| {
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}
