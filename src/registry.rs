use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credentials::{self, Environment, ProcessEnv};
use crate::error::{Error, Result};
use crate::reference::{ImageReference, Platform};

pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

const QUAY_IDENTITY: &str = "QUAY_IO";
const GHCR_IDENTITY: &str = "GHCR_IO";

/// Per-registry deviations from the generic token flow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RegistryQuirks {
    /// Token endpoint is `/v2/auth?service=<host>&scope=...` instead of `/token?scope=...`.
    quay_token_endpoint: bool,
    /// A failed token exchange may be rescued by `GITHUB_TOKEN`.
    github_token_fallback: bool,
}

impl RegistryQuirks {
    fn for_identity(identity: &str) -> Self {
        match identity {
            QUAY_IDENTITY => Self {
                quay_token_endpoint: true,
                ..Self::default()
            },
            GHCR_IDENTITY => Self {
                github_token_fallback: true,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestList {
    #[serde(default)]
    pub manifests: Vec<ManifestEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub platform: ManifestPlatform,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestPlatform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
}

impl ManifestList {
    /// True when every requested platform is declared by some manifest.
    pub fn covers(&self, platforms: &[Platform]) -> bool {
        platforms.iter().all(|wanted| {
            self.manifests
                .iter()
                .any(|m| wanted.matches(&m.platform.os, &m.platform.architecture))
        })
    }
}

/// Checks tags of a single repository. Holds no mutable state, so one
/// client can serve concurrent checks.
pub struct RegistryClient {
    client: Client,
    scheme: &'static str,
    identity: String,
    registry_host: String,
    image_path: String,
    platforms: Vec<Platform>,
    env: Box<dyn Environment>,
}

impl RegistryClient {
    pub fn new(reference: &ImageReference, config: &Config) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            scheme: config.scheme(),
            identity: reference.registry_identity(),
            registry_host: reference.registry_host.clone(),
            image_path: reference.image_path.clone(),
            platforms: Vec::new(),
            env: Box::new(ProcessEnv),
        })
    }

    /// Require the tag to carry all of these platforms. Empty means any.
    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_environment(mut self, env: impl Environment + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn quirks(&self) -> RegistryQuirks {
        RegistryQuirks::for_identity(&self.identity)
    }

    fn manifest_url(&self, tag: &str) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme, self.registry_host, self.image_path, tag
        )
    }

    fn token_url(&self) -> String {
        if self.quirks().quay_token_endpoint {
            format!(
                "{}://{}/v2/auth?service={}&scope=repository:{}:pull",
                self.scheme, self.registry_host, self.registry_host, self.image_path
            )
        } else {
            format!(
                "{}://{}/token?scope=repository:{}:pull",
                self.scheme, self.registry_host, self.image_path
            )
        }
    }

    /// Reports whether `tag` exists (for every configured platform).
    ///
    /// The lookup is first tried anonymously. Any failure there, transport
    /// errors included, leads to a second lookup with a bearer token.
    pub async fn tag_exists(&self, tag: &str) -> Result<bool> {
        match self.check_manifest(None, tag).await {
            Ok(found) => {
                debug!("Anonymous lookup of {}:{} succeeded", self.image_path, tag);
                return Ok(found);
            }
            Err(e @ Error::Transport(_)) => {
                warn!(
                    "Anonymous lookup of {}:{} failed, retrying with credentials: {}",
                    self.image_path, tag, e
                );
            }
            Err(e) => {
                debug!(
                    "Anonymous lookup of {}:{} failed, retrying with credentials: {}",
                    self.image_path, tag, e
                );
            }
        }

        let bearer = self.bearer_token().await?;
        self.check_manifest(Some(&bearer), tag).await
    }

    async fn check_manifest(&self, bearer: Option<&str>, tag: &str) -> Result<bool> {
        let url = self.manifest_url(tag);

        // HEAD avoids downloading the body when no platform has to be inspected.
        let request = if self.platforms.is_empty() {
            self.client.head(&url)
        } else {
            self.client.get(&url)
        };
        let mut request = request.header(
            ACCEPT,
            format!("{}, {}", OCI_IMAGE_INDEX, DOCKER_MANIFEST_LIST),
        );
        if let Some(bearer) = bearer {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::OK if self.platforms.is_empty() => Ok(true),
            StatusCode::OK => {
                let body = response.bytes().await?;
                let list: ManifestList = serde_json::from_slice(&body)
                    .map_err(|source| Error::MalformedBody { url, source })?;
                Ok(list.covers(&self.platforms))
            }
            status => Err(Error::UnexpectedStatus { url, status }),
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = credentials::bearer_token(self.env.as_ref(), &self.identity) {
            debug!("Using {}_TOKEN as bearer token", self.identity);
            return Ok(token);
        }

        match self.exchange_token().await {
            Ok(token) => Ok(token),
            Err(e) if self.quirks().github_token_fallback => {
                match credentials::github_bearer_token(self.env.as_ref()) {
                    Some(token) => {
                        info!(
                            "Token exchange with {} failed ({}), using {}",
                            self.registry_host,
                            e,
                            credentials::GITHUB_TOKEN_VAR
                        );
                        Ok(token)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange_token(&self) -> Result<String> {
        let auth = credentials::auth_token(self.env.as_ref(), &self.identity)?;
        self.fetch_bearer_token(&auth).await
    }

    /// Trades a Basic credential for a bearer token scoped to pulling this repository.
    async fn fetch_bearer_token(&self, auth: &str) -> Result<String> {
        let url = self.token_url();
        debug!("Requesting bearer token from {}", url);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Basic {}", auth))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::AuthenticationFailed {
                registry: self.identity.clone(),
                reason: format!("token endpoint returned {}", status),
            });
        }

        let body = response.bytes().await?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|source| Error::MalformedBody { url, source })?;

        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::AuthenticationFailed {
                registry: self.identity.clone(),
                reason: "token endpoint returned no token".to_string(),
            })
    }
}
