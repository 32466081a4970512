//! Docker Registry v2 tag listing client

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use url::Url;

use crate::registry::{RegistryError, TagSource};
use crate::storage::settings::SettingsProvider;

const DOCKER_HUB_HOSTS: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];
const DOCKER_HUB_API: &str = "https://registry-1.docker.io";

/// Registry client options
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Tags requested per page
    pub page_size: usize,

    /// Pagination stops after this many pages
    pub max_pages: usize,

    pub timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 20,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RegistryOptions {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            page_size: settings.get_int("registry.page_size", defaults.page_size as i64).max(1) as usize,
            max_pages: settings.get_int("registry.max_pages", defaults.max_pages as i64).max(1) as usize,
            timeout: Duration::from_secs(
                settings
                    .get_int("registry.timeout_seconds", defaults.timeout.as_secs() as i64)
                    .max(1) as u64,
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
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

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// HTTP client for the Docker Registry v2 `tags/list` endpoint.
///
/// Anonymous bearer tokens are requested on a 401 challenge and reused per
/// repository.
pub struct RegistryClient {
    client: Client,
    options: RegistryOptions,
    tokens: RwLock<HashMap<String, String>>,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(options: RegistryOptions) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("fleetkeeper/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            options,
            tokens: RwLock::new(HashMap::new()),
        })
    }

    async fn fetch_page(
        &self,
        url: &Url,
        token_key: &str,
    ) -> Result<reqwest::Response, RegistryError> {
        let mut retried_auth = false;
        loop {
            let mut request = self.client.get(url.clone());
            if let Some(token) = self.tokens.read().await.get(token_key) {
                request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }

            debug!("GET {}", url);
            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried_auth {
                let challenge = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_bearer_challenge)
                    .ok_or_else(|| RegistryError::Auth(format!("{} requires unsupported auth", url)))?;

                let token = self.fetch_token(&challenge).await?;
                self.tokens.write().await.insert(token_key.to_string(), token);
                retried_auth = true;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Registry GET {} failed: {} - {}", url, status, body);
                return Err(RegistryError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(response);
        }
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, RegistryError> {
        let mut url = Url::parse(&challenge.realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        debug!("Requesting registry token from {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }

        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Auth("token endpoint returned no token".to_string()))
    }
}

#[async_trait]
impl TagSource for RegistryClient {
    async fn list_tags(&self, registry: &str, image: &str) -> Result<Vec<String>, RegistryError> {
        let base = registry_base_url(registry)?;
        let repository = repository_path(registry, image);
        let token_key = format!("{}/{}", base, repository);

        let mut url = base.join(&format!("v2/{}/tags/list", repository))?;
        url.query_pairs_mut()
            .append_pair("n", &self.options.page_size.to_string());

        let mut tags = Vec::new();
        for page in 0..self.options.max_pages {
            let response = self.fetch_page(&url, &token_key).await?;
            let next = response
                .headers()
                .get(header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link);

            let body: TagListResponse = response.json().await?;
            tags.extend(body.tags.unwrap_or_default());

            match next {
                Some(link) => {
                    url = url.join(&link)?;
                    if page + 1 == self.options.max_pages {
                        warn!(
                            registry,
                            image, "Stopping tag pagination after {} pages", self.options.max_pages
                        );
                    }
                }
                None => break,
            }
        }

        debug!(registry, image, count = tags.len(), "Fetched tags");
        Ok(tags)
    }
}

/// API base URL for a registry host
pub fn registry_base_url(registry: &str) -> Result<Url, RegistryError> {
    let registry = registry.trim().trim_end_matches('/');
    let raw = if registry.is_empty() || DOCKER_HUB_HOSTS.contains(&registry) {
        DOCKER_HUB_API.to_string()
    } else if registry.starts_with("http://") || registry.starts_with("https://") {
        registry.to_string()
    } else {
        format!("https://{}", registry)
    };
    Ok(Url::parse(&format!("{}/", raw))?)
}

/// Repository path, with Docker Hub's implicit `library/` namespace
pub fn repository_path(registry: &str, image: &str) -> String {
    let image = image.trim_matches('/');
    let registry = registry.trim().trim_end_matches('/');
    let is_hub = registry.is_empty() || DOCKER_HUB_HOSTS.contains(&registry);
    if is_hub && !image.contains('/') {
        format!("library/{}", image)
    } else {
        image.to_string()
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."`
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut values = HashMap::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let (key, after_key) = rest.split_once('=')?;
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after_key.find(',') {
                Some(end) => (&after_key[..end], &after_key[end..]),
                None => (after_key, ""),
            }
        };

        values.insert(key, value.to_string());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    Some(BearerChallenge {
        realm: values.remove("realm")?,
        service: values.remove("service"),
        scope: values.remove("scope"),
    })
}

/// Target of the `rel="next"` entry of a `Link` header
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "").eq_ignore_ascii_case("rel=\"next\""));
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}
