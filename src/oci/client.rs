// Copyright 2025 The Dragonglass Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Registry client over the OCI distribution HTTP API.
//!
//! One client serves both the verification and the extraction paths. All
//! fetched content is digest-verified before it is handed to a caller, so
//! a registry can never substitute bytes for a resolved descriptor.
//!
//! Credentials come from an injected [`CredentialProvider`]; the client
//! exchanges them for repository-scoped bearer tokens at the registry's
//! token service and caches the tokens per repository. Tokens are never
//! logged and never appear in error text.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{Descriptor, Digest, Manifest, Reference, Selector, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE};

/// Failure of a registry operation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("authentication required for {0}")]
    AuthRequired(String),

    #[error("network error")]
    Network(#[source] reqwest::Error),

    #[error("request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("digest mismatch for {context}: expected {expected}, computed {computed}")]
    DigestMismatch {
        context: String,
        expected: Digest,
        computed: Digest,
    },

    #[error("malformed manifest")]
    MalformedManifest(#[source] serde_json::Error),

    #[error("unexpected registry response: status {status} for {context}")]
    UnexpectedStatus { status: u16, context: String },
}

impl RegistryError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistryError::Timeout(err)
        } else {
            RegistryError::Network(err)
        }
    }
}

/// Registry operations consumed by the verification pipeline.
///
/// Implementations must be safe to call concurrently from multiple tasks.
/// Test doubles substitute at this boundary.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Follows the reference's selector to a concrete manifest descriptor.
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, RegistryError>;

    /// Fetches and parses a manifest, verifying the blob's computed digest
    /// against the descriptor.
    async fn fetch_manifest(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Manifest, RegistryError>;

    /// Fetches a blob, verifying its computed digest against the descriptor.
    async fn fetch_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError>;

    /// Enumerates manifests whose `subject` equals the given descriptor,
    /// filtered by artifact type. Pagination is followed internally.
    async fn list_referrers(
        &self,
        reference: &Reference,
        subject: &Descriptor,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, RegistryError>;
}

/// Registry credentials as supplied by a [`CredentialProvider`].
#[derive(Clone)]
pub enum Credential {
    /// An opaque token presented as the password of a basic exchange
    /// (the GitHub Container Registry convention).
    Token(String),

    /// Username and password for the token-service exchange.
    Basic { username: String, password: String },
}

/// Supplies credentials for a registry host.
///
/// The auth collaborator (device flow, keychain) lives outside the core;
/// this is its only contract with the client.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, registry: &str) -> Option<Credential>;
}

/// Provider that never supplies credentials.
pub struct AnonymousCredentials;

impl CredentialProvider for AnonymousCredentials {
    fn credentials(&self, _registry: &str) -> Option<Credential> {
        None
    }
}

/// Provider handing the same opaque token to every registry.
pub struct StaticTokenCredentials {
    token: String,
}

impl StaticTokenCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticTokenCredentials {
    fn credentials(&self, _registry: &str) -> Option<Credential> {
        Some(Credential::Token(self.token.clone()))
    }
}

/// Client configuration. The defaults implement the recommended 30 s
/// per-request timeout and capped exponential backoff.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// [`RegistryClient`] over HTTPS.
pub struct HttpRegistryClient {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    config: ClientConfig,
    // Bearer tokens cached per `registry/repository`.
    tokens: tokio::sync::Mutex<HashMap<String, String>>,
}

impl HttpRegistryClient {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self, RegistryError> {
        Self::with_config(credentials, ClientConfig::default())
    }

    pub fn with_config(
        credentials: Arc<dyn CredentialProvider>,
        config: ClientConfig,
    ) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RegistryError::Network)?;
        Ok(Self {
            http,
            credentials,
            config,
            tokens: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    fn manifest_accept() -> header::HeaderValue {
        header::HeaderValue::from_static(
            "application/vnd.oci.image.manifest.v1+json, \
             application/vnd.oci.image.index.v1+json",
        )
    }

    /// GET with capped exponential backoff. Only transport-level failures
    /// are retried; HTTP error statuses and all integrity failures are
    /// deterministic and returned as-is.
    async fn get_with_retry(
        &self,
        url: &str,
        accept: Option<header::HeaderValue>,
        bearer: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut attempt = 0;
        let mut delay = self.config.backoff_base;
        loop {
            let mut req = self.http.get(url);
            if let Some(accept) = &accept {
                req = req.header(header::ACCEPT, accept);
            }
            if let Some(token) = bearer {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                Ok(resp) => return Ok(resp),
                Err(err) if attempt + 1 < self.config.max_attempts && is_transient(&err) => {
                    debug!(url, attempt, "transient registry failure, backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(RegistryError::from_reqwest(err)),
            }
        }
    }

    /// Obtains (and caches) a pull-scoped bearer token for the repository,
    /// following the `Www-Authenticate` challenge of the `/v2/` endpoint.
    async fn bearer_token(&self, reference: &Reference) -> Result<Option<String>, RegistryError> {
        let cache_key = format!("{}/{}", reference.registry(), reference.repository());
        {
            let tokens = self.tokens.lock().await;
            if let Some(token) = tokens.get(&cache_key) {
                return Ok(Some(token.clone()));
            }
        }

        let probe_url = format!("https://{}/v2/", reference.registry());
        let probe = self.get_with_retry(&probe_url, None, None).await?;
        if probe.status() != StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let challenge = probe
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge)
            .ok_or_else(|| RegistryError::AuthRequired(reference.registry().to_owned()))?;

        let mut token_url = url::Url::parse(&challenge.realm)
            .map_err(|_| RegistryError::AuthRequired(reference.registry().to_owned()))?;
        {
            let mut query = token_url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            query.append_pair(
                "scope",
                &format!("repository:{}:pull", reference.repository()),
            );
        }

        let mut req = self.http.get(token_url);
        match self.credentials.credentials(reference.registry()) {
            Some(Credential::Token(token)) => {
                // GHCR accepts the opaque token as the password of a basic
                // exchange with any username.
                let value = base64.encode(format!("token:{token}"));
                req = req.header(header::AUTHORIZATION, format!("Basic {value}"));
            }
            Some(Credential::Basic { username, password }) => {
                let value = base64.encode(format!("{username}:{password}"));
                req = req.header(header::AUTHORIZATION, format!("Basic {value}"));
            }
            None => {}
        }

        let resp = req.send().await.map_err(RegistryError::from_reqwest)?;
        if !resp.status().is_success() {
            return Err(RegistryError::AuthRequired(reference.registry().to_owned()));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }
        let body: TokenResponse = resp.json().await.map_err(RegistryError::from_reqwest)?;
        let token = body
            .token
            .or(body.access_token)
            .ok_or_else(|| RegistryError::AuthRequired(reference.registry().to_owned()))?;

        self.tokens.lock().await.insert(cache_key, token.clone());
        Ok(Some(token))
    }

    async fn fetch_manifest_bytes(
        &self,
        reference: &Reference,
        selector: &str,
    ) -> Result<(Vec<u8>, Option<String>), RegistryError> {
        let token = self.bearer_token(reference).await?;
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            reference.registry(),
            reference.repository(),
            selector
        );
        let resp = self
            .get_with_retry(&url, Some(Self::manifest_accept()), token.as_deref())
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Err(RegistryError::RefNotFound(reference.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RegistryError::AuthRequired(reference.registry().to_owned()))
            }
            status if !status.is_success() => {
                return Err(RegistryError::UnexpectedStatus {
                    status: status.as_u16(),
                    context: reference.to_string(),
                })
            }
            _ => {}
        }
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await.map_err(RegistryError::from_reqwest)?;
        Ok((bytes.to_vec(), content_type))
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

/// Parses a `Www-Authenticate: Bearer realm="…",service="…"` challenge.
fn parse_bearer_challenge(value: &str) -> Option<BearerChallenge> {
    let rest = value.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for part in rest.split(',') {
        let (key, val) = part.trim().split_once('=')?;
        let val = val.trim_matches('"');
        match key {
            "realm" => realm = Some(val.to_owned()),
            "service" => service = Some(val.to_owned()),
            _ => {}
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

/// The referrers API response is an image index.
#[derive(Deserialize)]
struct ReferrersIndex {
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, RegistryError> {
        let selector = match reference.selector() {
            Selector::Tag(tag) => tag.clone(),
            Selector::Digest(d) => d.to_string(),
        };
        let (bytes, content_type) = self.fetch_manifest_bytes(reference, &selector).await?;

        let computed = Digest::sha256_of(&bytes);
        if let Selector::Digest(expected) = reference.selector() {
            if *expected != computed {
                return Err(RegistryError::DigestMismatch {
                    context: reference.to_string(),
                    expected: expected.clone(),
                    computed,
                });
            }
        }

        // Prefer the media type the manifest declares for itself; the
        // Content-Type header is a fallback for registries that strip it.
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ManifestHead {
            media_type: Option<String>,
            artifact_type: Option<String>,
        }
        let head: ManifestHead =
            serde_json::from_slice(&bytes).map_err(RegistryError::MalformedManifest)?;

        debug!(image = %reference, digest = %computed, "resolved reference");
        Ok(Descriptor {
            media_type: head
                .media_type
                .or(content_type)
                .unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_owned()),
            digest: computed,
            size: bytes.len() as u64,
            artifact_type: head.artifact_type,
            annotations: BTreeMap::new(),
        })
    }

    async fn fetch_manifest(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Manifest, RegistryError> {
        let (bytes, _) = self
            .fetch_manifest_bytes(reference, &descriptor.digest.to_string())
            .await?;
        let computed = Digest::sha256_of(&bytes);
        if computed != descriptor.digest {
            return Err(RegistryError::DigestMismatch {
                context: format!("manifest {}", descriptor.digest),
                expected: descriptor.digest.clone(),
                computed,
            });
        }
        serde_json::from_slice(&bytes).map_err(RegistryError::MalformedManifest)
    }

    async fn fetch_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        let token = self.bearer_token(reference).await?;
        let url = format!(
            "https://{}/v2/{}/blobs/{}",
            reference.registry(),
            reference.repository(),
            descriptor.digest
        );
        let resp = self.get_with_retry(&url, None, token.as_deref()).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::RefNotFound(descriptor.digest.to_string()))
            }
            status if !status.is_success() => {
                return Err(RegistryError::UnexpectedStatus {
                    status: status.as_u16(),
                    context: format!("blob {}", descriptor.digest),
                })
            }
            _ => {}
        }
        let bytes = resp.bytes().await.map_err(RegistryError::from_reqwest)?;

        let computed = Digest::sha256_of(&bytes);
        if computed != descriptor.digest {
            return Err(RegistryError::DigestMismatch {
                context: format!("blob {}", descriptor.digest),
                expected: descriptor.digest.clone(),
                computed,
            });
        }
        Ok(bytes.to_vec())
    }

    async fn list_referrers(
        &self,
        reference: &Reference,
        subject: &Descriptor,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, RegistryError> {
        let token = self.bearer_token(reference).await?;
        let mut url = format!(
            "https://{}/v2/{}/referrers/{}",
            reference.registry(),
            reference.repository(),
            subject.digest
        );
        if let Some(artifact_type) = artifact_type {
            url.push_str("?artifactType=");
            url.push_str(artifact_type);
        }

        let mut referrers = Vec::new();
        loop {
            let accept = header::HeaderValue::from_static(OCI_IMAGE_INDEX_MEDIA_TYPE);
            let resp = self
                .get_with_retry(&url, Some(accept), token.as_deref())
                .await?;
            match resp.status() {
                // A registry without referrers support has no attestations
                // to offer through this API.
                StatusCode::NOT_FOUND => return Ok(Vec::new()),
                status if !status.is_success() => {
                    return Err(RegistryError::UnexpectedStatus {
                        status: status.as_u16(),
                        context: format!("referrers of {}", subject.digest),
                    })
                }
                _ => {}
            }

            let next = next_link(resp.headers(), reference.registry());
            let index: ReferrersIndex =
                resp.json().await.map_err(RegistryError::from_reqwest)?;

            // Registries may ignore the artifactType filter; apply it here
            // as well.
            referrers.extend(index.manifests.into_iter().filter(|d| {
                artifact_type.is_none() || d.artifact_type.as_deref() == artifact_type
            }));

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        debug!(subject = %subject.digest, count = referrers.len(), "listed referrers");
        Ok(referrers)
    }
}

/// Extracts the `Link: <…>; rel="next"` pagination target, resolving
/// registry-relative URLs.
fn next_link(headers: &header::HeaderMap, registry: &str) -> Option<String> {
    let value = headers.get(header::LINK)?.to_str().ok()?;
    let (target, params) = value.split_once(';')?;
    if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
        return None;
    }
    let target = target.trim().trim_start_matches('<').trim_end_matches('>');
    if target.starts_with("https://") || target.starts_with("http://") {
        Some(target.to_owned())
    } else {
        Some(format!("https://{}{}", registry, target))
    }
}
