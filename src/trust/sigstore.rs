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

//! Production trust-root provider backed by the sigstore public-good
//! instance.
//!
//! The provider carries a pinned copy of the `trusted_root.json` target
//! and lazily refreshes it from the sigstore TUF repository CDN. A fresh
//! download is cached on disk; when the remote is unreachable the provider
//! falls back to the cache and finally to the pinned copy, so
//! `snapshot()` only fails when even the pinned material does not parse.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{TrustRoot, TrustRootError, TrustRootProvider};

/// The `trusted_root.json` target on the sigstore TUF repository CDN.
pub const TRUSTED_ROOT_TARGET_URL: &str =
    "https://tuf-repo-cdn.sigstore.dev/targets/trusted_root.json";

/// Cache file name inside the provider's cache directory.
const CACHE_FILE: &str = "trusted_root.json";

/// Pinned copy of the trusted root, updated with releases.
pub(crate) const EMBEDDED_TRUSTED_ROOT: &str = include_str!("../../data/trusted_root.json");

/// [`TrustRootProvider`] for the sigstore public-good instance.
pub struct SigstoreTrustRoot {
    cache_dir: Option<PathBuf>,
    remote_url: String,
    max_cache_age: Duration,
    http_timeout: Duration,
    snapshot: Mutex<Option<Arc<TrustRoot>>>,
}

impl SigstoreTrustRoot {
    /// Creates a provider. With a cache directory, refreshed roots are
    /// persisted across runs; without one, every process starts from the
    /// pinned copy.
    pub fn new(cache_dir: Option<&Path>) -> Self {
        Self {
            cache_dir: cache_dir.map(Path::to_path_buf),
            remote_url: TRUSTED_ROOT_TARGET_URL.to_owned(),
            max_cache_age: Duration::from_secs(24 * 60 * 60),
            http_timeout: Duration::from_secs(30),
            snapshot: Mutex::new(None),
        }
    }

    /// Overrides the remote target URL (mirrors, test servers).
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self
    }

    fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(CACHE_FILE))
    }

    async fn read_cache(&self, ignore_age: bool) -> Option<Vec<u8>> {
        let path = self.cache_path()?;
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        if !ignore_age {
            let age = metadata.modified().ok()?.elapsed().ok()?;
            if age > self.max_cache_age {
                debug!(path = %path.display(), "trusted root cache is stale");
                return None;
            }
        }
        tokio::fs::read(&path).await.ok()
    }

    async fn write_cache(&self, bytes: &[u8]) {
        let Some(path) = self.cache_path() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(err) = tokio::fs::write(&path, bytes).await {
            warn!(path = %path.display(), %err, "failed to cache trusted root");
        }
    }

    async fn fetch_remote(&self) -> Result<Vec<u8>, TrustRootError> {
        let client = reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| TrustRootError::Unavailable(e.to_string()))?;
        let resp = client
            .get(&self.remote_url)
            .send()
            .await
            .map_err(|e| TrustRootError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TrustRootError::Unavailable(format!(
                "unexpected status {} fetching trusted root",
                resp.status()
            )));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| TrustRootError::Unavailable(e.to_string()))?
            .to_vec())
    }

    async fn load(&self) -> Result<TrustRoot, TrustRootError> {
        // Fresh cache first: it is the last successfully validated
        // download.
        if let Some(bytes) = self.read_cache(false).await {
            match TrustRoot::from_trusted_root_json(&bytes) {
                Ok(root) => {
                    debug!("using cached trusted root");
                    return Ok(root);
                }
                Err(err) => warn!(%err, "cached trusted root does not parse, refreshing"),
            }
        }

        match self.fetch_remote().await {
            Ok(bytes) => match TrustRoot::from_trusted_root_json(&bytes) {
                Ok(root) => {
                    self.write_cache(&bytes).await;
                    debug!("refreshed trusted root from remote");
                    return Ok(root);
                }
                Err(err) => warn!(%err, "remote trusted root does not parse"),
            },
            Err(err) => warn!(%err, "trusted root refresh failed"),
        }

        // Stale cache beats the pinned copy: it is never older than the
        // release that shipped the pin.
        if let Some(bytes) = self.read_cache(true).await {
            if let Ok(root) = TrustRoot::from_trusted_root_json(&bytes) {
                debug!("using stale cached trusted root");
                return Ok(root);
            }
        }

        debug!("using pinned trusted root");
        TrustRoot::from_trusted_root_json(EMBEDDED_TRUSTED_ROOT.as_bytes())
    }
}

#[async_trait]
impl TrustRootProvider for SigstoreTrustRoot {
    async fn snapshot(&self) -> Result<Arc<TrustRoot>, TrustRootError> {
        let mut cached = self.snapshot.lock().await;
        if let Some(snapshot) = cached.as_ref() {
            return Ok(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(self.load().await?);
        *cached = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}
