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

//! The per-vault lockfile: the pinned record of verified plugins.
//!
//! The lockfile is a single JSON document. Saving is atomic (write to a
//! sibling temp file, fsync, rename) with owner-only permissions, so a
//! concurrent reader observes either the previous or the next state and
//! never a partial file. Mutations are pure operations on the in-memory
//! value; every mutation bumps `updated_at`.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::attest::VerificationReport;

/// Lockfile name inside the vault's config directory.
pub const LOCKFILE_NAME: &str = "dragonglass-lock.json";

/// Current schema version.
pub const LOCKFILE_VERSION: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum LockfileError {
    #[error("lockfile corrupt: {0}")]
    Corrupt(String),

    #[error("plugin {0} not found in lockfile")]
    PluginNotFound(String),

    #[error("invalid plugin entry: {0}")]
    InvalidEntry(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The persisted lockfile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lockfile {
    pub version: String,

    pub generated_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Entries keyed by plugin id; a BTreeMap keeps serialization
    /// deterministic so load-then-save is byte-stable.
    pub plugins: BTreeMap<String, PluginEntry>,

    pub metadata: LockfileMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,

    pub version: String,

    /// The image reference with an explicit digest selector.
    pub oci_reference: String,

    /// The pinned manifest digest (`algorithm:hex`).
    pub oci_digest: String,

    pub verification_state: VerificationState,

    #[serde(default)]
    pub metadata: PluginMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationState {
    pub provenance_verified: bool,
    pub sbom_verified: bool,
    pub vuln_scan_passed: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl VerificationState {
    /// Derives the recorded state from an aggregate report. The vuln
    /// scan passes only when a verified SBOM was analyzed and came back
    /// clean.
    pub fn from_report(report: &VerificationReport) -> Self {
        let sbom = report.sbom.as_ref();
        Self {
            provenance_verified: report.slsa.as_ref().is_some_and(|s| s.valid),
            sbom_verified: sbom.is_some_and(|s| s.valid),
            vuln_scan_passed: sbom.is_some_and(|s| s.valid && s.vulnerabilities.is_empty()),
            warnings: report.warnings.clone(),
            errors: report.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl PluginMetadata {
    /// Derives metadata from standard OCI manifest annotations.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| annotations.get(key).cloned();
        Self {
            author: get("org.opencontainers.image.authors"),
            description: get("org.opencontainers.image.description"),
            homepage: get("org.opencontainers.image.url"),
            repository: get("org.opencontainers.image.source"),
            license: get("org.opencontainers.image.licenses"),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockfileMetadata {
    pub vault_path: String,
    pub dragonglass_version: String,
    pub schema_version: String,
}

/// Derives the stable plugin id: the first eight bytes of
/// `SHA-256("{name}@{reference}")`, hex-encoded.
pub fn plugin_id(name: &str, oci_reference: &str) -> String {
    let hash = Sha256::digest(format!("{name}@{oci_reference}"));
    hex::encode(&hash[..8])
}

/// The lockfile's well-known path inside a vault config directory.
pub fn path_in(vault_config_dir: &Path) -> PathBuf {
    vault_config_dir.join(LOCKFILE_NAME)
}

impl Lockfile {
    pub fn new(vault_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: LOCKFILE_VERSION.to_owned(),
            generated_at: now,
            updated_at: now,
            plugins: BTreeMap::new(),
            metadata: LockfileMetadata {
                vault_path: vault_path.into(),
                dragonglass_version: env!("CARGO_PKG_VERSION").to_owned(),
                schema_version: LOCKFILE_VERSION.to_owned(),
            },
        }
    }

    /// Loads a lockfile. An absent file yields an empty current-version
    /// lockfile; a present one must parse and validate.
    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        if !path.exists() {
            let vault_path = path
                .parent()
                .and_then(Path::parent)
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            debug!(path = %path.display(), "no lockfile, starting empty");
            return Ok(Lockfile::new(vault_path));
        }

        let data = std::fs::read(path)?;
        let lockfile: Lockfile =
            serde_json::from_slice(&data).map_err(|e| LockfileError::Corrupt(e.to_string()))?;
        lockfile.validate()?;
        Ok(lockfile)
    }

    /// Saves atomically: serialize, write to a sibling temp file, fsync,
    /// rename into place, owner-read/write permissions only.
    pub fn save(&self, path: &Path) -> Result<(), LockfileError> {
        self.validate()?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| LockfileError::Corrupt(e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            temp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        temp.persist(path).map_err(|e| LockfileError::Io(e.error))?;

        debug!(path = %path.display(), plugins = self.plugins.len(), "lockfile saved");
        Ok(())
    }

    /// Structural invariants every persisted lockfile satisfies.
    pub fn validate(&self) -> Result<(), LockfileError> {
        if self.version.is_empty() {
            return Err(LockfileError::Corrupt("version is required".into()));
        }
        for (id, plugin) in &self.plugins {
            if plugin.name.is_empty() {
                return Err(LockfileError::Corrupt(format!(
                    "plugin {id}: name is required"
                )));
            }
            if plugin.oci_reference.is_empty() {
                return Err(LockfileError::Corrupt(format!(
                    "plugin {id}: OCI reference is required"
                )));
            }
            if plugin.oci_digest.is_empty() {
                return Err(LockfileError::Corrupt(format!(
                    "plugin {id}: OCI digest is required"
                )));
            }
        }
        Ok(())
    }

    pub fn add_plugin(&mut self, id: impl Into<String>, entry: PluginEntry) -> Result<(), LockfileError> {
        let id = id.into();
        if id.is_empty() {
            return Err(LockfileError::InvalidEntry("plugin id is required"));
        }
        if entry.name.is_empty() {
            return Err(LockfileError::InvalidEntry("plugin name is required"));
        }
        if entry.oci_reference.is_empty() {
            return Err(LockfileError::InvalidEntry("OCI reference is required"));
        }
        if entry.oci_digest.is_empty() {
            return Err(LockfileError::InvalidEntry("OCI digest is required"));
        }
        self.plugins.insert(id, entry);
        self.touch();
        Ok(())
    }

    pub fn remove_plugin(&mut self, id: &str) -> Result<PluginEntry, LockfileError> {
        let entry = self
            .plugins
            .remove(id)
            .ok_or_else(|| LockfileError::PluginNotFound(id.to_owned()))?;
        self.touch();
        Ok(entry)
    }

    pub fn update_verification(
        &mut self,
        id: &str,
        state: VerificationState,
    ) -> Result<(), LockfileError> {
        let entry = self
            .plugins
            .get_mut(id)
            .ok_or_else(|| LockfileError::PluginNotFound(id.to_owned()))?;
        entry.verification_state = state;
        self.touch();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PluginEntry> {
        self.plugins.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&PluginEntry> {
        self.plugins.values().find(|p| p.name == name)
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &PluginEntry)> {
        self.plugins.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
