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

//! The sigstore trust root: Fulcio certificate authorities, Rekor log
//! keys and CT log keys.
//!
//! A [`TrustRoot`] is an immutable snapshot; acquisition (with caching
//! and refresh) is the concern of a [`TrustRootProvider`], which keeps
//! the verifier pure and testable with synthetic roots.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use webpki::types::CertificateDer;

use crate::crypto::keyring::{Keyring, KeyringError};

pub mod sigstore;

#[derive(Debug, thiserror::Error)]
pub enum TrustRootError {
    #[error("trust root unavailable: {0}")]
    Unavailable(String),

    #[error("malformed trusted root document")]
    Malformed(#[source] serde_json::Error),

    #[error("malformed key material in trusted root: {0}")]
    BadKeyMaterial(String),

    #[error("trusted root has no usable Fulcio certificate authorities")]
    NoFulcioAuthorities,

    #[error("trusted root has no active keys for {log}")]
    NoActiveKeys { log: &'static str },

    #[error(transparent)]
    Keyring(#[from] KeyringError),
}

/// A validity window from the trusted root.
#[derive(Debug, Clone, Default)]
pub struct ValidityWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Given a window, checks that the current time is not before `start`.
/// If `allow_expired` is false, also checks that it is not after `end`.
fn is_timerange_valid(range: &ValidityWindow, allow_expired: bool) -> bool {
    let now = Utc::now();
    match (range.start, range.end) {
        (Some(start), _) if now < start => false,
        _ if allow_expired => true,
        (_, Some(end)) => now <= end,
        _ => true,
    }
}

/// A certificate authority entry: its chain (leaf-issuing certificate
/// first, root last) and validity window.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    pub chain: Vec<Vec<u8>>,
    pub valid_for: ValidityWindow,
}

/// A transparency/CT log key entry.
#[derive(Debug, Clone)]
pub struct LogKey {
    pub spki_der: Vec<u8>,
    pub valid_for: ValidityWindow,
}

/// Immutable snapshot of the sigstore trust material.
#[derive(Debug, Default)]
pub struct TrustRoot {
    certificate_authorities: Vec<CertificateAuthority>,
    rekor_keys: Vec<LogKey>,
    ctfe_keys: Vec<LogKey>,
}

impl TrustRoot {
    /// Builds a snapshot from caller-supplied material; the constructor
    /// used by tests and air-gapped deployments.
    pub fn manual(
        certificate_authorities: Vec<CertificateAuthority>,
        rekor_keys: Vec<LogKey>,
        ctfe_keys: Vec<LogKey>,
    ) -> Self {
        Self {
            certificate_authorities,
            rekor_keys,
            ctfe_keys,
        }
    }

    /// Parses the sigstore `trusted_root.json` target.
    pub fn from_trusted_root_json(bytes: &[u8]) -> Result<Self, TrustRootError> {
        let doc: TrustedRootDocument =
            serde_json::from_slice(bytes).map_err(TrustRootError::Malformed)?;

        let decode = |raw: &str| {
            base64
                .decode(raw)
                .map_err(|e| TrustRootError::BadKeyMaterial(e.to_string()))
        };

        let mut certificate_authorities = Vec::new();
        for ca in &doc.certificate_authorities {
            let mut chain = Vec::new();
            for cert in &ca.cert_chain.certificates {
                chain.push(decode(&cert.raw_bytes)?);
            }
            if chain.is_empty() {
                continue;
            }
            certificate_authorities.push(CertificateAuthority {
                chain,
                valid_for: ca.valid_for.clone().into(),
            });
        }

        let keys_of = |tlogs: &[TransparencyLogInstance]| -> Result<Vec<LogKey>, TrustRootError> {
            tlogs
                .iter()
                .filter_map(|t| t.public_key.as_ref())
                .map(|key| {
                    Ok(LogKey {
                        spki_der: decode(&key.raw_bytes)?,
                        valid_for: key.valid_for.clone().unwrap_or_default().into(),
                    })
                })
                .collect()
        };

        Ok(Self {
            certificate_authorities,
            rekor_keys: keys_of(&doc.tlogs)?,
            ctfe_keys: keys_of(&doc.ctlogs)?,
        })
    }

    /// Fulcio certificates usable as chain-validation anchors.
    ///
    /// Expired authorities are included: they may have been active when
    /// the certificate under verification was issued.
    pub fn fulcio_certs(&self) -> Result<Vec<CertificateDer<'static>>, TrustRootError> {
        let certs: Vec<_> = self
            .certificate_authorities
            .iter()
            .filter(|ca| is_timerange_valid(&ca.valid_for, true))
            .flat_map(|ca| ca.chain.iter())
            .map(|der| CertificateDer::from(der.clone()))
            .collect();
        if certs.is_empty() {
            return Err(TrustRootError::NoFulcioAuthorities);
        }
        Ok(certs)
    }

    /// Keyring of currently-active Rekor keys.
    pub fn rekor_keyring(&self) -> Result<Keyring, TrustRootError> {
        self.keyring_of(&self.rekor_keys, "rekor")
    }

    /// Keyring of currently-active CT log keys.
    pub fn ctfe_keyring(&self) -> Result<Keyring, TrustRootError> {
        self.keyring_of(&self.ctfe_keys, "ctfe")
    }

    fn keyring_of(&self, keys: &[LogKey], log: &'static str) -> Result<Keyring, TrustRootError> {
        let active: Vec<&[u8]> = keys
            .iter()
            .filter(|k| is_timerange_valid(&k.valid_for, false))
            .map(|k| k.spki_der.as_slice())
            .collect();
        if active.is_empty() {
            return Err(TrustRootError::NoActiveKeys { log });
        }
        Ok(Keyring::new(active)?)
    }
}

/// Produces trust-root snapshots.
#[async_trait]
pub trait TrustRootProvider: Send + Sync {
    /// Returns the most recent validated snapshot, or
    /// [`TrustRootError::Unavailable`] when none can be obtained.
    async fn snapshot(&self) -> Result<Arc<TrustRoot>, TrustRootError>;
}

/// Provider over a fixed snapshot; the test-double implementation.
pub struct ManualTrustRoot {
    snapshot: Arc<TrustRoot>,
}

impl ManualTrustRoot {
    pub fn new(root: TrustRoot) -> Self {
        Self {
            snapshot: Arc::new(root),
        }
    }
}

#[async_trait]
impl TrustRootProvider for ManualTrustRoot {
    async fn snapshot(&self) -> Result<Arc<TrustRoot>, TrustRootError> {
        Ok(Arc::clone(&self.snapshot))
    }
}

// Serde view of the trusted_root.json target (protojson rendering of the
// sigstore TrustedRoot message). Unknown fields are ignored for forward
// compatibility.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustedRootDocument {
    #[serde(default)]
    tlogs: Vec<TransparencyLogInstance>,
    #[serde(default)]
    certificate_authorities: Vec<CertificateAuthorityDocument>,
    #[serde(default)]
    ctlogs: Vec<TransparencyLogInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransparencyLogInstance {
    public_key: Option<PublicKeyDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyDocument {
    raw_bytes: String,
    valid_for: Option<TimeRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateAuthorityDocument {
    cert_chain: CertChainDocument,
    #[serde(default)]
    valid_for: TimeRange,
}

#[derive(Debug, Deserialize)]
struct CertChainDocument {
    #[serde(default)]
    certificates: Vec<CertificateDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateDocument {
    raw_bytes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TimeRange {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl From<TimeRange> for ValidityWindow {
    fn from(range: TimeRange) -> Self {
        ValidityWindow {
            start: range.start,
            end: range.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn window(start_offset: i64, end_offset: i64) -> ValidityWindow {
        let base = Utc::now();
        ValidityWindow {
            start: Some(base + TimeDelta::seconds(start_offset)),
            end: Some(base + TimeDelta::seconds(end_offset)),
        }
    }

    #[test]
    fn timerange_bounds() {
        assert!(is_timerange_valid(&ValidityWindow::default(), false));
        assert!(is_timerange_valid(&ValidityWindow::default(), true));

        // Active window.
        assert!(is_timerange_valid(&window(-1, 60), false));
        // Not yet valid.
        assert!(!is_timerange_valid(&window(60, 120), false));
        // Expired, disallowed.
        assert!(!is_timerange_valid(&window(-120, -60), false));
        // Expired, allowed.
        assert!(is_timerange_valid(&window(-120, -60), true));
    }

    #[test]
    fn embedded_trusted_root_parses() {
        let root =
            TrustRoot::from_trusted_root_json(sigstore::EMBEDDED_TRUSTED_ROOT.as_bytes()).unwrap();
        assert!(!root.fulcio_certs().unwrap().is_empty());
        assert_eq!(root.rekor_keyring().unwrap().len(), 1);
        assert_eq!(root.ctfe_keyring().unwrap().len(), 1);
    }

    #[test]
    fn empty_document_reports_missing_authorities() {
        let root = TrustRoot::from_trusted_root_json(b"{}").unwrap();
        assert!(matches!(
            root.fulcio_certs(),
            Err(TrustRootError::NoFulcioAuthorities)
        ));
        assert!(matches!(
            root.rekor_keyring(),
            Err(TrustRootError::NoActiveKeys { log: "rekor" })
        ));
    }

    #[tokio::test]
    async fn manual_provider_returns_fixed_snapshot() {
        let provider = ManualTrustRoot::new(TrustRoot::default());
        let snapshot = provider.snapshot().await.unwrap();
        assert!(snapshot.fulcio_certs().is_err());
    }
}
