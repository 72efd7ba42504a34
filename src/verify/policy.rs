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

//! Verification policy: artifact binding, keyless identity matchers and
//! the required counts of SCTs, transparency-log entries and integrated
//! timestamps.

use const_oid::ObjectIdentifier;
use regex::Regex;

use crate::crypto::certificate::{extension_value, oidc_issuer, subject_alternative_names};
use crate::oci::Digest;

use super::VerificationError;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid SAN pattern")]
    SanPattern(#[from] regex::Error),
}

/// Whether and how the attestation subject is bound to an artifact.
///
/// Binding is the default; skipping it is an explicit choice for callers
/// that enforce the binding themselves.
#[derive(Debug, Clone)]
pub enum ArtifactBinding {
    /// Some statement subject must list this digest.
    Digest(Digest),

    /// No subject-digest binding is applied.
    Unbound,
}

/// How the OIDC issuer extension must match.
#[derive(Debug, Clone)]
pub enum IssuerMatch {
    Exact(String),
    Prefix(String),
}

/// One identity requirement on the leaf certificate. Matchers are
/// applied in order; all must pass.
#[derive(Debug, Clone)]
pub enum IdentityMatcher {
    /// Some subject alternative name must match the pattern.
    SanRegex(Regex),

    /// The Fulcio OIDC issuer extension must match.
    Issuer(IssuerMatch),

    /// The given Fulcio extension must carry exactly this value.
    Extension {
        oid: ObjectIdentifier,
        value: String,
    },
}

impl IdentityMatcher {
    /// The policy-option name reported on mismatch.
    pub fn option_name(&self) -> &'static str {
        match self {
            IdentityMatcher::SanRegex(_) => "san_regex",
            IdentityMatcher::Issuer(_) => "issuer",
            IdentityMatcher::Extension { .. } => "extensions",
        }
    }

    pub(crate) fn check(&self, cert: &x509_cert::Certificate) -> Result<(), VerificationError> {
        let fail = |detail: String| VerificationError::IdentityMismatch {
            option: self.option_name(),
            detail,
        };
        match self {
            IdentityMatcher::SanRegex(pattern) => {
                let sans = subject_alternative_names(cert);
                if sans.iter().any(|san| pattern.is_match(san)) {
                    Ok(())
                } else {
                    Err(fail(format!(
                        "no SAN in {sans:?} matches {:?}",
                        pattern.as_str()
                    )))
                }
            }
            IdentityMatcher::Issuer(matcher) => {
                let issuer = oidc_issuer(cert)
                    .ok_or_else(|| fail("certificate has no OIDC issuer extension".into()))?;
                let ok = match matcher {
                    IssuerMatch::Exact(expected) => issuer == *expected,
                    IssuerMatch::Prefix(prefix) => issuer.starts_with(prefix),
                };
                if ok {
                    Ok(())
                } else {
                    Err(fail(format!("issuer {issuer:?} does not match")))
                }
            }
            IdentityMatcher::Extension { oid, value } => {
                match extension_value(cert, oid) {
                    Some(actual) if actual == *value => Ok(()),
                    Some(actual) => Err(fail(format!(
                        "extension {oid} is {actual:?}, expected {value:?}"
                    ))),
                    None => Err(fail(format!("certificate has no extension {oid}"))),
                }
            }
        }
    }
}

/// The policy a bundle is verified under.
#[derive(Debug, Clone)]
pub struct Policy {
    pub(crate) binding: ArtifactBinding,
    pub(crate) identity: Vec<IdentityMatcher>,
    pub(crate) require_sct: usize,
    pub(crate) require_tlog: usize,
    pub(crate) require_integrated_timestamps: usize,
}

impl Policy {
    /// A policy binding the attestation subject to `digest`, with the
    /// default requirements of one valid SCT, one verified log entry and
    /// one in-window integrated timestamp.
    pub fn bound_to_digest(digest: Digest) -> Self {
        Self {
            binding: ArtifactBinding::Digest(digest),
            identity: Vec::new(),
            require_sct: 1,
            require_tlog: 1,
            require_integrated_timestamps: 1,
        }
    }

    /// A policy that explicitly skips subject-digest binding. Only for
    /// callers that enforce the binding themselves.
    pub fn without_artifact_binding() -> Self {
        Self {
            binding: ArtifactBinding::Unbound,
            identity: Vec::new(),
            require_sct: 1,
            require_tlog: 1,
            require_integrated_timestamps: 1,
        }
    }

    pub fn with_san_regex(mut self, pattern: &str) -> Result<Self, PolicyError> {
        self.identity
            .push(IdentityMatcher::SanRegex(Regex::new(pattern)?));
        Ok(self)
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.identity
            .push(IdentityMatcher::Issuer(IssuerMatch::Exact(issuer.into())));
        self
    }

    pub fn with_issuer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.identity
            .push(IdentityMatcher::Issuer(IssuerMatch::Prefix(prefix.into())));
        self
    }

    pub fn with_extension(mut self, oid: ObjectIdentifier, value: impl Into<String>) -> Self {
        self.identity.push(IdentityMatcher::Extension {
            oid,
            value: value.into(),
        });
        self
    }

    pub fn require_sct(mut self, count: usize) -> Self {
        self.require_sct = count;
        self
    }

    pub fn require_tlog(mut self, count: usize) -> Self {
        self.require_tlog = count;
        self
    }

    pub fn require_integrated_timestamps(mut self, count: usize) -> Self {
        self.require_integrated_timestamps = count;
        self
    }

    pub fn binding(&self) -> &ArtifactBinding {
        &self.binding
    }
}
