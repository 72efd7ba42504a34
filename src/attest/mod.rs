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

//! Attestation validation and the verification orchestrator.
//!
//! [`AttestationVerifier`] drives the pipeline for one image reference
//! and aggregates the per-attestation outcomes into a single
//! [`VerificationReport`].

use serde::{Deserialize, Serialize};

use crate::oci::Digest;

pub mod sbom;
pub mod slsa;
pub mod verifier;

pub use sbom::{NoopAnalyzer, PackageAnalyzer, SbomOutcome, SpdxPackage};
pub use slsa::SlsaOutcome;
pub use verifier::AttestationVerifier;

/// The aggregate result of verifying one image reference.
///
/// `found` and `valid` are reported separately: "no attestations found"
/// and "attestations present but none from the trusted builder" are
/// different outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub found: bool,

    pub valid: bool,

    /// The pinned manifest digest the attestations were bound to. The
    /// subject digest recorded by the attestation itself is reported in
    /// [`SlsaOutcome::digest`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<Digest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slsa: Option<SlsaOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbom: Option<SbomOutcome>,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,
}

impl VerificationReport {
    pub(crate) fn empty() -> Self {
        Self {
            found: false,
            valid: false,
            artifact_digest: None,
            slsa: None,
            sbom: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Severity of a reported vulnerability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A vulnerability reported by a [`PackageAnalyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub severity: Severity,
    pub component: String,
    pub version: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

/// The caller-supplied trust policy for a verification run.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    /// The builder id a SLSA attestation must carry, compared
    /// byte-for-byte after NFC normalization.
    pub trusted_builder: String,

    /// In strict mode any not-fully-valid result refuses installation;
    /// otherwise only integrity errors do.
    pub strict: bool,

    pub require_sct: usize,
    pub require_tlog: usize,
    pub require_integrated_timestamps: usize,
}

impl TrustPolicy {
    pub fn new(trusted_builder: impl Into<String>) -> Self {
        Self {
            trusted_builder: trusted_builder.into(),
            strict: false,
            require_sct: 1,
            require_tlog: 1,
            require_integrated_timestamps: 1,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Whether this policy allows installing the verified artifact.
    pub fn allows_install(&self, report: &VerificationReport) -> bool {
        if self.strict {
            report.found && report.valid
        } else {
            report.errors.is_empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }

    #[test]
    fn strict_policy_requires_found_and_valid() {
        let policy = TrustPolicy::new("b").strict();
        let mut report = VerificationReport::empty();
        assert!(!policy.allows_install(&report));

        report.found = true;
        report.valid = true;
        assert!(policy.allows_install(&report));
    }

    #[test]
    fn lenient_policy_only_refuses_on_errors() {
        let policy = TrustPolicy::new("b");
        let mut report = VerificationReport::empty();
        // Untrusted builder, but no integrity errors: allowed.
        assert!(policy.allows_install(&report));

        report.errors.push("digest mismatch".into());
        assert!(!policy.allows_install(&report));
    }
}
