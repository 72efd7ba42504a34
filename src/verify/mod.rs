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

//! Cryptographic verification of sigstore bundles.
//!
//! [`Verifier::verify`] executes a fixed sequence of checks against a
//! trust-root snapshot under a caller-supplied [`Policy`]; the first
//! failing step is terminal and later steps never run. The verifier is
//! pure: it performs no I/O and is deterministic over its inputs.

use crate::bundle::dsse::DsseError;
use crate::crypto::KeyError;
use crate::intoto::StatementError;
use crate::oci::Digest;

pub mod models;
pub mod policy;
pub mod verifier;

pub use models::{BundleCheckError, CheckedBundle};
pub use policy::{ArtifactBinding, IdentityMatcher, IssuerMatch, Policy, PolicyError};
pub use verifier::{BundleVerifier, Verifier};

/// A failed verification step.
///
/// Every variant reports the first failing step with enough context to
/// reproduce the check. Errors are never downgraded to warnings here; the
/// verifier has no partially-valid results.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The bundle violates a structural invariant the verifier relies on.
    #[error(transparent)]
    Bundle(#[from] BundleCheckError),

    /// The DSSE envelope's transport encoding is malformed.
    #[error(transparent)]
    Envelope(#[from] DsseError),

    /// The signing key is not usable (unsupported algorithm).
    #[error("unsupported signing key")]
    UnsupportedKey(#[source] KeyError),

    /// No envelope signature verified over the PAE.
    #[error("no envelope signature verified against the signing key ({signatures} present)")]
    SignatureInvalid { signatures: usize },

    /// The leaf does not chain to a trusted Fulcio root.
    #[error("certificate chain does not verify to a trusted Fulcio root (leaf {fingerprint})")]
    CertChainInvalid { fingerprint: String },

    /// The verification time falls after the leaf's validity window.
    #[error("certificate expired at the verification time ({verification_time} > {not_after})")]
    CertExpired {
        not_after: u64,
        verification_time: u64,
    },

    /// The verification time falls before the leaf's validity window.
    #[error("certificate not yet valid at the verification time ({verification_time} < {not_before})")]
    CertNotYetValid {
        not_before: u64,
        verification_time: u64,
    },

    /// Fewer SCTs present than the policy requires.
    #[error("bundle carries {present} SCTs where {required} valid SCTs are required")]
    SCTMissing { required: usize, present: usize },

    /// Enough SCTs present, but too few verified.
    #[error("SCT {index} failed verification against log {log_id}")]
    SCTInvalid { index: usize, log_id: String },

    /// Fewer transparency-log entries present than the policy requires.
    #[error("bundle carries {present} transparency-log entries where {required} verified entries are required")]
    TLogMissing { required: usize, present: usize },

    /// Enough entries present, but too few verified.
    #[error("transparency-log entry {log_index} failed verification: {reason}")]
    TLogInvalid { log_index: u64, reason: String },

    /// A verified entry does not reference the envelope signature bytes.
    #[error("transparency-log entry {log_index} does not reference the envelope signature")]
    TLogMismatch { log_index: u64 },

    /// An identity matcher rejected the leaf certificate.
    #[error("identity policy `{option}` rejected the certificate: {detail}")]
    IdentityMismatch { option: &'static str, detail: String },

    /// The statement's subjects do not list the bound digest.
    #[error("no statement subject carries the bound digest {expected}")]
    SubjectDigestMismatch { expected: Digest },

    /// The verified payload is not a well-formed in-toto statement.
    #[error(transparent)]
    Statement(#[from] StatementError),
}

impl VerificationError {
    /// Whether this failure is a cryptographic or integrity failure, as
    /// opposed to malformed input or an identity-policy mismatch. The
    /// orchestrator records integrity failures as errors and everything
    /// else as warnings.
    pub fn is_integrity(&self) -> bool {
        !matches!(
            self,
            VerificationError::Bundle(_)
                | VerificationError::Envelope(_)
                | VerificationError::Statement(_)
                | VerificationError::IdentityMismatch { .. }
        )
    }
}
