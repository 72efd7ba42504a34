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

//! The invariant layer between bundle parsing and verification.
//!
//! [`CheckedBundle`] re-checks everything the verifier's algorithm
//! relies on: the certificate chain is leaf-first with no root CA mixed
//! in, the envelope carries signatures, and each transparency-log entry
//! satisfies its bundle-profile requirements.

use x509_cert::der::Decode as _;
use x509_cert::Certificate;

use crate::bundle::dsse::Envelope;
use crate::bundle::{Bundle, BundleError, BundleVersion, MaterialContent, TlogEntry};
use crate::crypto::certificate::{is_leaf, is_root_ca, CertificateValidationError};

#[derive(Debug, thiserror::Error)]
pub enum BundleCheckError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Raw-key bundles have no trust anchor in the sigstore root and key
    /// management is out of scope, so they are rejected outright.
    #[error("public-key verification material is not supported")]
    PublicKeyUnsupported,

    #[error("bundle's certificate(s) are malformed")]
    CertificateMalformed(#[source] x509_cert::der::Error),

    #[error("bundle does not contain a signing (leaf) certificate")]
    NoLeaf(#[source] CertificateValidationError),

    #[error("bundle contains a root certificate in its chain")]
    RootInChain,

    /// 0.1-profile bundles predate inclusion proofs and must carry the
    /// signed entry timestamp instead.
    #[error("transparency-log entry {log_index} must carry an inclusion promise")]
    InclusionPromiseMissing { log_index: u64 },

    #[error("transparency-log entry {log_index} must carry an inclusion proof")]
    InclusionProofMissing { log_index: u64 },

    #[error("transparency-log entry {log_index} must carry a checkpoint")]
    CheckpointMissing { log_index: u64 },
}

/// A bundle whose structure has been fully checked against the profile
/// invariants; the verifier's input.
pub struct CheckedBundle {
    pub version: BundleVersion,

    /// The signing (leaf) certificate.
    pub certificate: Certificate,

    /// Intermediates shipped with the bundle, leaf excluded.
    pub chain: Vec<Certificate>,

    pub envelope: Envelope,

    pub tlog_entries: Vec<TlogEntry>,
}

impl TryFrom<&Bundle> for CheckedBundle {
    type Error = BundleCheckError;

    fn try_from(bundle: &Bundle) -> Result<Self, Self::Error> {
        let version = bundle.version()?;

        let certs = match bundle.verification_material.content()? {
            MaterialContent::CertificateChain(ders) => ders
                .iter()
                .map(|der| Certificate::from_der(der))
                .collect::<Result<Vec<_>, _>>()
                .map_err(BundleCheckError::CertificateMalformed)?,
            MaterialContent::PublicKey { .. } => {
                return Err(BundleCheckError::PublicKeyUnsupported)
            }
        };

        // The first entry MUST be the signing certificate; the rest MUST
        // NOT include a root of trust.
        let (leaf, chain) = certs
            .split_first()
            .ok_or(BundleCheckError::Bundle(BundleError::Invalid(
                "empty certificate chain",
            )))?;
        is_leaf(leaf).map_err(BundleCheckError::NoLeaf)?;
        for cert in chain {
            if is_root_ca(cert).is_ok() {
                return Err(BundleCheckError::RootInChain);
            }
        }

        let envelope = bundle.envelope()?.clone();

        let tlog_entries = bundle.verification_material.tlog_entries.clone();
        for entry in &tlog_entries {
            check_entry_profile(version, entry)?;
        }

        Ok(CheckedBundle {
            version,
            certificate: leaf.clone(),
            chain: chain.to_vec(),
            envelope,
            tlog_entries,
        })
    }
}

fn check_entry_profile(version: BundleVersion, entry: &TlogEntry) -> Result<(), BundleCheckError> {
    match version {
        BundleVersion::V0_1 => {
            if entry.inclusion_promise.is_none() {
                return Err(BundleCheckError::InclusionPromiseMissing {
                    log_index: entry.log_index,
                });
            }
        }
        BundleVersion::V0_2 | BundleVersion::V0_3 => {
            let Some(proof) = &entry.inclusion_proof else {
                return Err(BundleCheckError::InclusionProofMissing {
                    log_index: entry.log_index,
                });
            };
            if proof.checkpoint.is_none() {
                return Err(BundleCheckError::CheckpointMissing {
                    log_index: entry.log_index,
                });
            }
        }
    }
    Ok(())
}
