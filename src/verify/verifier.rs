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

//! The bundle verification algorithm.

use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;
use serde_json::json;
use tracing::debug;
use webpki::types::{CertificateDer, UnixTime};
use webpki::EndEntityCert;
use x509_cert::der::{Decode as _, Encode as _};

use crate::bundle::{InclusionProof, TlogEntry};
use crate::crypto::certificate::{fingerprint_hex, validity_window};
use crate::crypto::certificate_pool::CertificatePool;
use crate::crypto::checkpoint::Checkpoint;
use crate::crypto::keyring::Keyring;
use crate::crypto::merkle;
use crate::crypto::transparency::{embedded_scts, issuer_spki_from_chain, verify_sct, SctError};
use crate::crypto::VerificationKey;
use crate::intoto::Statement;
use crate::trust::{TrustRoot, TrustRootError};

use super::policy::{ArtifactBinding, Policy};
use super::{CheckedBundle, VerificationError};

/// The seam between the orchestrator and cryptographic verification;
/// test doubles substitute here.
pub trait BundleVerifier: Send + Sync {
    /// Verifies `bundle` under `policy`, returning the verified DSSE
    /// payload (the in-toto statement bytes).
    fn verify(&self, bundle: &CheckedBundle, policy: &Policy)
        -> Result<Vec<u8>, VerificationError>;
}

/// Verifies sigstore bundles against a trust-root snapshot.
pub struct Verifier {
    cert_pool: CertificatePool,
    rekor_keyring: Keyring,
    ctfe_keyring: Keyring,
}

impl Verifier {
    /// Builds a verifier from a snapshot. The snapshot is consulted only
    /// here; verification itself never touches the provider again.
    pub fn new(trust_root: &TrustRoot) -> Result<Self, TrustRootError> {
        let cert_pool = CertificatePool::from_certificates(trust_root.fulcio_certs()?, [])
            .map_err(|e| TrustRootError::BadKeyMaterial(e.to_string()))?;
        Ok(Self {
            cert_pool,
            rekor_keyring: trust_root.rekor_keyring()?,
            ctfe_keyring: trust_root.ctfe_keyring()?,
        })
    }
}

impl BundleVerifier for Verifier {
    fn verify(
        &self,
        bundle: &CheckedBundle,
        policy: &Policy,
    ) -> Result<Vec<u8>, VerificationError> {
        // The algorithm runs in a fixed order; each step is terminal on
        // failure and no later step can recover it.
        //
        // 1. Extract the signing key from the leaf certificate.
        // 2. Verify the DSSE signatures over the PAE.
        // 3. Validate the certificate chain to a Fulcio root.
        // 4. Verify the embedded SCTs against the CT log keys.
        // 5. Verify the transparency-log entries (inclusion proof or SET)
        //    and their consistency with the envelope signature.
        // 6. Check the leaf validity window against the integrated
        //    timestamps.
        // 7. Apply the identity policy to the leaf.
        // 8. Bind the statement subject to the policy digest.

        // 1. Signing key.
        let leaf = &bundle.certificate;
        let signing_key =
            VerificationKey::from_subject_public_key_info(&leaf.tbs_certificate.subject_public_key_info)
                .map_err(VerificationError::UnsupportedKey)?;

        // 2. DSSE signature verification over the PAE, never the raw
        // payload.
        let pae = bundle.envelope.pae()?;
        let signatures = bundle.envelope.signature_bytes()?;
        let verified_signatures: Vec<&[u8]> = signatures
            .iter()
            .filter(|sig| signing_key.verify(&pae, sig).is_ok())
            .map(Vec::as_slice)
            .collect();
        if verified_signatures.is_empty() {
            return Err(VerificationError::SignatureInvalid {
                signatures: signatures.len(),
            });
        }
        debug!("envelope signature corresponds to the signing key");

        // 3. Certificate chain validation. The chain is built at the
        // leaf's issuance time; the signing-time check against the
        // integrated timestamps happens in step 6.
        let fingerprint = fingerprint_hex(leaf);
        let chain_invalid = |_| VerificationError::CertChainInvalid {
            fingerprint: fingerprint.clone(),
        };
        let cert_der: CertificateDer = leaf.to_der().map_err(chain_invalid)?.into();
        let ee_cert: EndEntityCert = (&cert_der)
            .try_into()
            .map_err(|_| VerificationError::CertChainInvalid {
                fingerprint: fingerprint.clone(),
            })?;
        let issued_at = leaf.tbs_certificate.validity.not_before.to_unix_duration();
        let trusted_chain = self
            .cert_pool
            .verify_cert_with_time(&ee_cert, UnixTime::since_unix_epoch(issued_at))
            .map_err(|_| VerificationError::CertChainInvalid {
                fingerprint: fingerprint.clone(),
            })?;
        debug!("signing certificate chains back to a trusted root");

        // The SCT issuer key hash is taken from the verified path, not
        // from the untrusted bundle chain.
        let issuer_spki = if let Some(issuer) = trusted_chain.intermediate_certificates().next() {
            x509_cert::Certificate::from_der(&issuer.der())
                .ok()
                .and_then(|c| c.tbs_certificate.subject_public_key_info.to_der().ok())
        } else {
            // The anchor's SPKI is stored without its outer SEQUENCE
            // header; rebuild it with a short definite-form length.
            let spki_body: Vec<u8> = trusted_chain.anchor().subject_public_key_info.to_vec();
            (spki_body.len() <= 0x7f).then(|| {
                let mut sequence = vec![0x30u8, spki_body.len() as u8];
                sequence.extend(spki_body);
                sequence
            })
        };

        // 4. SCT verification.
        if policy.require_sct > 0 {
            let issuer_spki = issuer_spki.as_deref().ok_or_else(|| {
                VerificationError::CertChainInvalid {
                    fingerprint: fingerprint.clone(),
                }
            })?;
            self.check_scts(bundle, issuer_spki, policy.require_sct)?;
            debug!("embedded SCTs verified");
        }

        // 5. Transparency-log verification.
        let mut integrated_times = Vec::new();
        if policy.require_tlog > 0 {
            integrated_times =
                self.check_tlog_entries(bundle, &verified_signatures, policy.require_tlog)?;
            debug!("transparency log entries verified");
        }

        // 6. Temporal validity: the leaf must have been valid at the
        // integrated timestamps.
        if policy.require_integrated_timestamps > 0 {
            check_integrated_times(
                leaf,
                &integrated_times,
                policy.require_integrated_timestamps,
            )?;
            debug!("data signed during the certificate validity period");
        }

        // 7. Identity policy.
        for matcher in &policy.identity {
            matcher.check(leaf)?;
        }
        debug!("signing certificate conforms to the identity policy");

        // 8. Artifact binding.
        let payload = bundle.envelope.payload_bytes()?;
        if let ArtifactBinding::Digest(expected) = policy.binding() {
            let statement = Statement::from_payload(&payload)?;
            if statement.subject_matching(expected).is_none() {
                return Err(VerificationError::SubjectDigestMismatch {
                    expected: expected.clone(),
                });
            }
            debug!(digest = %expected, "statement subject is bound to the artifact");
        }

        debug!("bundle successfully verified");
        Ok(payload)
    }
}

impl Verifier {
    fn check_scts(
        &self,
        bundle: &CheckedBundle,
        issuer_spki: &[u8],
        required: usize,
    ) -> Result<(), VerificationError> {
        let scts = match embedded_scts(&bundle.certificate, issuer_spki) {
            Ok(scts) => scts,
            Err(SctError::ListMissing) => {
                return Err(VerificationError::SCTMissing {
                    required,
                    present: 0,
                })
            }
            Err(_) => {
                return Err(VerificationError::SCTInvalid {
                    index: 0,
                    log_id: String::new(),
                })
            }
        };
        if scts.len() < required {
            return Err(VerificationError::SCTMissing {
                required,
                present: scts.len(),
            });
        }

        let mut valid = 0;
        let mut first_failure = None;
        for (index, sct) in scts.iter().enumerate() {
            if verify_sct(sct, &self.ctfe_keyring).is_ok() {
                valid += 1;
            } else if first_failure.is_none() {
                first_failure = Some(VerificationError::SCTInvalid {
                    index,
                    log_id: hex::encode(sct.log_id()),
                });
            }
        }
        if valid < required {
            return Err(first_failure.unwrap_or(VerificationError::SCTMissing {
                required,
                present: scts.len(),
            }));
        }
        Ok(())
    }

    /// Verifies the log entries; returns the integrated timestamps of the
    /// entries that verified.
    fn check_tlog_entries(
        &self,
        bundle: &CheckedBundle,
        verified_signatures: &[&[u8]],
        required: usize,
    ) -> Result<Vec<u64>, VerificationError> {
        let entries = &bundle.tlog_entries;
        if entries.len() < required {
            return Err(VerificationError::TLogMissing {
                required,
                present: entries.len(),
            });
        }

        let mut times = Vec::new();
        let mut first_failure = None;
        for entry in entries {
            match self.check_tlog_entry(entry) {
                Ok(()) => {
                    // A verified entry must commit to the envelope
                    // signature that actually verified; anything else is
                    // a swapped-signature attack (CVE-2022-36056 class).
                    if !entry_references_signature(entry, verified_signatures)? {
                        return Err(VerificationError::TLogMismatch {
                            log_index: entry.log_index,
                        });
                    }
                    times.push(entry.integrated_time);
                }
                Err(reason) => {
                    if first_failure.is_none() {
                        first_failure = Some(VerificationError::TLogInvalid {
                            log_index: entry.log_index,
                            reason,
                        });
                    }
                }
            }
        }
        if times.len() < required {
            return Err(first_failure.unwrap_or(VerificationError::TLogMissing {
                required,
                present: entries.len(),
            }));
        }
        Ok(times)
    }

    /// Verifies a single entry: the inclusion proof against its
    /// checkpoint when present, the signed entry timestamp otherwise.
    fn check_tlog_entry(&self, entry: &TlogEntry) -> Result<(), String> {
        let body = entry.body_bytes().map_err(|e| e.to_string())?;
        let log_id = entry.log_id_bytes().map_err(|e| e.to_string())?;

        if let Some(proof) = &entry.inclusion_proof {
            let leaf = merkle::leaf_hash(&body);
            let root = proof.root_hash_bytes().map_err(|e| e.to_string())?;
            let hashes = proof.hash_bytes().map_err(|e| e.to_string())?;
            merkle::verify_inclusion(proof.log_index, proof.tree_size, &leaf, &hashes, &root)
                .map_err(|e| e.to_string())?;
            self.check_checkpoint(proof, &log_id, &root)?;
            Ok(())
        } else if let Some(promise) = &entry.inclusion_promise {
            // SET verification: the signature covers the canonical JSON
            // of the entry without its verification object.
            let signed = json!({
                "body": entry.canonicalized_body,
                "integratedTime": entry.integrated_time,
                "logID": hex::encode(&log_id),
                "logIndex": entry.log_index,
            });
            let message = serde_json::to_vec(&signed).map_err(|e| e.to_string())?;
            let signature = promise.signature_bytes().map_err(|e| e.to_string())?;
            self.rekor_keyring
                .verify(&log_id, &signature, &message)
                .map_err(|e| e.to_string())
        } else {
            Err("entry carries neither an inclusion proof nor a promise".into())
        }
    }

    /// Checks that the checkpoint commits to the proven root and that
    /// its note signature verifies against the log key.
    fn check_checkpoint(
        &self,
        proof: &InclusionProof,
        log_id: &[u8],
        root: &[u8; 32],
    ) -> Result<(), String> {
        let Some(checkpoint) = &proof.checkpoint else {
            return Err("inclusion proof has no checkpoint".into());
        };
        let checkpoint =
            Checkpoint::parse(&checkpoint.envelope).map_err(|e| e.to_string())?;

        if checkpoint.tree_size() != proof.tree_size {
            return Err("checkpoint tree size does not match the proof".into());
        }
        if checkpoint.root_hash() != root {
            return Err("checkpoint root hash does not match the proof".into());
        }
        checkpoint
            .verify_signature(log_id, &self.rekor_keyring)
            .map_err(|e| e.to_string())
    }
}

/// Looks for any verified signature's base64 in the canonicalized entry
/// body. Both the `dsse` and `intoto` entry kinds embed the envelope
/// signature; the search is structural so new kinds stay covered.
fn entry_references_signature(
    entry: &TlogEntry,
    verified_signatures: &[&[u8]],
) -> Result<bool, VerificationError> {
    let body = entry
        .body_bytes()
        .map_err(crate::verify::BundleCheckError::from)?;
    let Ok(body_json) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return Ok(false);
    };
    let encoded: Vec<String> = verified_signatures
        .iter()
        .map(|sig| base64.encode(sig))
        .collect();
    Ok(json_contains_string(&body_json, &encoded))
}

fn json_contains_string(value: &serde_json::Value, needles: &[String]) -> bool {
    match value {
        serde_json::Value::String(s) => needles.iter().any(|n| n == s),
        serde_json::Value::Array(items) => {
            items.iter().any(|v| json_contains_string(v, needles))
        }
        serde_json::Value::Object(map) => {
            map.values().any(|v| json_contains_string(v, needles))
        }
        _ => false,
    }
}

/// Determines the verification time from the integrated timestamps and
/// checks it against the leaf validity window.
fn check_integrated_times(
    leaf: &x509_cert::Certificate,
    integrated_times: &[u64],
    required: usize,
) -> Result<(), VerificationError> {
    let (not_before, not_after) = validity_window(leaf);

    let in_window: Vec<u64> = integrated_times
        .iter()
        .copied()
        .filter(|t| (not_before..=not_after).contains(t))
        .collect();
    if in_window.len() >= required {
        return Ok(());
    }

    match integrated_times.iter().min() {
        Some(&earliest) if earliest < not_before => Err(VerificationError::CertNotYetValid {
            not_before,
            verification_time: earliest,
        }),
        Some(&earliest) => Err(VerificationError::CertExpired {
            not_after,
            verification_time: earliest,
        }),
        None => Err(VerificationError::TLogMissing {
            required,
            present: 0,
        }),
    }
}
