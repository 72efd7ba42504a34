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

//! Cryptographic building blocks: verification keys, log keyrings, the
//! Fulcio certificate pool, SCT reconstruction and Merkle proofs.
//!
//! Nothing in this module performs I/O; every function is deterministic
//! over its inputs.

use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::DecodePublicKey as _;
use x509_cert::der::Encode as _;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

pub mod certificate;
pub mod certificate_pool;
pub mod checkpoint;
pub mod keyring;
pub mod merkle;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod transparency;

/// Failure to decode or use a verification key.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("malformed public key")]
    Malformed,

    #[error("unsupported signing algorithm (expected ECDSA P-256)")]
    UnsupportedAlgorithm,

    #[error("malformed signature")]
    SignatureMalformed,

    #[error("signature verification failed")]
    SignatureInvalid,
}

/// A public key usable for signature verification.
///
/// The sigstore public-good instance issues ECDSA P-256 material for
/// Fulcio leaves, Rekor and the CT logs, so that is the only algorithm
/// accepted here; anything else fails with
/// [`KeyError::UnsupportedAlgorithm`].
#[derive(Debug, Clone)]
pub struct VerificationKey {
    key: VerifyingKey,
}

impl VerificationKey {
    /// Decodes a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, KeyError> {
        let key =
            VerifyingKey::from_public_key_der(der).map_err(|_| KeyError::UnsupportedAlgorithm)?;
        Ok(Self { key })
    }

    /// Extracts the key of a parsed certificate's SPKI.
    pub fn from_subject_public_key_info(
        spki: &SubjectPublicKeyInfoOwned,
    ) -> Result<Self, KeyError> {
        let der = spki.to_der().map_err(|_| KeyError::Malformed)?;
        Self::from_spki_der(&der)
    }

    /// Verifies `signature` (ASN.1 DER, or raw `r || s`) over `message`.
    /// The message is hashed with SHA-256 as part of verification.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        let signature = decode_ecdsa_signature(signature)?;
        self.key
            .verify(message, &signature)
            .map_err(|_| KeyError::SignatureInvalid)
    }
}

fn decode_ecdsa_signature(bytes: &[u8]) -> Result<p256::ecdsa::Signature, KeyError> {
    if let Ok(sig) = p256::ecdsa::Signature::from_der(bytes) {
        return Ok(sig);
    }
    p256::ecdsa::Signature::from_slice(bytes).map_err(|_| KeyError::SignatureMalformed)
}
