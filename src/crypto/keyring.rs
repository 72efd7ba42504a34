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

//! A keyring of transparency-log keys addressed by log id.
//!
//! Both Rekor and the CT logs identify their keys by the SHA-256 of the
//! key's DER-encoded SubjectPublicKeyInfo (RFC 6962 §3.2); the keyring
//! computes those ids itself rather than trusting ids carried alongside
//! the key material.

use std::collections::HashMap;

use sha2::{Digest as _, Sha256};

use super::{KeyError, VerificationKey};

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("malformed key in keyring")]
    KeyMalformed(#[source] KeyError),

    #[error("no key found for log id {log_id}")]
    KeyNotFound { log_id: String },

    #[error("signature verification failed for log id {log_id}")]
    SignatureInvalid { log_id: String },
}

/// An immutable set of log verification keys.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: HashMap<[u8; 32], VerificationKey>,
}

impl Keyring {
    /// Builds a keyring from DER-encoded SPKI keys.
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a [u8]>) -> Result<Self, KeyringError> {
        let mut map = HashMap::new();
        for der in keys {
            let key = VerificationKey::from_spki_der(der).map_err(KeyringError::KeyMalformed)?;
            let id: [u8; 32] = Sha256::digest(der).into();
            map.insert(id, key);
        }
        Ok(Self { keys: map })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Verifies `signature` over `message` with the key identified by
    /// `log_id`.
    pub fn verify(
        &self,
        log_id: &[u8],
        signature: &[u8],
        message: &[u8],
    ) -> Result<(), KeyringError> {
        let key = self
            .keys
            .get(log_id)
            .ok_or_else(|| KeyringError::KeyNotFound {
                log_id: hex::encode(log_id),
            })?;
        key.verify(message, signature)
            .map_err(|_| KeyringError::SignatureInvalid {
                log_id: hex::encode(log_id),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use p256::pkcs8::EncodePublicKey as _;

    fn signing_key_with_id() -> (SigningKey, Vec<u8>, [u8; 32]) {
        let signing = SigningKey::random(&mut OsRng);
        let spki = signing
            .verifying_key()
            .to_public_key_der()
            .expect("encode spki")
            .into_vec();
        let id: [u8; 32] = Sha256::digest(&spki).into();
        (signing, spki, id)
    }

    #[test]
    fn verifies_by_log_id() {
        let (signing, spki, id) = signing_key_with_id();
        let keyring = Keyring::new([spki.as_slice()]).unwrap();
        let sig: p256::ecdsa::Signature = signing.sign(b"entry");
        keyring
            .verify(&id, sig.to_der().as_bytes(), b"entry")
            .expect("signature verifies");
    }

    #[test]
    fn unknown_log_id_is_reported() {
        let (_, spki, _) = signing_key_with_id();
        let keyring = Keyring::new([spki.as_slice()]).unwrap();
        let err = keyring.verify(&[0u8; 32], b"sig", b"entry").unwrap_err();
        assert!(matches!(err, KeyringError::KeyNotFound { .. }));
    }

    #[test]
    fn wrong_key_fails() {
        let (signing, _, _) = signing_key_with_id();
        let (_, other_spki, other_id) = signing_key_with_id();
        let keyring = Keyring::new([other_spki.as_slice()]).unwrap();
        let sig: p256::ecdsa::Signature = signing.sign(b"entry");
        let err = keyring
            .verify(&other_id, sig.to_der().as_bytes(), b"entry")
            .unwrap_err();
        assert!(matches!(err, KeyringError::SignatureInvalid { .. }));
    }
}
