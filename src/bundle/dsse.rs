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

//! The Dead Simple Signing Envelope.
//!
//! Signatures never cover the raw payload: they cover the
//! Pre-Authentication Encoding, which binds the payload type and payload
//! length into the signed bytes. All signing-byte reconstruction in this
//! crate goes through [`pae`].

use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// DSSE payload type of in-toto statements.
pub const INTOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[derive(Debug, thiserror::Error)]
pub enum DsseError {
    #[error("envelope payload is not valid base64")]
    PayloadEncoding(#[source] base64::DecodeError),

    #[error("signature {index} is not valid base64")]
    SignatureEncoding {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("envelope carries no signatures")]
    NoSignatures,
}

/// A DSSE envelope as carried in a sigstore bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Base64-encoded payload.
    pub payload: String,

    pub payload_type: String,

    #[serde(default)]
    pub signatures: Vec<EnvelopeSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Base64-encoded signature bytes.
    pub sig: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
}

impl Envelope {
    /// The decoded payload bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, DsseError> {
        base64.decode(&self.payload).map_err(DsseError::PayloadEncoding)
    }

    /// Decoded signature bytes, in envelope order.
    pub fn signature_bytes(&self) -> Result<Vec<Vec<u8>>, DsseError> {
        if self.signatures.is_empty() {
            return Err(DsseError::NoSignatures);
        }
        self.signatures
            .iter()
            .enumerate()
            .map(|(index, s)| {
                base64
                    .decode(&s.sig)
                    .map_err(|source| DsseError::SignatureEncoding { index, source })
            })
            .collect()
    }

    /// The Pre-Authentication Encoding of this envelope's content.
    pub fn pae(&self) -> Result<Vec<u8>, DsseError> {
        Ok(pae(&self.payload_type, &self.payload_bytes()?))
    }
}

/// DSSEv1 Pre-Authentication Encoding:
/// `"DSSEv1" SP len(type) SP type SP len(payload) SP payload`,
/// lengths as ASCII decimal.
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload_type.len() + payload.len() + 32);
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}
