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

//! Sigstore bundle parsing.
//!
//! The on-the-wire shape is the protojson rendering of the sigstore
//! bundle message: 64-bit integers arrive as strings and binary fields as
//! base64. Parsing is strict about required fields but tolerant of
//! unknown ones.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer};

pub mod dsse;

use dsse::Envelope;

/// Media type of v0.3 bundles, as used for referrer discovery.
pub const BUNDLE_V03_MEDIA_TYPE: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("malformed bundle: {0}")]
    Json(#[source] serde_json::Error),

    #[error("malformed bundle: {0}")]
    Invalid(&'static str),

    #[error("unknown bundle media type {0:?}")]
    UnknownMediaType(String),

    #[error("malformed base64 field in bundle")]
    Base64(#[from] base64::DecodeError),
}

/// Bundle profile, derived from the media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleVersion {
    V0_1,
    V0_2,
    V0_3,
}

impl FromStr for BundleVersion {
    type Err = BundleError;

    fn from_str(media_type: &str) -> Result<Self, Self::Err> {
        match media_type {
            "application/vnd.dev.sigstore.bundle+json;version=0.1" => Ok(BundleVersion::V0_1),
            "application/vnd.dev.sigstore.bundle+json;version=0.2" => Ok(BundleVersion::V0_2),
            "application/vnd.dev.sigstore.bundle.v0.3+json"
            | "application/vnd.dev.sigstore.bundle+json;version=0.3" => Ok(BundleVersion::V0_3),
            other => Err(BundleError::UnknownMediaType(other.to_owned())),
        }
    }
}

impl fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleVersion::V0_1 => f.write_str("0.1"),
            BundleVersion::V0_2 => f.write_str("0.2"),
            BundleVersion::V0_3 => f.write_str("0.3"),
        }
    }
}

/// A parsed sigstore bundle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub media_type: String,

    pub verification_material: VerificationMaterial,

    /// The signed content. Only DSSE envelopes are produced by the
    /// attestation tooling this crate consumes.
    pub dsse_envelope: Option<Envelope>,
}

impl Bundle {
    /// Parses bundle bytes, reporting the first structural defect.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BundleError> {
        let bundle: Bundle = serde_json::from_slice(bytes).map_err(BundleError::Json)?;
        // Surface defects at parse time rather than mid-verification.
        bundle.version()?;
        bundle.verification_material.content()?;
        let envelope = bundle
            .dsse_envelope
            .as_ref()
            .ok_or(BundleError::Invalid("bundle has no dsseEnvelope"))?;
        if envelope.signatures.is_empty() {
            return Err(BundleError::Invalid("dsseEnvelope has no signatures"));
        }
        Ok(bundle)
    }

    pub fn version(&self) -> Result<BundleVersion, BundleError> {
        self.media_type.parse()
    }

    /// The DSSE envelope; present on every bundle accepted by
    /// [`Bundle::from_slice`].
    pub fn envelope(&self) -> Result<&Envelope, BundleError> {
        self.dsse_envelope
            .as_ref()
            .ok_or(BundleError::Invalid("bundle has no dsseEnvelope"))
    }
}

/// The bundle's verification material.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMaterial {
    x509_certificate_chain: Option<CertificateChain>,
    certificate: Option<EncodedBytes>,
    public_key: Option<PublicKeyHint>,

    #[serde(default)]
    pub tlog_entries: Vec<TlogEntry>,

    #[serde(default)]
    pub timestamp_verification_data: Option<TimestampVerificationData>,
}

impl VerificationMaterial {
    /// The material variant, decoded. Exactly one of the three content
    /// fields must be present.
    pub fn content(&self) -> Result<MaterialContent, BundleError> {
        match (
            &self.x509_certificate_chain,
            &self.certificate,
            &self.public_key,
        ) {
            (Some(chain), None, None) => {
                let certs = chain
                    .certificates
                    .iter()
                    .map(|c| c.decode())
                    .collect::<Result<Vec<_>, _>>()?;
                if certs.is_empty() {
                    return Err(BundleError::Invalid("empty certificate chain"));
                }
                Ok(MaterialContent::CertificateChain(certs))
            }
            (None, Some(cert), None) => {
                Ok(MaterialContent::CertificateChain(vec![cert.decode()?]))
            }
            (None, None, Some(key)) => Ok(MaterialContent::PublicKey {
                hint: key.hint.clone(),
            }),
            (None, None, None) => {
                Err(BundleError::Invalid("bundle has no verification material"))
            }
            _ => Err(BundleError::Invalid(
                "bundle carries more than one verification material variant",
            )),
        }
    }
}

/// Decoded verification-material variant.
#[derive(Debug, Clone)]
pub enum MaterialContent {
    /// DER certificates, signing (leaf) certificate first.
    CertificateChain(Vec<Vec<u8>>),

    /// A raw public key, identified only by an out-of-band hint.
    PublicKey { hint: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
struct CertificateChain {
    #[serde(default)]
    certificates: Vec<EncodedBytes>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodedBytes {
    raw_bytes: String,
}

impl EncodedBytes {
    fn decode(&self) -> Result<Vec<u8>, BundleError> {
        Ok(base64.decode(&self.raw_bytes)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PublicKeyHint {
    hint: Option<String>,
}

/// A Rekor transparency-log entry carried in the bundle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlogEntry {
    #[serde(deserialize_with = "de_u64_string")]
    pub log_index: u64,

    pub log_id: LogId,

    #[serde(default)]
    pub kind_version: Option<KindVersion>,

    #[serde(deserialize_with = "de_u64_string")]
    pub integrated_time: u64,

    #[serde(default)]
    pub inclusion_promise: Option<InclusionPromise>,

    #[serde(default)]
    pub inclusion_proof: Option<InclusionProof>,

    /// Base64 of the canonicalized entry body.
    pub canonicalized_body: String,
}

impl TlogEntry {
    pub fn log_id_bytes(&self) -> Result<Vec<u8>, BundleError> {
        Ok(base64.decode(&self.log_id.key_id)?)
    }

    pub fn body_bytes(&self) -> Result<Vec<u8>, BundleError> {
        Ok(base64.decode(&self.canonicalized_body)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogId {
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KindVersion {
    pub kind: String,
    pub version: String,
}

/// The signed entry timestamp: Rekor's promise of inclusion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionPromise {
    pub signed_entry_timestamp: String,
}

impl InclusionPromise {
    pub fn signature_bytes(&self) -> Result<Vec<u8>, BundleError> {
        Ok(base64.decode(&self.signed_entry_timestamp)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    #[serde(deserialize_with = "de_u64_string")]
    pub log_index: u64,

    /// Base64 of the tree root hash the proof leads to.
    pub root_hash: String,

    #[serde(deserialize_with = "de_u64_string")]
    pub tree_size: u64,

    /// Base64 sibling hashes, leaf to root.
    #[serde(default)]
    pub hashes: Vec<String>,

    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
}

impl InclusionProof {
    pub fn root_hash_bytes(&self) -> Result<[u8; 32], BundleError> {
        decode_hash32(&self.root_hash)
    }

    pub fn hash_bytes(&self) -> Result<Vec<[u8; 32]>, BundleError> {
        self.hashes.iter().map(|h| decode_hash32(h)).collect()
    }
}

fn decode_hash32(b64: &str) -> Result<[u8; 32], BundleError> {
    let bytes = base64.decode(b64)?;
    bytes
        .try_into()
        .map_err(|_| BundleError::Invalid("hash is not 32 bytes"))
}

/// A signed-note checkpoint over the log's tree head.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    pub envelope: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampVerificationData {
    #[serde(default)]
    pub rfc3161_timestamps: Vec<Rfc3161Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfc3161Timestamp {
    pub signed_timestamp: String,
}

/// protojson renders 64-bit integers as strings; accept both shapes.
fn de_u64_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        String(String),
        Int(u64),
    }
    match Number::deserialize(deserializer)? {
        Number::Int(n) => Ok(n),
        Number::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
