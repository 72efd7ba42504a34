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

//! OCI value types: image references, digests, descriptors and manifests.
//!
//! Everything here is an immutable value. References are parsed totally
//! (there are no partial references); after resolution the tag selector is
//! replaced by a concrete digest and downstream components only ever see
//! digests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

pub mod client;

/// Media type of an OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of an OCI image index (the referrers API response shape).
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Artifact and layer media type of a sigstore bundle attached by the
/// GitHub attestation tooling.
pub const SIGSTORE_BUNDLE_MEDIA_TYPE: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

/// Referrer annotation carrying the bundled statement's predicate type.
///
/// Advisory only: routing authority is the predicate type inside the
/// cryptographically verified statement, never this annotation.
pub const PREDICATE_TYPE_ANNOTATION: &str = "dev.sigstore.bundle.predicateType";

/// Failure to parse an image reference or digest.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        reference: String,
        reason: &'static str,
    },

    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest {
        digest: String,
        reason: &'static str,
    },
}

/// Digest algorithms recognized by the reference grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Length of the hex encoding for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(ReferenceError::InvalidDigest {
                digest: s.into(),
                reason: "unsupported digest algorithm",
            }),
        }
    }
}

/// A content digest: `algorithm:hex`.
///
/// Equality is by algorithm and value; the hex value is normalized to
/// lowercase at parse time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

impl Digest {
    /// Parses an `algorithm:hex` digest string, enforcing the hex length
    /// fixed by the algorithm.
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let (algorithm, hex) = s.split_once(':').ok_or(ReferenceError::InvalidDigest {
            digest: s.into(),
            reason: "missing `:` separator",
        })?;
        let algorithm: DigestAlgorithm = algorithm.parse()?;
        if hex.len() != algorithm.hex_len() {
            return Err(ReferenceError::InvalidDigest {
                digest: s.into(),
                reason: "hex length does not match algorithm",
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ReferenceError::InvalidDigest {
                digest: s.into(),
                reason: "value is not hex",
            });
        }
        Ok(Digest {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Computes the SHA-256 digest of `bytes`.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Digest {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Recomputes this digest's algorithm over `bytes` and compares.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        let computed = match self.algorithm {
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        };
        computed == self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The tail of an image reference: a tag or a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tag(String),
    Digest(Digest),
}

/// A parsed image reference: `host[:port]/path[:tag|@algorithm:hex]`.
///
/// A missing selector defaults to the `latest` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    selector: Selector,
}

impl Reference {
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let invalid = |reason| ReferenceError::InvalidReference {
            reference: s.into(),
            reason,
        };

        let (registry, rest) = s.split_once('/').ok_or(invalid("missing registry host"))?;
        if registry.is_empty() || rest.is_empty() {
            return Err(invalid("empty registry or repository"));
        }
        // The host is distinguished from a repository path segment the way
        // container tooling does: it must contain a dot or a port, or be
        // `localhost`.
        let host_part = registry.split(':').next().unwrap_or(registry);
        if !registry.contains('.') && !registry.contains(':') && host_part != "localhost" {
            return Err(invalid("registry host must contain `.`, a port, or be localhost"));
        }

        let (repository, selector) = if let Some((path, digest)) = rest.split_once('@') {
            (path, Selector::Digest(Digest::parse(digest)?))
        } else if let Some((path, tag)) = rest.rsplit_once(':') {
            if tag.is_empty() || !is_valid_tag(tag) {
                return Err(invalid("invalid tag"));
            }
            (path, Selector::Tag(tag.to_owned()))
        } else {
            (rest, Selector::Tag("latest".to_owned()))
        };

        if repository.is_empty() || !is_valid_repository(repository) {
            return Err(invalid("invalid repository path"));
        }

        Ok(Reference {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            selector,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The digest selector, if this reference is already pinned.
    pub fn digest(&self) -> Option<&Digest> {
        match &self.selector {
            Selector::Digest(d) => Some(d),
            Selector::Tag(_) => None,
        }
    }

    /// Returns this reference pinned to `digest`, dropping any tag.
    pub fn with_digest(&self, digest: Digest) -> Reference {
        Reference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            selector: Selector::Digest(digest),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Selector::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Selector::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

fn is_valid_tag(tag: &str) -> bool {
    tag.len() <= 128
        && tag
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

fn is_valid_repository(repo: &str) -> bool {
    repo.split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'))
    })
}

/// A content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,

    pub digest: Digest,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// An OCI image manifest. The `subject` field, when present, is what makes
/// this manifest a referrer of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    pub config: Descriptor,

    #[serde(default)]
    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

fn default_schema_version() -> u32 {
    2
}

impl Manifest {
    /// First layer carrying the given media type.
    pub fn layer_with_media_type(&self, media_type: &str) -> Option<&Descriptor> {
        self.layers.iter().find(|l| l.media_type == media_type)
    }
}
