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

//! In-toto statement extraction.
//!
//! A statement pairs subjects (what is attested, identified by digest)
//! with a predicate (the claim). This module validates the envelope
//! shape; predicate-specific validation lives in [`crate::attest`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::oci::Digest;

/// Statement type URI, current.
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// Statement type URI, legacy.
pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";

/// SLSA v1 provenance predicate type.
pub const PREDICATE_SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";

/// SPDX 2.3 SBOM predicate type.
pub const PREDICATE_SPDX_V2_3: &str = "https://spdx.dev/Document/v2.3";

/// SPDX 3.0 SBOM predicate type.
pub const PREDICATE_SPDX_V3_0: &str = "https://spdx.dev/Document/v3.0";

#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    #[error("malformed statement")]
    Json(#[source] serde_json::Error),

    #[error("unsupported statement type {0:?}")]
    UnsupportedType(String),

    #[error("statement has no subjects")]
    NoSubjects,

    #[error("statement subject {index} has no recognized digest")]
    SubjectWithoutDigest { index: usize },
}

/// A validated in-toto statement.
#[derive(Debug, Clone, Deserialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    pub subject: Vec<Subject>,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    #[serde(default)]
    pub predicate: serde_json::Value,
}

/// A statement subject: a name and its digests by algorithm.
#[derive(Debug, Clone, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub digest: BTreeMap<String, String>,
}

impl Subject {
    /// Whether this subject lists `digest` under its algorithm, comparing
    /// hex case-insensitively.
    pub fn matches_digest(&self, digest: &Digest) -> bool {
        self.digest
            .get(digest.algorithm.as_str())
            .is_some_and(|hex| hex.eq_ignore_ascii_case(&digest.hex))
    }
}

/// Routing target for a statement's predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    SlsaProvenanceV1,
    SpdxV2_3,
    SpdxV3_0,
    Unknown,
}

impl Statement {
    /// Parses and validates a verified DSSE payload as a statement:
    /// recognized type URI, non-empty subjects, each subject carrying at
    /// least one recognized digest.
    pub fn from_payload(payload: &[u8]) -> Result<Self, StatementError> {
        let statement: Statement =
            serde_json::from_slice(payload).map_err(StatementError::Json)?;

        if statement.statement_type != STATEMENT_TYPE_V1
            && statement.statement_type != STATEMENT_TYPE_V01
        {
            return Err(StatementError::UnsupportedType(statement.statement_type));
        }
        if statement.subject.is_empty() {
            return Err(StatementError::NoSubjects);
        }
        for (index, subject) in statement.subject.iter().enumerate() {
            let recognized = subject
                .digest
                .iter()
                .any(|(alg, hex)| alg.parse::<crate::oci::DigestAlgorithm>().is_ok() && !hex.is_empty());
            if !recognized {
                return Err(StatementError::SubjectWithoutDigest { index });
            }
        }
        Ok(statement)
    }

    /// The first subject listing `digest`.
    pub fn subject_matching(&self, digest: &Digest) -> Option<&Subject> {
        self.subject.iter().find(|s| s.matches_digest(digest))
    }

    pub fn predicate_kind(&self) -> PredicateKind {
        match self.predicate_type.as_str() {
            PREDICATE_SLSA_PROVENANCE_V1 => PredicateKind::SlsaProvenanceV1,
            PREDICATE_SPDX_V2_3 => PredicateKind::SpdxV2_3,
            PREDICATE_SPDX_V3_0 => PredicateKind::SpdxV3_0,
            _ => PredicateKind::Unknown,
        }
    }
}
