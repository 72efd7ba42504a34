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

//! SPDX SBOM validation.
//!
//! The document is treated as opaque beyond its format tag and package
//! list. Vulnerability analysis is an extension point; an SBOM outcome
//! is never on its own sufficient to make the aggregate result valid.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::intoto::{PREDICATE_SPDX_V2_3, PREDICATE_SPDX_V3_0};

use super::Vulnerability;

/// Recognized SBOM document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SbomFormat {
    #[serde(rename = "SPDX-2.3")]
    Spdx2_3,
    #[serde(rename = "SPDX-3.0")]
    Spdx3_0,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl SbomFormat {
    pub fn from_predicate_type(predicate_type: &str) -> Self {
        match predicate_type {
            PREDICATE_SPDX_V2_3 => SbomFormat::Spdx2_3,
            PREDICATE_SPDX_V3_0 => SbomFormat::Spdx3_0,
            _ => SbomFormat::Unknown,
        }
    }
}

impl fmt::Display for SbomFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbomFormat::Spdx2_3 => f.write_str("SPDX-2.3"),
            SbomFormat::Spdx3_0 => f.write_str("SPDX-3.0"),
            SbomFormat::Unknown => f.write_str("Unknown"),
        }
    }
}

/// A package entry extracted from the SBOM: present only when both name
/// and version are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpdxPackage {
    pub name: String,
    pub version: String,
}

/// The extension point for vulnerability analysis over SBOM packages.
///
/// A production implementation consults a CVE database; the shipped
/// [`NoopAnalyzer`] reports nothing.
pub trait PackageAnalyzer: Send + Sync {
    fn analyze(&self, packages: &[SpdxPackage]) -> Vec<Vulnerability>;
}

/// Analyzer that reports no vulnerabilities.
pub struct NoopAnalyzer;

impl PackageAnalyzer for NoopAnalyzer {
    fn analyze(&self, _packages: &[SpdxPackage]) -> Vec<Vulnerability> {
        Vec::new()
    }
}

/// Outcome of validating one SBOM attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbomOutcome {
    pub valid: bool,

    pub format: SbomFormat,

    /// Count of entries in the document's package list.
    pub components: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Validates an SPDX predicate: assigns the format tag, counts packages,
/// extracts well-formed entries and runs the analyzer over them.
pub fn validate(
    predicate_type: &str,
    predicate: &serde_json::Value,
    analyzer: &dyn PackageAnalyzer,
) -> SbomOutcome {
    let format = SbomFormat::from_predicate_type(predicate_type);
    let valid = predicate.is_object();

    let entries = predicate["packages"].as_array();
    let components = entries.map_or(0, Vec::len);

    let packages: Vec<SpdxPackage> = entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let name = entry["name"].as_str()?;
            // SPDX 2.x calls the field versionInfo; 3.x shortens it.
            let version = entry["versionInfo"]
                .as_str()
                .or_else(|| entry["version"].as_str())?;
            Some(SpdxPackage {
                name: name.to_owned(),
                version: version.to_owned(),
            })
        })
        .collect();

    let vulnerabilities = if valid {
        analyzer.analyze(&packages)
    } else {
        Vec::new()
    };

    SbomOutcome {
        valid,
        format,
        components,
        vulnerabilities,
    }
}
