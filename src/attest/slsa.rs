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

//! SLSA v1 provenance validation.
//!
//! The verdict is the trusted-builder check alone: `builder.id` must
//! equal the caller's trusted-builder URI byte-for-byte after NFC
//! normalization. Repository and workflow attribution are extracted for
//! reporting and never affect the verdict.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization as _;

use crate::intoto::Statement;
use crate::oci::Digest;

#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    #[error("malformed SLSA provenance predicate")]
    Malformed(#[source] serde_json::Error),

    #[error("provenance has no builder id")]
    MissingBuilderId,
}

/// The SLSA v1 predicate, structurally.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    #[serde(default)]
    pub build_type: String,

    #[serde(default)]
    pub external_parameters: serde_json::Value,

    #[serde(default)]
    pub internal_parameters: Option<serde_json::Value>,

    #[serde(default)]
    pub resolved_dependencies: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    #[serde(default)]
    pub builder: Option<Builder>,

    #[serde(default)]
    pub metadata: Option<BuildMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Builder {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    #[serde(default)]
    pub invocation_id: Option<String>,

    #[serde(default)]
    pub started_on: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub finished_on: Option<chrono::DateTime<chrono::Utc>>,
}

/// Outcome of validating one SLSA attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlsaOutcome {
    /// Whether the builder id matched the trusted builder.
    pub valid: bool,

    pub builder: String,

    /// `owner/repo` attribution, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Workflow path attribution, informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    /// The statement subject digest that matched the pinned manifest
    /// digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Validates the SLSA predicate of a verified statement against the
/// trusted builder, recording which subject matched `pinned`.
pub fn validate(
    statement: &Statement,
    trusted_builder: &str,
    pinned: &Digest,
) -> Result<SlsaOutcome, ProvenanceError> {
    let provenance: Provenance =
        serde_json::from_value(statement.predicate.clone()).map_err(ProvenanceError::Malformed)?;

    let builder_id = provenance
        .run_details
        .builder
        .as_ref()
        .map(|b| b.id.clone())
        .filter(|id| !id.is_empty())
        .ok_or(ProvenanceError::MissingBuilderId)?;

    // Exact equality after NFC; no trimming, no case folding.
    let valid = nfc(&builder_id) == nfc(trusted_builder);

    let repository = provenance
        .run_details
        .metadata
        .as_ref()
        .and_then(|m| m.invocation_id.as_deref())
        .and_then(repository_from_invocation)
        .or_else(|| repository_from_parameters(&provenance.build_definition.external_parameters));

    let workflow = provenance.build_definition.external_parameters["workflow"]["path"]
        .as_str()
        .map(str::to_owned);

    let digest = statement
        .subject_matching(pinned)
        .map(|_| pinned.to_string());

    Ok(SlsaOutcome {
        valid,
        builder: builder_id,
        repository,
        workflow,
        digest,
    })
}

fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Extracts `owner/repo` from an invocation id like
/// `https://github.com/owner/repo/actions/runs/123/attempts/1`.
fn repository_from_invocation(invocation_id: &str) -> Option<String> {
    let url = url::Url::parse(invocation_id).ok()?;
    if url.host_str() != Some("github.com") {
        return None;
    }
    let mut segments = url.path_segments()?;
    let owner = segments.next().filter(|s| !s.is_empty())?;
    let repo = segments.next().filter(|s| !s.is_empty())?;
    Some(format!("{owner}/{repo}"))
}

fn repository_from_parameters(external_parameters: &serde_json::Value) -> Option<String> {
    external_parameters["workflow"]["repository"]
        .as_str()
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intoto::{PREDICATE_SLSA_PROVENANCE_V1, STATEMENT_TYPE_V1};
    use rstest::rstest;

    const BUILDER: &str =
        "https://github.com/example/repo/.github/workflows/build.yml@refs/heads/main";

    fn statement_with(builder_id: &str, subject_hex: &str) -> Statement {
        let json = serde_json::json!({
            "_type": STATEMENT_TYPE_V1,
            "subject": [{ "name": "plugin", "digest": { "sha256": subject_hex } }],
            "predicateType": PREDICATE_SLSA_PROVENANCE_V1,
            "predicate": {
                "buildDefinition": {
                    "buildType": "https://actions.github.io/buildtypes/workflow/v1",
                    "externalParameters": {
                        "workflow": {
                            "path": ".github/workflows/build.yml",
                            "repository": "https://github.com/example/repo"
                        }
                    }
                },
                "runDetails": {
                    "builder": { "id": builder_id },
                    "metadata": {
                        "invocationId": "https://github.com/example/repo/actions/runs/42/attempts/1"
                    }
                }
            }
        });
        Statement::from_payload(serde_json::to_vec(&json).unwrap().as_slice()).unwrap()
    }

    fn pinned(hex: &str) -> Digest {
        Digest::parse(&format!("sha256:{hex}")).unwrap()
    }

    #[test]
    fn trusted_builder_matches() {
        let hex = "a".repeat(64);
        let outcome = validate(&statement_with(BUILDER, &hex), BUILDER, &pinned(&hex)).unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.builder, BUILDER);
        assert_eq!(outcome.repository.as_deref(), Some("example/repo"));
        assert_eq!(outcome.workflow.as_deref(), Some(".github/workflows/build.yml"));
        assert_eq!(outcome.digest.as_deref(), Some(&*format!("sha256:{hex}")));
    }

    #[rstest]
    #[case(format!("{BUILDER}\n"))] // trailing newline
    #[case(format!("{BUILDER}/"))] // trailing slash
    #[case(BUILDER.to_uppercase())] // case change
    fn near_miss_builders_are_untrusted(#[case] claimed: String) {
        let hex = "a".repeat(64);
        let outcome = validate(&statement_with(&claimed, &hex), BUILDER, &pinned(&hex)).unwrap();
        assert!(!outcome.valid, "builder {claimed:?} must not match");
    }

    #[test]
    fn nfc_equivalent_builders_match() {
        // U+00E9 vs U+0065 U+0301: same text after NFC.
        let composed = "https://github.com/caf\u{e9}/repo/wf.yml";
        let decomposed = "https://github.com/cafe\u{301}/repo/wf.yml";
        let hex = "a".repeat(64);
        let outcome =
            validate(&statement_with(decomposed, &hex), composed, &pinned(&hex)).unwrap();
        assert!(outcome.valid);
    }

    #[test]
    fn missing_builder_id_is_an_error() {
        let json = serde_json::json!({
            "_type": STATEMENT_TYPE_V1,
            "subject": [{ "name": "p", "digest": { "sha256": "a".repeat(64) } }],
            "predicateType": PREDICATE_SLSA_PROVENANCE_V1,
            "predicate": {
                "buildDefinition": { "buildType": "t", "externalParameters": {} },
                "runDetails": {}
            }
        });
        let statement =
            Statement::from_payload(serde_json::to_vec(&json).unwrap().as_slice()).unwrap();
        assert!(matches!(
            validate(&statement, BUILDER, &pinned(&"a".repeat(64))),
            Err(ProvenanceError::MissingBuilderId)
        ));
    }

    #[test]
    fn repository_falls_back_to_external_parameters() {
        let hex = "a".repeat(64);
        let mut statement = statement_with(BUILDER, &hex);
        statement.predicate["runDetails"]["metadata"]["invocationId"] =
            serde_json::Value::String("not a url".into());
        let outcome = validate(&statement, BUILDER, &pinned(&hex)).unwrap();
        assert_eq!(
            outcome.repository.as_deref(),
            Some("https://github.com/example/repo")
        );
    }

    #[test]
    fn unmatched_subject_leaves_digest_unset() {
        let outcome = validate(
            &statement_with(BUILDER, &"a".repeat(64)),
            BUILDER,
            &pinned(&"b".repeat(64)),
        )
        .unwrap();
        assert!(outcome.digest.is_none());
    }
}
