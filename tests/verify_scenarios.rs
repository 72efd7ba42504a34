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

//! End-to-end orchestrator scenarios against an in-memory registry.
//!
//! Cryptographic verification is substituted with a binding-only double
//! (the crypto pipeline has its own suites); these tests pin down
//! discovery, routing, aggregation and failure-propagation semantics.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{
    bundle_bytes, hex_digest, sbom_statement, slsa_statement, BindingOnlyVerifier, FakeRegistry,
};
use dragonglass::attest::{AttestationVerifier, TrustPolicy};
use dragonglass::oci::Reference;
use dragonglass::trust::{ManualTrustRoot, TrustRoot, TrustRootError, TrustRootProvider};
use dragonglass::VerifyError;

const TRUSTED_BUILDER: &str =
    "https://github.com/example/repo/.github/workflows/build.yml@refs/heads/main";

fn image() -> Reference {
    format!("ghcr.io/example/plugin@sha256:{}", hex_digest('a'))
        .parse()
        .expect("reference parses")
}

fn verifier_over(registry: FakeRegistry) -> AttestationVerifier {
    AttestationVerifier::new(
        Arc::new(registry),
        Arc::new(ManualTrustRoot::new(TrustRoot::default())),
    )
    .with_bundle_verifier(Arc::new(BindingOnlyVerifier))
}

async fn run(registry: FakeRegistry) -> (dragonglass::attest::VerificationReport, String) {
    let verifier = verifier_over(registry);
    let (report, pinned) = verifier
        .verify(&image(), &TrustPolicy::new(TRUSTED_BUILDER), &CancellationToken::new())
        .await
        .expect("verify completes");
    (report, pinned.to_string())
}

#[tokio::test]
async fn s1_trusted_slsa_attestation_is_valid() {
    let subject = hex_digest('a');
    let registry = FakeRegistry::with_bundles(
        &subject,
        vec![bundle_bytes(&slsa_statement(&subject, TRUSTED_BUILDER))],
    );

    let (report, pinned) = run(registry).await;

    assert_eq!(pinned, format!("sha256:{subject}"));
    assert!(report.found);
    assert!(report.valid);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);

    let slsa = report.slsa.expect("slsa outcome");
    assert!(slsa.valid);
    assert_eq!(slsa.builder, TRUSTED_BUILDER);
    assert_eq!(slsa.repository.as_deref(), Some("example/repo"));
    assert_eq!(slsa.digest.as_deref(), Some(&*format!("sha256:{subject}")));
    assert!(report.sbom.is_none());
}

#[tokio::test]
async fn s2_near_miss_builder_is_found_but_invalid() {
    let subject = hex_digest('a');
    let claimed = format!("{TRUSTED_BUILDER}\n");
    let registry = FakeRegistry::with_bundles(
        &subject,
        vec![bundle_bytes(&slsa_statement(&subject, &claimed))],
    );

    let (report, _) = run(registry).await;

    assert!(report.found);
    assert!(!report.valid);
    assert!(!report.slsa.expect("slsa outcome").valid);
    // An untrusted builder is a policy outcome surfaced as a warning,
    // never a digest-mismatch error.
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert!(report.warnings.iter().any(|w| w.contains("untrusted builder")));
}

#[tokio::test]
async fn s3_subject_digest_mismatch_is_an_error() {
    let registry = FakeRegistry::with_bundles(
        &hex_digest('a'),
        vec![bundle_bytes(&slsa_statement(&hex_digest('b'), TRUSTED_BUILDER))],
    );

    let (report, _) = run(registry).await;

    assert!(report.found);
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1, "errors: {:?}", report.errors);
    assert!(report.errors[0].contains(&format!("sha256:{}", hex_digest('a'))));
    assert!(report.slsa.is_none());
}

#[tokio::test]
async fn s4_no_referrers_is_not_found() {
    let registry = FakeRegistry::with_bundles(&hex_digest('a'), vec![]);

    let (report, pinned) = run(registry).await;

    assert!(!report.found);
    assert!(!report.valid);
    assert!(report.errors.is_empty());
    assert!(report.warnings.is_empty());
    assert_eq!(pinned, format!("sha256:{}", hex_digest('a')));
}

#[tokio::test]
async fn s5_malformed_bundle_is_a_warning_alongside_a_valid_one() {
    let subject = hex_digest('a');
    let registry = FakeRegistry::with_bundles(
        &subject,
        vec![
            bundle_bytes(&slsa_statement(&subject, TRUSTED_BUILDER)),
            b"{ not json".to_vec(),
        ],
    );

    let (report, _) = run(registry).await;

    assert!(report.found);
    assert!(report.valid);
    assert!(report.slsa.expect("slsa outcome").valid);
    assert_eq!(report.warnings.len(), 1, "warnings: {:?}", report.warnings);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn s6_sbom_alone_never_makes_the_result_valid() {
    let subject = hex_digest('a');
    let registry = FakeRegistry::with_bundles(
        &subject,
        vec![bundle_bytes(&sbom_statement(&subject, 3))],
    );

    let (report, _) = run(registry).await;

    assert!(report.found);
    assert!(!report.valid);
    assert!(report.slsa.is_none());

    let sbom = report.sbom.expect("sbom outcome");
    assert!(sbom.valid);
    assert_eq!(sbom.format.to_string(), "SPDX-2.3");
    assert_eq!(sbom.components, 3);
}

#[tokio::test]
async fn slsa_and_sbom_referrers_aggregate() {
    let subject = hex_digest('a');
    let registry = FakeRegistry::with_bundles(
        &subject,
        vec![
            bundle_bytes(&slsa_statement(&subject, TRUSTED_BUILDER)),
            bundle_bytes(&sbom_statement(&subject, 2)),
        ],
    );

    let (report, _) = run(registry).await;

    assert!(report.found);
    assert!(report.valid);
    assert!(report.slsa.expect("slsa outcome").valid);
    assert!(report.sbom.expect("sbom outcome").valid);
}

#[tokio::test]
async fn raw_statement_blob_is_an_unverified_warning() {
    let subject = hex_digest('a');
    let raw = serde_json::to_vec(&slsa_statement(&subject, TRUSTED_BUILDER)).unwrap();
    let registry = FakeRegistry::with_bundles(&subject, vec![raw]);

    let (report, _) = run(registry).await;

    assert!(report.found);
    assert!(!report.valid, "an unverified statement must not count");
    assert!(report.slsa.is_none());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("unverified"));
}

#[tokio::test]
async fn cancellation_between_resolve_and_referrers() {
    let subject = hex_digest('a');
    let token = CancellationToken::new();
    let mut registry = FakeRegistry::with_bundles(
        &subject,
        vec![bundle_bytes(&slsa_statement(&subject, TRUSTED_BUILDER))],
    );
    registry.cancel_on_resolve = Some(token.clone());

    let verifier = verifier_over(registry);
    let result = verifier
        .verify(&image(), &TrustPolicy::new(TRUSTED_BUILDER), &token)
        .await;
    assert!(matches!(result, Err(VerifyError::Cancelled)));
}

struct UnavailableTrustRoot;

#[async_trait::async_trait]
impl TrustRootProvider for UnavailableTrustRoot {
    async fn snapshot(&self) -> Result<Arc<TrustRoot>, TrustRootError> {
        Err(TrustRootError::Unavailable("no snapshot".into()))
    }
}

#[tokio::test]
async fn unavailable_trust_root_aborts_the_run() {
    let subject = hex_digest('a');
    let registry = FakeRegistry::with_bundles(&subject, vec![]);
    let verifier = AttestationVerifier::new(Arc::new(registry), Arc::new(UnavailableTrustRoot))
        .with_bundle_verifier(Arc::new(BindingOnlyVerifier));

    let result = verifier
        .verify(&image(), &TrustPolicy::new(TRUSTED_BUILDER), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(VerifyError::TrustRoot(_))));
}

#[tokio::test]
async fn invalid_reference_fails_before_any_io() {
    assert!("not-a-reference".parse::<Reference>().is_err());
}

#[tokio::test]
async fn strict_policy_gates_installation() {
    let subject = hex_digest('a');
    let registry =
        FakeRegistry::with_bundles(&subject, vec![bundle_bytes(&sbom_statement(&subject, 1))]);

    let (report, _) = run(registry).await;

    assert!(!TrustPolicy::new(TRUSTED_BUILDER).strict().allows_install(&report));
    // Non-strict: no integrity errors, so installation is allowed with
    // warnings surfaced to the caller.
    assert!(TrustPolicy::new(TRUSTED_BUILDER).allows_install(&report));
}
