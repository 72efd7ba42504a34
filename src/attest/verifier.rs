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

//! The verification orchestrator.
//!
//! Drives the pipeline for one image reference: resolve, discover
//! referrers, fetch and verify each bundle, validate predicates, and
//! aggregate. The pinned digest captured at resolution is the only value
//! later bundles are bound against; a registry that re-points the tag
//! mid-run cannot influence the outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt as _, TryStreamExt as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bundle::{Bundle, BUNDLE_V03_MEDIA_TYPE};
use crate::errors::VerifyError;
use crate::intoto::{PredicateKind, Statement};
use crate::oci::client::{RegistryClient, RegistryError};
use crate::oci::{Descriptor, Digest, Reference, PREDICATE_TYPE_ANNOTATION, SIGSTORE_BUNDLE_MEDIA_TYPE};
use crate::trust::TrustRootProvider;
use crate::verify::{BundleVerifier, CheckedBundle, Policy, Verifier};

use super::sbom::{NoopAnalyzer, PackageAnalyzer};
use super::{slsa, sbom, TrustPolicy, VerificationReport};

/// The OIDC issuer of GitHub Actions workflow identities.
pub const GITHUB_ACTIONS_OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// SAN pattern of the generic GitHub keyless identity.
const GITHUB_SAN_PATTERN: &str = "^https://github\\.com/.*";

/// Verifies the attestations attached to an OCI artifact.
pub struct AttestationVerifier {
    registry: Arc<dyn RegistryClient>,
    trust: Arc<dyn TrustRootProvider>,
    analyzer: Arc<dyn PackageAnalyzer>,
    bundle_verifier: Option<Arc<dyn BundleVerifier>>,
    referrer_concurrency: usize,
}

impl AttestationVerifier {
    pub fn new(registry: Arc<dyn RegistryClient>, trust: Arc<dyn TrustRootProvider>) -> Self {
        Self {
            registry,
            trust,
            analyzer: Arc::new(NoopAnalyzer),
            bundle_verifier: None,
            referrer_concurrency: 4,
        }
    }

    /// Installs a vulnerability analyzer over SBOM packages.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn PackageAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Substitutes the cryptographic verifier; the seam used by test
    /// doubles.
    pub fn with_bundle_verifier(mut self, verifier: Arc<dyn BundleVerifier>) -> Self {
        self.bundle_verifier = Some(verifier);
        self
    }

    pub fn with_referrer_concurrency(mut self, concurrency: usize) -> Self {
        self.referrer_concurrency = concurrency.max(1);
        self
    }

    /// Verifies all attestations for `image` under `policy`, returning
    /// the aggregate report and the pinned manifest digest.
    pub async fn verify(
        &self,
        image: &Reference,
        policy: &TrustPolicy,
        cancel: &CancellationToken,
    ) -> Result<(VerificationReport, Digest), VerifyError> {
        info!(event = "verify.start", image = %image);

        let snapshot = self.trust.snapshot().await?;
        let verifier: Arc<dyn BundleVerifier> = match &self.bundle_verifier {
            Some(seam) => Arc::clone(seam),
            None => Arc::new(Verifier::new(&snapshot)?),
        };

        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        // 1. Resolve; the digest recorded here is the binding target for
        // everything that follows.
        let subject = self.registry.resolve(image).await?;
        let pinned = subject.digest.clone();
        info!(event = "verify.resolve", image = %image, digest = %pinned);

        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        // 2. Referrer discovery.
        let referrers = self
            .registry
            .list_referrers(image, &subject, Some(BUNDLE_V03_MEDIA_TYPE))
            .await?;

        let mut report = VerificationReport::empty();
        report.artifact_digest = Some(pinned.clone());

        // 3. No referrers: found = false, and nothing else to say.
        if referrers.is_empty() {
            info!(event = "verify.aggregate", image = %image, found = false, valid = false);
            info!(event = "verify.end", image = %image, digest = %pinned);
            return Ok((report, pinned));
        }
        report.found = true;

        // 4. Per-referrer verification. Outcomes are commutative, so
        // bounded unordered concurrency is safe; cancellation is checked
        // at each referrer boundary.
        let bundle_policy = self.bundle_policy(policy, &pinned);
        let outcomes: Vec<ReferrerOutcome> = stream::iter(referrers)
            .map(|referrer| {
                self.process_referrer(image, referrer, &bundle_policy, policy, &pinned, cancel, &verifier)
            })
            .buffer_unordered(self.referrer_concurrency)
            .try_collect()
            .await?;

        // 5. Aggregate: only a trusted-builder SLSA attestation makes the
        // result valid.
        for outcome in outcomes {
            report.warnings.extend(outcome.warnings);
            report.errors.extend(outcome.errors);
            if let Some(slsa_outcome) = outcome.slsa {
                if report.slsa.as_ref().map_or(true, |existing| !existing.valid) {
                    report.slsa = Some(slsa_outcome);
                }
            }
            if let Some(sbom_outcome) = outcome.sbom {
                if report.sbom.as_ref().map_or(true, |existing| !existing.valid) {
                    report.sbom = Some(sbom_outcome);
                }
            }
        }
        report.valid = report.slsa.as_ref().is_some_and(|s| s.valid);

        info!(
            event = "verify.aggregate",
            image = %image,
            found = report.found,
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
        );
        info!(event = "verify.end", image = %image, digest = %pinned);
        Ok((report, pinned))
    }

    /// [`AttestationVerifier::verify`] under a deadline.
    pub async fn verify_with_deadline(
        &self,
        image: &Reference,
        policy: &TrustPolicy,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<(VerificationReport, Digest), VerifyError> {
        tokio::time::timeout(deadline, self.verify(image, policy, cancel))
            .await
            .map_err(|_| VerifyError::DeadlineExceeded)?
    }

    /// The per-bundle policy: the caller's knobs, the pinned-digest
    /// binding, and the generic GitHub keyless identity.
    fn bundle_policy(&self, policy: &TrustPolicy, pinned: &Digest) -> Policy {
        Policy::bound_to_digest(pinned.clone())
            .with_issuer(GITHUB_ACTIONS_OIDC_ISSUER)
            .with_san_regex(GITHUB_SAN_PATTERN)
            .expect("static SAN pattern")
            .require_sct(policy.require_sct)
            .require_tlog(policy.require_tlog)
            .require_integrated_timestamps(policy.require_integrated_timestamps)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_referrer(
        &self,
        image: &Reference,
        referrer: Descriptor,
        bundle_policy: &Policy,
        policy: &TrustPolicy,
        pinned: &Digest,
        cancel: &CancellationToken,
        verifier: &Arc<dyn BundleVerifier>,
    ) -> Result<ReferrerOutcome, VerifyError> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        let mut outcome = ReferrerOutcome::default();
        let hint = referrer.annotation(PREDICATE_TYPE_ANNOTATION).map(str::to_owned);
        debug!(
            event = "verify.referrer",
            image = %image,
            referrer = %referrer.digest,
            predicate_hint = hint.as_deref().unwrap_or(""),
        );

        // a. The referrer manifest, and its single bundle layer.
        let manifest = match self.registry.fetch_manifest(image, &referrer).await {
            Ok(manifest) => manifest,
            Err(err) => return outcome.registry_failure(&referrer, err),
        };
        let Some(layer) = manifest.layer_with_media_type(SIGSTORE_BUNDLE_MEDIA_TYPE) else {
            outcome.warnings.push(format!(
                "referrer {}: no sigstore bundle layer in attestation manifest",
                referrer.digest
            ));
            return Ok(outcome);
        };

        // b. The bundle bytes.
        let bytes = match self.registry.fetch_blob(image, layer).await {
            Ok(bytes) => bytes,
            Err(err) => return outcome.registry_failure(&referrer, err),
        };

        // c. Parse. A malformed bundle spoils this referrer only. A blob
        // that is a bare in-toto statement is surfaced as an unverified
        // attachment and never contributes to validity.
        let bundle = match Bundle::from_slice(&bytes) {
            Ok(bundle) => bundle,
            Err(err) => {
                if let Ok(statement) = Statement::from_payload(&bytes) {
                    outcome.warnings.push(format!(
                        "referrer {}: unverified raw attestation ({}) ignored",
                        referrer.digest, statement.predicate_type
                    ));
                } else {
                    outcome
                        .warnings
                        .push(format!("referrer {}: {err}", referrer.digest));
                }
                debug!(event = "verify.bundle.parse", referrer = %referrer.digest, ok = false);
                return Ok(outcome);
            }
        };
        debug!(event = "verify.bundle.parse", referrer = %referrer.digest, ok = true);

        // d. Cryptographic verification under the bound policy.
        let payload = {
            let checked = match CheckedBundle::try_from(&bundle) {
                Ok(checked) => checked,
                Err(err) => {
                    outcome
                        .warnings
                        .push(format!("referrer {}: {err}", referrer.digest));
                    return Ok(outcome);
                }
            };
            match verifier.verify(&checked, bundle_policy) {
                Ok(payload) => payload,
                Err(err) => {
                    debug!(
                        event = "verify.bundle.verify",
                        referrer = %referrer.digest,
                        ok = false,
                        error = %err,
                    );
                    let message = format!("referrer {}: {err}", referrer.digest);
                    if err.is_integrity() {
                        outcome.errors.push(message);
                    } else {
                        outcome.warnings.push(message);
                    }
                    return Ok(outcome);
                }
            }
        };
        debug!(event = "verify.bundle.verify", referrer = %referrer.digest, ok = true);

        // e. Statement extraction and predicate routing.
        let statement = match Statement::from_payload(&payload) {
            Ok(statement) => statement,
            Err(err) => {
                outcome
                    .warnings
                    .push(format!("referrer {}: {err}", referrer.digest));
                return Ok(outcome);
            }
        };
        match statement.predicate_kind() {
            PredicateKind::SlsaProvenanceV1 => {
                match slsa::validate(&statement, &policy.trusted_builder, pinned) {
                    Ok(slsa_outcome) => {
                        debug!(
                            event = "verify.predicate.slsa",
                            referrer = %referrer.digest,
                            builder = %slsa_outcome.builder,
                            valid = slsa_outcome.valid,
                        );
                        if !slsa_outcome.valid {
                            outcome.warnings.push(format!(
                                "referrer {}: untrusted builder {:?}",
                                referrer.digest, slsa_outcome.builder
                            ));
                        }
                        outcome.slsa = Some(slsa_outcome);
                    }
                    Err(err) => outcome
                        .warnings
                        .push(format!("referrer {}: {err}", referrer.digest)),
                }
            }
            PredicateKind::SpdxV2_3 | PredicateKind::SpdxV3_0 => {
                let sbom_outcome = sbom::validate(
                    &statement.predicate_type,
                    &statement.predicate,
                    self.analyzer.as_ref(),
                );
                debug!(
                    event = "verify.predicate.sbom",
                    referrer = %referrer.digest,
                    format = %sbom_outcome.format,
                    components = sbom_outcome.components,
                );
                outcome.sbom = Some(sbom_outcome);
            }
            PredicateKind::Unknown => {
                warn!(
                    event = "verify.predicate.unknown",
                    referrer = %referrer.digest,
                    predicate_type = %statement.predicate_type,
                );
                outcome.warnings.push(format!(
                    "referrer {}: unknown predicate type: {}",
                    referrer.digest, statement.predicate_type
                ));
            }
        }
        Ok(outcome)
    }
}

#[derive(Default)]
struct ReferrerOutcome {
    slsa: Option<slsa::SlsaOutcome>,
    sbom: Option<sbom::SbomOutcome>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ReferrerOutcome {
    /// Registry failures on a referrer degrade to warnings, except for
    /// integrity failures, which abort the entire run.
    fn registry_failure(
        mut self,
        referrer: &Descriptor,
        err: RegistryError,
    ) -> Result<ReferrerOutcome, VerifyError> {
        if matches!(err, RegistryError::DigestMismatch { .. }) {
            return Err(err.into());
        }
        self.warnings
            .push(format!("referrer {}: {err}", referrer.digest));
        Ok(self)
    }
}
