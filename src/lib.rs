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

//! Supply-chain verification for plugins distributed as OCI artifacts.
//!
//! `dragonglass` fetches sigstore attestation bundles attached to an OCI
//! artifact via the referrers API, verifies them cryptographically against
//! the sigstore trust root, validates their SLSA provenance and SPDX SBOM
//! predicates against a trusted-builder policy, and records the pinned
//! manifest digest in a per-vault lockfile.
//!
//! The high-level entry point is [`attest::AttestationVerifier`]:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dragonglass::attest::{AttestationVerifier, TrustPolicy};
//! use dragonglass::oci::client::{AnonymousCredentials, HttpRegistryClient};
//! use dragonglass::oci::Reference;
//! use dragonglass::trust::sigstore::SigstoreTrustRoot;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HttpRegistryClient::new(Arc::new(AnonymousCredentials))?;
//! let trust = SigstoreTrustRoot::new(None);
//! let verifier = AttestationVerifier::new(Arc::new(registry), Arc::new(trust));
//!
//! let image: Reference = "ghcr.io/example/plugin:1.2.3".parse()?;
//! let policy = TrustPolicy::new(
//!     "https://github.com/example/repo/.github/workflows/build.yml@refs/heads/main",
//! );
//! let (report, pinned) = verifier
//!     .verify(&image, &policy, &CancellationToken::new())
//!     .await?;
//! println!("verified {pinned}: valid={}", report.valid);
//! # Ok(())
//! # }
//! ```
//!
//! Module map, pipeline order:
//!
//! * [`oci`]: image references, digests, manifests, and the registry
//!   client (the only networked component besides the trust-root refresh).
//! * [`bundle`]: sigstore bundle v0.3 parsing and the DSSE envelope.
//! * [`trust`]: the sigstore trust root snapshot and its providers.
//! * [`crypto`]: keyrings, certificate pool, SCT and Merkle verification.
//! * [`verify`]: the bundle verifier and its policy surface.
//! * [`intoto`]: in-toto statement extraction.
//! * [`attest`]: SLSA/SBOM predicate validation and the orchestrator.
//! * [`lockfile`]: the per-vault record of verified installs.

#![forbid(unsafe_code)]

pub mod attest;
pub mod bundle;
pub mod crypto;
pub mod errors;
pub mod intoto;
pub mod lockfile;
pub mod oci;
pub mod plugin;
pub mod trust;
pub mod verify;

pub use errors::VerifyError;
