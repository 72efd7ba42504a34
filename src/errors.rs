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

//! Errors that abort an entire verification run.
//!
//! Most failures inside the pipeline are scoped to a single referrer and
//! degrade into warnings on the aggregate report; the variants here are the
//! ones that terminate [`attest::AttestationVerifier::verify`]
//! (crate::attest::AttestationVerifier::verify) outright.

use crate::oci::client::RegistryError;
use crate::oci::ReferenceError;
use crate::trust::TrustRootError;

/// Terminal failure of a verification run.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The image reference did not parse; returned before any I/O.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// The run was cancelled via its cancellation token.
    #[error("verification cancelled")]
    Cancelled,

    /// The run's deadline elapsed before it finished.
    #[error("verification deadline exceeded")]
    DeadlineExceeded,

    /// No usable trust-root snapshot could be obtained.
    #[error(transparent)]
    TrustRoot(#[from] TrustRootError),

    /// Resolution or a manifest-level integrity failure in the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
