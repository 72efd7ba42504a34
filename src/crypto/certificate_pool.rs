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

//! A pool of trusted Fulcio certificates for chain validation.

use webpki::types::{CertificateDer, SignatureVerificationAlgorithm, TrustAnchor, UnixTime};
use webpki::{anchor_from_trusted_cert, EndEntityCert, KeyUsage, VerifiedPath};

/// id-kp-codeSigning (1.3.6.1.5.5.7.3.3).
static CODE_SIGNING: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03];

static SUPPORTED_SIG_ALGS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P256_SHA384,
    webpki::ring::ECDSA_P384_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
    webpki::ring::ED25519,
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
];

#[derive(Debug, thiserror::Error)]
pub enum CertificatePoolError {
    #[error("trusted certificate is not usable as an anchor")]
    InvalidAnchor(#[source] webpki::Error),

    #[error("the certificate pool contains no trust anchors")]
    Empty,
}

/// Trust anchors (plus optional untrusted intermediates) against which
/// signing certificates are validated.
///
/// The sigstore trusted root ships the Fulcio root and its intermediates
/// together; all of them are loaded as anchors so a leaf chains no matter
/// which of them issued it.
pub struct CertificatePool {
    trusted_roots: Vec<TrustAnchor<'static>>,
    intermediates: Vec<CertificateDer<'static>>,
}

impl CertificatePool {
    pub fn from_certificates(
        trusted: impl IntoIterator<Item = CertificateDer<'static>>,
        untrusted_intermediates: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Result<Self, CertificatePoolError> {
        let mut trusted_roots = Vec::new();
        for der in trusted {
            let anchor = anchor_from_trusted_cert(&der)
                .map_err(CertificatePoolError::InvalidAnchor)?
                .to_owned();
            trusted_roots.push(anchor);
        }
        if trusted_roots.is_empty() {
            return Err(CertificatePoolError::Empty);
        }
        Ok(Self {
            trusted_roots,
            intermediates: untrusted_intermediates.into_iter().collect(),
        })
    }

    /// Builds and verifies a path from `cert` to one of the pool's anchors
    /// at `verification_time`, requiring the code-signing EKU.
    pub fn verify_cert_with_time<'a>(
        &'a self,
        cert: &'a EndEntityCert<'a>,
        verification_time: UnixTime,
    ) -> Result<VerifiedPath<'a>, webpki::Error> {
        cert.verify_for_usage(
            SUPPORTED_SIG_ALGS,
            &self.trusted_roots,
            &self.intermediates,
            verification_time,
            KeyUsage::required(CODE_SIGNING),
            None,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_fixtures::{FULCIO_INTERMEDIATE_PEM, FULCIO_ROOT_PEM, LEAF_CERT_PEM};
    use x509_cert::der::{DecodePem as _, Encode as _};
    use x509_cert::Certificate;

    fn der_of(pem: &str) -> CertificateDer<'static> {
        Certificate::from_pem(pem)
            .unwrap()
            .to_der()
            .unwrap()
            .into()
    }

    fn leaf_issued_at() -> UnixTime {
        let cert = Certificate::from_pem(LEAF_CERT_PEM).unwrap();
        UnixTime::since_unix_epoch(
            cert.tbs_certificate
                .validity
                .not_before
                .to_unix_duration(),
        )
    }

    #[test]
    fn production_leaf_chains_to_fulcio_root() {
        let pool = CertificatePool::from_certificates(
            [der_of(FULCIO_ROOT_PEM), der_of(FULCIO_INTERMEDIATE_PEM)],
            [],
        )
        .unwrap();

        let leaf_der = der_of(LEAF_CERT_PEM);
        let ee = EndEntityCert::try_from(&leaf_der).unwrap();
        pool.verify_cert_with_time(&ee, leaf_issued_at())
            .expect("leaf verifies against the production chain");
    }

    #[test]
    fn chain_fails_without_matching_root() {
        // Only the root, without the issuing intermediate: no path exists.
        let pool = CertificatePool::from_certificates([der_of(FULCIO_ROOT_PEM)], []).unwrap();

        let leaf_der = der_of(LEAF_CERT_PEM);
        let ee = EndEntityCert::try_from(&leaf_der).unwrap();
        assert!(pool.verify_cert_with_time(&ee, leaf_issued_at()).is_err());
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            CertificatePool::from_certificates([], []),
            Err(CertificatePoolError::Empty)
        ));
    }
}
