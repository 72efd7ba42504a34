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

//! Fulcio certificate helpers: extension OIDs from the sigstore OID
//! registry, identity extraction, and structural leaf/root checks.

use const_oid::ObjectIdentifier;
use sha2::{Digest as _, Sha256};
use x509_cert::der::asn1::Utf8StringRef;
use x509_cert::der::{Decode as _, Encode as _};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, SubjectAltName};
use x509_cert::Certificate;

macro_rules! oids {
    ($($(#[$attr:meta])* $name:ident = $value:literal),+ $(,)?) => {
        $($(#[$attr])* pub const $name: ObjectIdentifier = ObjectIdentifier::new_unwrap($value);)+
    };
}

oids! {
    /// OIDC issuer (legacy v1 encoding: raw string).
    OIDC_ISSUER_V1 = "1.3.6.1.4.1.57264.1.1",
    GITHUB_WORKFLOW_TRIGGER = "1.3.6.1.4.1.57264.1.2",
    GITHUB_WORKFLOW_SHA = "1.3.6.1.4.1.57264.1.3",
    GITHUB_WORKFLOW_NAME = "1.3.6.1.4.1.57264.1.4",
    GITHUB_WORKFLOW_REPOSITORY = "1.3.6.1.4.1.57264.1.5",
    GITHUB_WORKFLOW_REF = "1.3.6.1.4.1.57264.1.6",
    /// OIDC issuer (v2 encoding: DER UTF8String).
    OIDC_ISSUER_V2 = "1.3.6.1.4.1.57264.1.8",
    BUILD_SIGNER_URI = "1.3.6.1.4.1.57264.1.9",
    RUNNER_ENVIRONMENT = "1.3.6.1.4.1.57264.1.11",
    SOURCE_REPOSITORY_URI = "1.3.6.1.4.1.57264.1.12",
    SOURCE_REPOSITORY_REF = "1.3.6.1.4.1.57264.1.14",
    BUILD_CONFIG_URI = "1.3.6.1.4.1.57264.1.18",
    BUILD_TRIGGER = "1.3.6.1.4.1.57264.1.20",
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateValidationError {
    #[error("certificate is malformed")]
    Malformed(#[from] x509_cert::der::Error),

    #[error("certificate is a CA, expected a leaf")]
    IsCa,

    #[error("certificate is not a root CA")]
    NotRootCa,

    #[error("certificate key usage does not include digital signature")]
    NotSigningCertificate,
}

fn basic_constraints(cert: &Certificate) -> Option<BasicConstraints> {
    match cert.tbs_certificate.get::<BasicConstraints>() {
        Ok(Some((_, ext))) => Some(ext),
        _ => None,
    }
}

/// Checks that `cert` is usable as a signing leaf: not a CA, with the
/// digital-signature key usage bit set.
pub fn is_leaf(cert: &Certificate) -> Result<(), CertificateValidationError> {
    if basic_constraints(cert).is_some_and(|bc| bc.ca) {
        return Err(CertificateValidationError::IsCa);
    }
    match cert.tbs_certificate.get::<KeyUsage>() {
        Ok(Some((_, usage))) if usage.digital_signature() => Ok(()),
        Ok(_) => Err(CertificateValidationError::NotSigningCertificate),
        Err(e) => Err(e.into()),
    }
}

/// Checks that `cert` is a self-issued CA.
pub fn is_root_ca(cert: &Certificate) -> Result<(), CertificateValidationError> {
    let is_ca = basic_constraints(cert).is_some_and(|bc| bc.ca);
    if is_ca && cert.tbs_certificate.subject == cert.tbs_certificate.issuer {
        Ok(())
    } else {
        Err(CertificateValidationError::NotRootCa)
    }
}

/// Reads a Fulcio string extension. v2 extensions wrap the value in a DER
/// UTF8String; v1 extensions carry the raw bytes.
pub fn extension_value(cert: &Certificate, oid: &ObjectIdentifier) -> Option<String> {
    let extensions = cert.tbs_certificate.extensions.as_ref()?;
    let ext = extensions.iter().find(|e| e.extn_id == *oid)?;
    let bytes = ext.extn_value.as_bytes();
    if let Ok(utf8) = Utf8StringRef::from_der(bytes) {
        return Some(utf8.as_str().to_owned());
    }
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// The certificate's OIDC issuer, preferring the v2 extension.
pub fn oidc_issuer(cert: &Certificate) -> Option<String> {
    extension_value(cert, &OIDC_ISSUER_V2).or_else(|| extension_value(cert, &OIDC_ISSUER_V1))
}

/// All string-valued subject alternative names (URIs, emails, DNS names).
pub fn subject_alternative_names(cert: &Certificate) -> Vec<String> {
    let Ok(Some((_, san))) = cert.tbs_certificate.get::<SubjectAltName>() else {
        return Vec::new();
    };
    san.0
        .iter()
        .filter_map(|name| match name {
            GeneralName::UniformResourceIdentifier(uri) => Some(uri.as_str().to_owned()),
            GeneralName::Rfc822Name(email) => Some(email.as_str().to_owned()),
            GeneralName::DnsName(dns) => Some(dns.as_str().to_owned()),
            _ => None,
        })
        .collect()
}

/// Hex SHA-256 fingerprint of the DER encoding, for error context.
pub fn fingerprint_hex(cert: &Certificate) -> String {
    match cert.to_der() {
        Ok(der) => hex::encode(Sha256::digest(der)),
        Err(_) => "<unencodable certificate>".into(),
    }
}

/// The leaf validity window as Unix seconds.
pub fn validity_window(cert: &Certificate) -> (u64, u64) {
    let validity = &cert.tbs_certificate.validity;
    (
        validity.not_before.to_unix_duration().as_secs(),
        validity.not_after.to_unix_duration().as_secs(),
    )
}
