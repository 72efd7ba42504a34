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

//! Certificate Transparency validation for Fulcio signing certificates.
//!
//! Fulcio embeds the SCTs it receives from the CT log into the issued
//! certificate. Verification reconstructs the RFC 6962 `DigitallySigned`
//! structure over the precertificate (the TBS certificate with the SCT
//! list extension removed) and checks the log's signature against the CT
//! keyring from the trust root.

use const_oid::ObjectIdentifier;
use tls_codec::{SerializeBytes, TlsByteVecU16, TlsByteVecU24, TlsSerializeBytes, TlsSize};
use x509_cert::der::Encode as _;
use x509_cert::ext::pkix::sct::Version;
use x509_cert::ext::pkix::{
    BasicConstraints, ExtendedKeyUsage, SignedCertificateTimestamp, SignedCertificateTimestampList,
};
use x509_cert::Certificate;

use super::keyring::{Keyring, KeyringError};

const CT_PRECERT_SCTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.2");
const PRECERTIFICATE_SIGNING_CERTIFICATE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.4");

#[derive(Debug, thiserror::Error)]
pub enum SctError {
    #[error("certificate carries no SignedCertificateTimestampList extension")]
    ListMissing,

    #[error("invalid SignedCertificateTimestampList extension")]
    ListMalformed,

    #[error("cannot decode SCT")]
    Malformed,

    #[error("cannot determine the SCT issuer")]
    IssuerUnknown,

    #[error("failed to reconstruct the signed SCT structure")]
    ReEncoding,

    #[error("SCT signature verification failed")]
    Signature(#[from] KeyringError),
}

fn cert_is_preissuer(cert: &Certificate) -> bool {
    let eku: ExtendedKeyUsage = match cert.tbs_certificate.get() {
        Ok(Some((_, ext))) => ext,
        _ => return false,
    };
    eku.0.contains(&PRECERTIFICATE_SIGNING_CERTIFICATE)
}

/// Finds the certificate that submitted the precertificate to the log:
/// the leaf's issuer, unless a preissuer sat in between.
fn find_issuer_cert(chain: &[Certificate]) -> Option<&Certificate> {
    let cert = match chain {
        [first, ..] if cert_is_preissuer(first) => chain.get(1)?,
        [first, ..] => first,
        [] => return None,
    };

    let basic_constraints: BasicConstraints = match cert.tbs_certificate.get() {
        Ok(Some((_, ext))) => ext,
        _ => return None,
    };
    basic_constraints.ca.then_some(cert)
}

/// Computes the issuer SPKI (DER) from an issuing chain, leaf excluded.
pub fn issuer_spki_from_chain(chain: &[Certificate]) -> Result<Vec<u8>, SctError> {
    let issuer = find_issuer_cert(chain).ok_or(SctError::IssuerUnknown)?;
    issuer
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|_| SctError::IssuerUnknown)
}

#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
#[repr(u8)]
enum SignatureType {
    CertificateTimestamp = 0,
    #[allow(dead_code)]
    TreeHash = 1,
}

#[derive(PartialEq, Debug)]
#[repr(u16)]
enum LogEntryType {
    X509Entry = 0,
    PrecertEntry = 1,
}

#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
struct PreCert {
    // opaque issuer_key_hash[32];
    issuer_key_hash: [u8; 32],
    // opaque TBSCertificate<1..2^24-1>;
    tbs_certificate: TlsByteVecU24,
}

#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
#[repr(u16)]
enum SignedEntry {
    // opaque ASN.1Cert<1..2^24-1>;
    #[allow(dead_code)]
    #[tls_codec(discriminant = "LogEntryType::X509Entry")]
    X509Entry(TlsByteVecU24),
    #[tls_codec(discriminant = "LogEntryType::PrecertEntry")]
    PrecertEntry(PreCert),
}

/// The RFC 6962 structure whose TLS serialization the CT log signed.
#[derive(PartialEq, Debug, TlsSerializeBytes, TlsSize)]
struct DigitallySigned {
    version: Version,
    signature_type: SignatureType,
    timestamp: u64,
    signed_entry: SignedEntry,
    // opaque CtExtensions<0..2^16-1>;
    extensions: TlsByteVecU16,

    // Context needed at verification time but not part of the encoding.
    #[tls_codec(skip)]
    log_id: [u8; 32],
    #[tls_codec(skip)]
    signature: Vec<u8>,
}

/// One SCT embedded in a certificate, paired with the issuer key hash
/// needed to reconstruct the signed precertificate entry.
#[derive(Debug)]
pub struct CertificateEmbeddedSCT<'a> {
    cert: &'a Certificate,
    sct: SignedCertificateTimestamp,
    issuer_id: [u8; 32],
}

impl CertificateEmbeddedSCT<'_> {
    /// The SCT's millisecond timestamp as claimed by the log.
    pub fn timestamp_millis(&self) -> u64 {
        self.sct.timestamp
    }

    pub fn log_id(&self) -> [u8; 32] {
        self.sct.log_id.key_id
    }
}

/// Extracts every SCT embedded in `cert`. `issuer_spki` is the DER SPKI
/// of the certificate that submitted the precertificate.
pub fn embedded_scts<'a>(
    cert: &'a Certificate,
    issuer_spki: &[u8],
) -> Result<Vec<CertificateEmbeddedSCT<'a>>, SctError> {
    let scts: SignedCertificateTimestampList = match cert.tbs_certificate.get() {
        Ok(Some((_, ext))) => ext,
        Ok(None) => return Err(SctError::ListMissing),
        Err(_) => return Err(SctError::ListMalformed),
    };

    let issuer_id = {
        use sha2::Digest as _;
        sha2::Sha256::digest(issuer_spki).into()
    };

    scts.parse_timestamps()
        .map_err(|_| SctError::ListMalformed)?
        .iter()
        .map(|serialized| {
            let sct = serialized
                .parse_timestamp()
                .map_err(|_| SctError::Malformed)?;
            Ok(CertificateEmbeddedSCT {
                cert,
                sct,
                issuer_id,
            })
        })
        .collect()
}

impl TryFrom<&CertificateEmbeddedSCT<'_>> for DigitallySigned {
    type Error = SctError;

    fn try_from(value: &CertificateEmbeddedSCT<'_>) -> Result<Self, SctError> {
        // Reconstruct the precert by filtering out the SCT extension.
        let mut tbs_precert = value.cert.tbs_certificate.clone();
        tbs_precert.extensions = tbs_precert.extensions.map(|exts| {
            exts.iter()
                .filter(|v| v.extn_id != CT_PRECERT_SCTS)
                .cloned()
                .collect()
        });

        let mut tbs_precert_der = Vec::new();
        tbs_precert
            .encode_to_vec(&mut tbs_precert_der)
            .map_err(|_| SctError::ReEncoding)?;

        Ok(DigitallySigned {
            // `sct::Version` does not implement Copy.
            version: match value.sct.version {
                Version::V1 => Version::V1,
            },
            signature_type: SignatureType::CertificateTimestamp,
            timestamp: value.sct.timestamp,
            signed_entry: SignedEntry::PrecertEntry(PreCert {
                issuer_key_hash: value.issuer_id,
                tbs_certificate: tbs_precert_der.as_slice().into(),
            }),
            extensions: value.sct.extensions.clone(),

            log_id: value.sct.log_id.key_id,
            signature: value.sct.signature.signature.clone().into(),
        })
    }
}

/// Verifies a signing certificate's embedded SCT against the CT keyring.
///
/// Certificates that fail SCT verification are misissued and MUST NOT be
/// trusted; see RFC 6962 and
/// <https://certificate.transparency.dev/howctworks/>.
pub fn verify_sct(sct: &CertificateEmbeddedSCT<'_>, keyring: &Keyring) -> Result<(), SctError> {
    let signed: DigitallySigned = sct.try_into()?;
    let serialized = signed.tls_serialize().map_err(|_| SctError::ReEncoding)?;
    keyring.verify(&signed.log_id, &signed.signature, &serialized)?;
    Ok(())
}
