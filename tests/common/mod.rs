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

//! Shared scaffolding for the integration suites: an in-memory registry,
//! a binding-only verifier double and bundle/statement builders.

// Each integration binary compiles this module separately and uses a
// different slice of it.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;

use dragonglass::intoto::Statement;
use dragonglass::oci::client::{RegistryClient, RegistryError};
use dragonglass::oci::{
    Descriptor, Digest, Manifest, Reference, SIGSTORE_BUNDLE_MEDIA_TYPE,
};
use dragonglass::verify::{
    ArtifactBinding, BundleVerifier, CheckedBundle, Policy, VerificationError,
};

/// A production Fulcio leaf; structurally valid for bundle checking.
pub const LEAF_CERT_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIICzDCCAlGgAwIBAgIUF96OLbM9/tDVHKCJliXLTFvnfjAwCgYIKoZIzj0EAwMw
NzEVMBMGA1UEChMMc2lnc3RvcmUuZGV2MR4wHAYDVQQDExVzaWdzdG9yZS1pbnRl
cm1lZGlhdGUwHhcNMjMxMjEzMDU1MDU1WhcNMjMxMjEzMDYwMDU1WjAAMFkwEwYH
KoZIzj0CAQYIKoZIzj0DAQcDQgAEmir+Lah2291zCsLkmREQNLzf99z571BNB+fa
rerSLGzcwLFK7GRLTGYcO0oStxCYavxRQPMo3JvB8vGtZbn/76OCAXAwggFsMA4G
A1UdDwEB/wQEAwIHgDATBgNVHSUEDDAKBggrBgEFBQcDAzAdBgNVHQ4EFgQU8U9M
t9GMrRm8+gifPtc63nlP3OIwHwYDVR0jBBgwFoAU39Ppz1YkEZb5qNjpKFWixi4Y
ZD8wGwYDVR0RAQH/BBEwD4ENYXNjQHRldHN1by5zaDAsBgorBgEEAYO/MAEBBB5o
dHRwczovL2dpdGh1Yi5jb20vbG9naW4vb2F1dGgwLgYKKwYBBAGDvzABCAQgDB5o
dHRwczovL2dpdGh1Yi5jb20vbG9naW4vb2F1dGgwgYkGCisGAQQB1nkCBAIEewR5
AHcAdQDdPTBqxscRMmMZHhyZZzcCokpeuN48rf+HinKALynujgAAAYxhumYsAAAE
AwBGMEQCIHRRe20lRrNM4xd07mpjTtgaE6FGS3jjF++zW8ZMnth3AiAd6LVAAeVW
hSW4T0XJRw9lGU6/EK9+ELZpEjrY03dJ1zAKBggqhkjOPQQDAwNpADBmAjEAiHqK
W9PQ/5h7VROVIWPaxUo3LhrL2sZanw4bzTDBDY0dRR19ZFzjtAph1RzpQqppAjEA
plAvxwkAIR2jurboJZ4Zm9rNAx8KvA+A5yQFzNkGgKDLjTJrKmSKoIcWV3j7WfdL
-----END CERTIFICATE-----"#;

/// The intermediate that issued [`LEAF_CERT_PEM`].
pub const FULCIO_INTERMEDIATE_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIICGjCCAaGgAwIBAgIUALnViVfnU0brJasmRkHrn/UnfaQwCgYIKoZIzj0EAwMw
KjEVMBMGA1UEChMMc2lnc3RvcmUuZGV2MREwDwYDVQQDEwhzaWdzdG9yZTAeFw0y
MjA0MTMyMDA2MTVaFw0zMTEwMDUxMzU2NThaMDcxFTATBgNVBAoTDHNpZ3N0b3Jl
LmRldjEeMBwGA1UEAxMVc2lnc3RvcmUtaW50ZXJtZWRpYXRlMHYwEAYHKoZIzj0C
AQYFK4EEACIDYgAE8RVS/ysH+NOvuDZyPIZtilgUF9NlarYpAd9HP1vBBH1U5CV7
7LSS7s0ZiH4nE7Hv7ptS6LvvR/STk798LVgMzLlJ4HeIfF3tHSaexLcYpSASr1kS
0N/RgBJz/9jWCiXno3sweTAOBgNVHQ8BAf8EBAMCAQYwEwYDVR0lBAwwCgYIKwYB
BQUHAwMwEgYDVR0TAQH/BAgwBgEB/wIBADAdBgNVHQ4EFgQU39Ppz1YkEZb5qNjp
KFWixi4YZD8wHwYDVR0jBBgwFoAUWMAeX5FFpWapesyQoZMi0CrFxfowCgYIKoZI
zj0EAwMDZwAwZAIwPCsQK4DYiZYDPIaDi5HFKnfxXx6ASSVmERfsynYBiX2X6SJR
nZU84/9DZdnFvvxmAjBOt6QpBlc4J/0DxvkTCqpclvziL6BCCPnjdlIB3Pu3BxsP
mygUY7Ii2zbdCdliiow=
-----END CERTIFICATE-----"#;

/// The self-signed sigstore root above the intermediate.
pub const FULCIO_ROOT_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIIB9zCCAXygAwIBAgIUALZNAPFdxHPwjeDloDwyYChAO/4wCgYIKoZIzj0EAwMw
KjEVMBMGA1UEChMMc2lnc3RvcmUuZGV2MREwDwYDVQQDEwhzaWdzdG9yZTAeFw0y
MTEwMDcxMzU2NTlaFw0zMTEwMDUxMzU2NThaMCoxFTATBgNVBAoTDHNpZ3N0b3Jl
LmRldjERMA8GA1UEAxMIc2lnc3RvcmUwdjAQBgcqhkjOPQIBBgUrgQQAIgNiAAT7
XeFT4rb3PQGwS4IajtLk3/OlnpgangaBclYpsYBr5i+4ynB07ceb3LP0OIOZdxex
X69c5iVuyJRQ+Hz05yi+UF3uBWAlHpiS5sh0+H2GHE7SXrk1EC5m1Tr19L9gg92j
YzBhMA4GA1UdDwEB/wQEAwIBBjAPBgNVHRMBAf8EBTADAQH/MB0GA1UdDgQWBBRY
wB5fkUWlZql6zJChkyLQKsXF+jAfBgNVHSMEGDAWgBRYwB5fkUWlZql6zJChkyLQ
KsXF+jAKBggqhkjOPQQDAwNpADBmAjEAj1nHeXZp+13NWBNa+EDsDP8G1WWg1tCM
WP/WHPqpaVo0jhsweNFZgSs0eE7wYI4qAjEA2WB9ot98sIkoF3vZYdd3/VtWB5b9
TNMea7Ix/stJ5TfcLLeABLE4BNJOsQ4vnBHJ
-----END CERTIFICATE-----"#;

/// CT log key that issued the SCT embedded in [`LEAF_CERT_PEM`].
pub const CTFE_KEY_PEM: &str = r#"-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEiPSlFi0CmFTfEjCUqF9HuCEcYXNK
AaYalIJmBZ8yyezPjTqhxrKBpMnaocVtLJBI1eM3uXnQzQGAJdJ4gs9Fyw==
-----END PUBLIC KEY-----"#;

/// The production Rekor public key.
pub const REKOR_KEY_PEM: &str = r#"-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE2G2Y+2tabdTV5BcGiBIx0a9fAFwr
kBbmLSGtks4L3qX6yYY0zufBnhC8Ur/iy55GhWP/9A/bY2LhC30M9+RYtw==
-----END PUBLIC KEY-----"#;

/// Decodes a PEM body to DER.
pub fn pem_der(pem: &str) -> Vec<u8> {
    pem.lines()
        .filter(|l| !l.starts_with("-----"))
        .flat_map(|l| base64.decode(l).expect("fixture PEM decodes"))
        .collect()
}

pub fn leaf_cert_b64() -> String {
    base64.encode(pem_der(LEAF_CERT_PEM))
}

pub fn hex_digest(fill: char) -> String {
    std::iter::repeat(fill).take(64).collect()
}

pub fn sha256(hex: &str) -> Digest {
    Digest::parse(&format!("sha256:{hex}")).expect("valid digest")
}

pub fn slsa_statement(subject_hex: &str, builder: &str) -> serde_json::Value {
    serde_json::json!({
        "_type": "https://in-toto.io/Statement/v1",
        "subject": [{
            "name": "plugin.tar.gz",
            "digest": { "sha256": subject_hex }
        }],
        "predicateType": "https://slsa.dev/provenance/v1",
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
                "builder": { "id": builder },
                "metadata": {
                    "invocationId": "https://github.com/example/repo/actions/runs/42/attempts/1"
                }
            }
        }
    })
}

pub fn sbom_statement(subject_hex: &str, packages: usize) -> serde_json::Value {
    let packages: Vec<_> = (0..packages)
        .map(|i| serde_json::json!({ "name": format!("pkg-{i}"), "versionInfo": "1.0.0" }))
        .collect();
    serde_json::json!({
        "_type": "https://in-toto.io/Statement/v1",
        "subject": [{
            "name": "plugin.tar.gz",
            "digest": { "sha256": subject_hex }
        }],
        "predicateType": "https://spdx.dev/Document/v2.3",
        "predicate": {
            "spdxVersion": "SPDX-2.3",
            "packages": packages
        }
    })
}

/// Wraps a statement into a structurally valid v0.3 bundle.
pub fn bundle_bytes(statement: &serde_json::Value) -> Vec<u8> {
    let payload = base64.encode(serde_json::to_vec(statement).expect("statement serializes"));
    let root = base64.encode([0u8; 32]);
    let checkpoint = format!("rekor.sigstore.dev - 1\n100\n{root}\n");
    serde_json::json!({
        "mediaType": "application/vnd.dev.sigstore.bundle.v0.3+json",
        "verificationMaterial": {
            "x509CertificateChain": {
                "certificates": [{ "rawBytes": leaf_cert_b64() }]
            },
            "tlogEntries": [{
                "logIndex": "42",
                "logId": { "keyId": base64.encode([7u8; 32]) },
                "kindVersion": { "kind": "dsse", "version": "0.0.1" },
                "integratedTime": "1702444255",
                "inclusionPromise": { "signedEntryTimestamp": "AAAA" },
                "inclusionProof": {
                    "logIndex": "42",
                    "rootHash": root,
                    "treeSize": "100",
                    "hashes": [],
                    "checkpoint": { "envelope": checkpoint }
                },
                "canonicalizedBody": "e30="
            }]
        },
        "dsseEnvelope": {
            "payloadType": "application/vnd.in-toto+json",
            "payload": payload,
            "signatures": [{ "sig": "AAAA" }]
        }
    })
    .to_string()
    .into_bytes()
}

/// In-memory registry double.
#[derive(Default)]
pub struct FakeRegistry {
    pub subject: Option<Descriptor>,
    pub referrers: Vec<Descriptor>,
    pub manifests: HashMap<String, Manifest>,
    pub blobs: HashMap<String, Vec<u8>>,
    /// When set, resolution cancels this token: models a caller that is
    /// cancelled between resolve and referrer processing.
    pub cancel_on_resolve: Option<CancellationToken>,
}

impl FakeRegistry {
    /// A registry whose subject has the given digest and one referrer
    /// per bundle blob.
    pub fn with_bundles(subject_hex: &str, bundles: Vec<Vec<u8>>) -> Self {
        let mut registry = FakeRegistry {
            subject: Some(Descriptor {
                media_type: "application/vnd.oci.image.manifest.v1+json".into(),
                digest: sha256(subject_hex),
                size: 1234,
                artifact_type: None,
                annotations: BTreeMap::new(),
            }),
            ..Default::default()
        };
        for blob in bundles {
            registry.add_bundle_referrer(blob);
        }
        registry
    }

    pub fn add_bundle_referrer(&mut self, blob: Vec<u8>) {
        let layer = Descriptor {
            media_type: SIGSTORE_BUNDLE_MEDIA_TYPE.into(),
            digest: Digest::sha256_of(&blob),
            size: blob.len() as u64,
            artifact_type: None,
            annotations: BTreeMap::new(),
        };
        let manifest = Manifest {
            schema_version: 2,
            media_type: Some("application/vnd.oci.image.manifest.v1+json".into()),
            artifact_type: Some(SIGSTORE_BUNDLE_MEDIA_TYPE.into()),
            config: Descriptor {
                media_type: "application/vnd.oci.empty.v1+json".into(),
                digest: Digest::sha256_of(b"{}"),
                size: 2,
                artifact_type: None,
                annotations: BTreeMap::new(),
            },
            layers: vec![layer.clone()],
            subject: self.subject.clone(),
            annotations: BTreeMap::new(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest).expect("manifest serializes");
        let referrer = Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json".into(),
            digest: Digest::sha256_of(&manifest_bytes),
            size: manifest_bytes.len() as u64,
            artifact_type: Some(SIGSTORE_BUNDLE_MEDIA_TYPE.into()),
            annotations: BTreeMap::new(),
        };
        self.manifests
            .insert(referrer.digest.to_string(), manifest);
        self.blobs.insert(layer.digest.to_string(), blob);
        self.referrers.push(referrer);
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, RegistryError> {
        let descriptor = self
            .subject
            .clone()
            .ok_or_else(|| RegistryError::RefNotFound(reference.to_string()))?;
        if let Some(token) = &self.cancel_on_resolve {
            token.cancel();
        }
        Ok(descriptor)
    }

    async fn fetch_manifest(
        &self,
        _reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Manifest, RegistryError> {
        self.manifests
            .get(&descriptor.digest.to_string())
            .cloned()
            .ok_or_else(|| RegistryError::RefNotFound(descriptor.digest.to_string()))
    }

    async fn fetch_blob(
        &self,
        _reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        self.blobs
            .get(&descriptor.digest.to_string())
            .cloned()
            .ok_or_else(|| RegistryError::RefNotFound(descriptor.digest.to_string()))
    }

    async fn list_referrers(
        &self,
        _reference: &Reference,
        _subject: &Descriptor,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, RegistryError> {
        Ok(self
            .referrers
            .iter()
            .filter(|d| artifact_type.is_none() || d.artifact_type.as_deref() == artifact_type)
            .cloned()
            .collect())
    }
}

/// Verifier double that skips cryptography but enforces artifact binding
/// exactly as the real verifier's final step does.
pub struct BindingOnlyVerifier;

impl BundleVerifier for BindingOnlyVerifier {
    fn verify(
        &self,
        bundle: &CheckedBundle,
        policy: &Policy,
    ) -> Result<Vec<u8>, VerificationError> {
        let payload = bundle.envelope.payload_bytes()?;
        if let ArtifactBinding::Digest(expected) = policy.binding() {
            let statement = Statement::from_payload(&payload)?;
            if statement.subject_matching(expected).is_none() {
                return Err(VerificationError::SubjectDigestMismatch {
                    expected: expected.clone(),
                });
            }
        }
        Ok(payload)
    }
}
