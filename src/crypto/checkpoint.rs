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

//! Transparency-log checkpoints in the signed-note format.
//!
//! A checkpoint is a note whose body carries the log origin, tree size
//! and root hash, followed by a blank line and signature lines of the
//! form `U+2014 SP <name> SP base64(key-hint || signature)`. The signed
//! message is the body including its trailing newline.

use base64::engine::general_purpose::STANDARD as base64;
use base64::Engine as _;

use super::keyring::Keyring;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint is not a signed note")]
    NotASignedNote,

    #[error("checkpoint is missing its {0}")]
    MissingField(&'static str),

    #[error("checkpoint tree size is not a number")]
    BadTreeSize,

    #[error("checkpoint root hash is not a 32-byte base64 value")]
    BadRootHash,

    #[error("no checkpoint signature verifies against the log key")]
    SignatureInvalid,
}

/// A parsed checkpoint note.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    origin: String,
    tree_size: u64,
    root_hash: [u8; 32],
    /// The signed message: the note body including its final newline.
    signed_message: String,
    /// Raw signature bytes with their four-byte key hints stripped.
    signatures: Vec<Vec<u8>>,
}

impl Checkpoint {
    pub fn parse(envelope: &str) -> Result<Self, CheckpointError> {
        let (body, signature_section) = envelope
            .split_once("\n\n")
            .ok_or(CheckpointError::NotASignedNote)?;

        let mut lines = body.lines();
        let origin = lines
            .next()
            .ok_or(CheckpointError::MissingField("origin"))?
            .to_owned();
        let tree_size = lines
            .next()
            .ok_or(CheckpointError::MissingField("tree size"))?
            .parse()
            .map_err(|_| CheckpointError::BadTreeSize)?;
        let root_hash: [u8; 32] = base64
            .decode(lines.next().ok_or(CheckpointError::MissingField("root hash"))?)
            .map_err(|_| CheckpointError::BadRootHash)?
            .try_into()
            .map_err(|_| CheckpointError::BadRootHash)?;

        let signatures = signature_section
            .lines()
            .filter_map(|line| {
                let rest = line.strip_prefix("\u{2014} ")?;
                let (_, sig_b64) = rest.rsplit_once(' ')?;
                let decoded = base64.decode(sig_b64).ok()?;
                // The first four bytes hint at the signing key.
                (decoded.len() > 4).then(|| decoded[4..].to_vec())
            })
            .collect();

        Ok(Checkpoint {
            origin,
            tree_size,
            root_hash,
            signed_message: format!("{body}\n"),
            signatures,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn tree_size(&self) -> u64 {
        self.tree_size
    }

    pub fn root_hash(&self) -> &[u8; 32] {
        &self.root_hash
    }

    /// Verifies that some signature line validates against the log key
    /// identified by `log_id`.
    pub fn verify_signature(
        &self,
        log_id: &[u8],
        keyring: &Keyring,
    ) -> Result<(), CheckpointError> {
        for signature in &self.signatures {
            if keyring
                .verify(log_id, signature, self.signed_message.as_bytes())
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(CheckpointError::SignatureInvalid)
    }
}
