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

//! RFC 6962 Merkle tree hashing and inclusion-proof verification.
//!
//! Rekor's tree is built over the decoded entry bodies; leaves are hashed
//! with a `0x00` prefix and interior nodes with `0x01`.

use sha2::{Digest as _, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum InclusionProofError {
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    IndexOutOfRange { index: u64, tree_size: u64 },

    #[error("inclusion proof has {got} hashes, expected {expected}")]
    WrongProofLength { got: usize, expected: usize },

    #[error("computed root does not match the checkpoint root")]
    RootMismatch,
}

/// `SHA-256(0x00 || entry)`.
pub fn leaf_hash(entry: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(entry);
    hasher.finalize().into()
}

/// `SHA-256(0x01 || left || right)`.
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Verifies an inclusion proof for the leaf at `index` in a tree of
/// `tree_size` leaves against `expected_root`.
pub fn verify_inclusion(
    index: u64,
    tree_size: u64,
    leaf: &[u8; 32],
    proof: &[[u8; 32]],
    expected_root: &[u8; 32],
) -> Result<(), InclusionProofError> {
    if index >= tree_size {
        return Err(InclusionProofError::IndexOutOfRange { index, tree_size });
    }

    // Split the proof into the "inner" part (below the point where the
    // leaf's path joins the rightmost path) and the "border" above it.
    let inner = inner_proof_size(index, tree_size);
    let border = (index >> inner).count_ones() as usize;
    if proof.len() != inner + border {
        return Err(InclusionProofError::WrongProofLength {
            got: proof.len(),
            expected: inner + border,
        });
    }

    let mut hash = *leaf;
    for (i, sibling) in proof[..inner].iter().enumerate() {
        if (index >> i) & 1 == 0 {
            hash = node_hash(&hash, sibling);
        } else {
            hash = node_hash(sibling, &hash);
        }
    }
    for sibling in &proof[inner..] {
        hash = node_hash(sibling, &hash);
    }

    if &hash == expected_root {
        Ok(())
    } else {
        Err(InclusionProofError::RootMismatch)
    }
}

fn inner_proof_size(index: u64, tree_size: u64) -> usize {
    (64 - (index ^ (tree_size - 1)).leading_zeros()) as usize
}
