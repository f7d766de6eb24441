//! SHA-256 hashing and the binary Merkle root
//!
//! The Merkle rule is shared verbatim by proposer, validator and
//! coordinator: pairs are hashed as `SHA-256(left || right)`, a trailing
//! odd element is carried to the next level unchanged, the empty list
//! hashes to `SHA-256("")` and a single element is its own root.

use meridian_core::Hash;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash::from_bytes(bytes)
}

/// Hash the concatenation of multiple pieces of data
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash::from_bytes(bytes)
}

/// Merkle root over a list of transaction hashes
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return sha256(b"");
    }

    let mut current_level: Vec<Hash> = leaves.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));

        for chunk in current_level.chunks(2) {
            if chunk.len() == 2 {
                next_level.push(sha256_concat(&[chunk[0].as_bytes(), chunk[1].as_bytes()]));
            } else {
                // Odd leaf: carried up unchanged
                next_level.push(chunk[0]);
            }
        }

        current_level = next_level;
    }

    current_level[0]
}
