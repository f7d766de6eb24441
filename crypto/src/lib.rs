//! MERIDIAN cryptography
//!
//! Ed25519 keys and signatures, SHA-256 hashing, the shared Merkle rule
//! and the canonical JSON encoder every role hashes through.

pub mod canonical;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use canonical::{canonical_bytes, canonical_hash, canonical_string};
pub use hashing::{merkle_root, sha256, sha256_concat};
pub use keys::{address_from_public_key, verify_address, KeyPair, SecretKey};
pub use signing::{is_valid_signature, sign, verify};
