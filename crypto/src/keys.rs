//! Key management for MERIDIAN
//!
//! Handles key generation, loading from the environment, and address
//! derivation (the first 20 bytes of the Ed25519 public key).

use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey, SECRET_KEY_LENGTH};
use meridian_core::{Address, MeridianError, MeridianResult, PublicKey};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A keypair for signing and verification
#[derive(Clone)]
pub struct KeyPair {
    signing_key: Ed25519SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = Ed25519SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create keypair from seed bytes
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = Ed25519SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create keypair from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> MeridianResult<Self> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(MeridianError::InvalidPrivateKey);
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        Ok(Self::from_seed(&seed))
    }

    /// Create keypair from a hex-encoded secret key (e.g. `PRIVATE_KEY` env)
    pub fn from_hex_secret(s: &str) -> MeridianResult<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|_| MeridianError::InvalidPrivateKey)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = self.signing_key.verifying_key();
        PublicKey::from_bytes(verifying_key.to_bytes())
    }

    /// Get the address (first 20 bytes of the public key)
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key())
    }

    /// Get the secret key bytes (BE CAREFUL with this!)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the internal signing key for signing operations
    pub(crate) fn signing_key(&self) -> &Ed25519SigningKey {
        &self.signing_key
    }
}

/// Derive the account address from a public key
pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&public_key.as_bytes()[..20]);
    Address::from_bytes(bytes)
}

/// Verify that an address matches a public key
pub fn verify_address(address: &Address, public_key: &PublicKey) -> bool {
    address == &address_from_public_key(public_key)
}

/// Convert our PublicKey type to an Ed25519 verifying key
pub fn public_key_to_ed25519(key: &PublicKey) -> MeridianResult<Ed25519VerifyingKey> {
    Ed25519VerifyingKey::from_bytes(key.as_bytes()).map_err(|_| MeridianError::InvalidPublicKey)
}

/// Secure secret key storage (zeroizes on drop)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_keypair(&self) -> KeyPair {
        KeyPair::from_seed(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        assert!(verify_address(&kp.address(), &kp.public_key()));
    }

    #[test]
    fn test_keypair_from_seed_is_deterministic() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_seed(&seed);
        let kp2 = KeyPair::from_seed(&seed);

        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_address_is_public_key_prefix() {
        let kp = KeyPair::generate();
        let pubkey = kp.public_key();
        let addr = kp.address();
        assert_eq!(addr.as_bytes()[..], pubkey.as_bytes()[..20]);
    }

    #[test]
    fn test_hex_secret_roundtrip() {
        let kp = KeyPair::generate();
        let hex = hex::encode(kp.secret_bytes());
        let restored = KeyPair::from_hex_secret(&hex).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());

        let prefixed = format!("0x{}", hex);
        let restored = KeyPair::from_hex_secret(&prefixed).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn test_secret_key_wrapper() {
        let secret = SecretKey::new([42u8; 32]);
        let kp = secret.to_keypair();
        assert!(kp.public_key().as_bytes() != &[0u8; 32]);
    }
}
