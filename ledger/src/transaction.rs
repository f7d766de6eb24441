//! Signed transfer transactions
//!
//! A transaction's `hash` is SHA-256 over the canonical JSON of every other
//! field; the sender's signature covers only the canonical JSON of
//! `{from, to, amount, sequence, timestamp_ms}`.

use meridian_core::{Address, Amount, Hash, MeridianError, MeridianResult, PublicKey, Signature, Timestamp};
use meridian_crypto::canonical::{canonical_hash, canonical_string};
use meridian_crypto::keys::{verify_address, KeyPair};
use meridian_crypto::signing::{sign, verify};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Fixed gas limit carried by every transfer; fees are zero on this chain
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;

/// A signed balance transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub sequence: u64,
    pub timestamp_ms: u64,
    #[serde(rename = "publicKey")]
    pub public_key: PublicKey,
    pub signature: Signature,
    #[serde(rename = "gasPrice")]
    pub gas_price: Amount,
    #[serde(rename = "gasLimit")]
    pub gas_limit: u64,
}

impl Transaction {
    /// Create and sign a transaction with the given keypair
    pub fn create(
        keypair: &KeyPair,
        to: Address,
        amount: Amount,
        sequence: u64,
        timestamp: Timestamp,
    ) -> MeridianResult<Self> {
        let from = keypair.address();
        let payload = signing_payload(&from, &to, amount, sequence, timestamp.as_millis());
        let signature = sign(keypair, &payload);

        let mut tx = Self {
            hash: Hash::ZERO,
            from,
            to,
            amount,
            sequence,
            timestamp_ms: timestamp.as_millis(),
            public_key: keypair.public_key(),
            signature,
            gas_price: Amount::ZERO,
            gas_limit: DEFAULT_GAS_LIMIT,
        };
        tx.hash = tx.compute_hash()?;
        Ok(tx)
    }

    /// Assemble a transaction from already-signed wire fields, computing
    /// the hash from the canonical pre-image
    #[allow(clippy::too_many_arguments)]
    pub fn from_signed_parts(
        from: Address,
        to: Address,
        amount: Amount,
        sequence: u64,
        timestamp_ms: u64,
        public_key: PublicKey,
        signature: Signature,
    ) -> MeridianResult<Self> {
        let mut tx = Self {
            hash: Hash::ZERO,
            from,
            to,
            amount,
            sequence,
            timestamp_ms,
            public_key,
            signature,
            gas_price: Amount::ZERO,
            gas_limit: DEFAULT_GAS_LIMIT,
        };
        tx.hash = tx.compute_hash()?;
        Ok(tx)
    }

    /// The canonical JSON value hashed into `self.hash`: every field but
    /// the hash itself, amounts and gas fields as decimal strings
    fn hash_payload(&self) -> Value {
        json!({
            "from": self.from,
            "to": self.to,
            "amount": self.amount,
            "sequence": self.sequence,
            "timestamp_ms": self.timestamp_ms,
            "publicKey": self.public_key,
            "signature": self.signature,
            "gasPrice": self.gas_price,
            "gasLimit": self.gas_limit.to_string(),
        })
    }

    /// Recompute the transaction hash from its fields
    pub fn compute_hash(&self) -> MeridianResult<Hash> {
        canonical_hash(&self.hash_payload())
    }

    /// The bytes the sender signed
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing_payload(&self.from, &self.to, self.amount, self.sequence, self.timestamp_ms)
    }

    /// Full structural verification: hash pre-image, address derivation
    /// and sender signature
    pub fn verify(&self) -> MeridianResult<()> {
        if self.compute_hash()? != self.hash {
            return Err(MeridianError::BadHash);
        }
        if !verify_address(&self.from, &self.public_key) {
            return Err(MeridianError::AddressMismatch);
        }
        verify(&self.public_key, &self.signing_bytes(), &self.signature)
    }

    /// Genesis premine pseudo-transfer from the zero address; carries no
    /// real key material and is never signature-verified
    pub fn premine(to: Address, amount: Amount, sequence: u64, timestamp_ms: u64) -> MeridianResult<Self> {
        let mut tx = Self {
            hash: Hash::ZERO,
            from: Address::ZERO,
            to,
            amount,
            sequence,
            timestamp_ms,
            public_key: PublicKey::ZERO,
            signature: Signature::ZERO,
            gas_price: Amount::ZERO,
            gas_limit: DEFAULT_GAS_LIMIT,
        };
        tx.hash = tx.compute_hash()?;
        Ok(tx)
    }
}

/// Canonical signing pre-image shared with client-side signers
pub fn signing_payload(
    from: &Address,
    to: &Address,
    amount: Amount,
    sequence: u64,
    timestamp_ms: u64,
) -> Vec<u8> {
    let value = json!({
        "from": from,
        "to": to,
        "amount": amount,
        "sequence": sequence,
        "timestamp_ms": timestamp_ms,
    });
    canonical_string(&value).into_bytes()
}
