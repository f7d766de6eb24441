//! The stateless block validator
//!
//! Given a candidate block, re-checks structure, cryptography and the
//! state transition against the coordinator's current state, and signs
//! the block hash when everything holds. Check failures are data, not
//! transport errors: the response says `valid: false` and names the
//! reason.

use meridian_core::{MeridianError, PublicKey, Signature, Timestamp};
use meridian_crypto::keys::KeyPair;
use meridian_crypto::signing::sign;
use meridian_ledger::{vote_preimage, Block, BlockVote, CoordinatorApi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tolerated clock skew for block and transaction timestamps
pub const MAX_CLOCK_SKEW_MS: u64 = 60_000;

/// The validator's answer to a `validate` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub error: Option<String>,
    #[serde(rename = "validatorId")]
    pub validator_id: String,
    #[serde(rename = "publicKey")]
    pub public_key: Option<PublicKey>,
    pub signature: Option<Signature>,
    pub timestamp_ms: u64,
}

impl ValidationResponse {
    fn approve(validator_id: &str, public_key: PublicKey, signature: Signature) -> Self {
        Self {
            valid: true,
            error: None,
            validator_id: validator_id.to_string(),
            public_key: Some(public_key),
            signature: Some(signature),
            timestamp_ms: Timestamp::now().as_millis(),
        }
    }

    fn reject(validator_id: &str, error: &MeridianError) -> Self {
        Self {
            valid: false,
            error: Some(error.to_string()),
            validator_id: validator_id.to_string(),
            public_key: None,
            signature: None,
            timestamp_ms: Timestamp::now().as_millis(),
        }
    }

    /// The vote this response contributes to quorum, if approving
    pub fn vote(&self) -> Option<BlockVote> {
        if !self.valid {
            return None;
        }
        Some(BlockVote {
            validator_id: self.validator_id.clone(),
            validator_public_key: self.public_key?,
            signature: self.signature?,
            timestamp_ms: self.timestamp_ms,
        })
    }
}

/// A validator role instance: an identity plus a coordinator handle
pub struct Validator {
    id: String,
    keypair: KeyPair,
    coordinator: Arc<dyn CoordinatorApi>,
}

impl Validator {
    pub fn new(id: &str, keypair: KeyPair, coordinator: Arc<dyn CoordinatorApi>) -> Self {
        Self {
            id: id.to_string(),
            keypair,
            coordinator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Run the full validation algorithm and sign on success
    pub async fn validate(&self, block: &Block, proposer_id: &str) -> ValidationResponse {
        match self.check(block).await {
            Ok(()) => {
                let signature = sign(&self.keypair, &vote_preimage(&block.hash));
                debug!(
                    validator = %self.id,
                    height = block.header.height,
                    proposer = %proposer_id,
                    "block approved"
                );
                ValidationResponse::approve(&self.id, self.keypair.public_key(), signature)
            }
            Err(e) => {
                warn!(
                    validator = %self.id,
                    height = block.header.height,
                    proposer = %proposer_id,
                    error = %e,
                    "block rejected"
                );
                ValidationResponse::reject(&self.id, &e)
            }
        }
    }

    async fn check(&self, block: &Block) -> Result<(), MeridianError> {
        // Structure: header hash, transaction count, transaction root
        block.verify_structure()?;

        // Every transaction: hash pre-image, sender signature, skew
        let now = Timestamp::now().as_millis();
        for tx in &block.transactions {
            tx.verify()?;
            if tx.timestamp_ms > now + MAX_CLOCK_SKEW_MS {
                return Err(MeridianError::TimestampTooFar);
            }
        }

        if block.header.timestamp_ms > now + MAX_CLOCK_SKEW_MS {
            return Err(MeridianError::TimestampTooFar);
        }

        // Chain position against the coordinator's current state
        let world = self.coordinator.world_state().await;
        let expected_height = world.latest_height + 1;
        if block.header.height != expected_height {
            return Err(MeridianError::WrongHeight {
                expected: expected_height,
                got: block.header.height,
            });
        }
        if block.header.prev_hash != world.latest_hash {
            return Err(MeridianError::WrongParent);
        }

        // State transition: same simulation rules the proposer used
        let (speculated, _) = world.speculate(&block.transactions);
        if speculated.state_root()? != block.header.state_root {
            return Err(MeridianError::BadStateRoot);
        }

        Ok(())
    }
}
