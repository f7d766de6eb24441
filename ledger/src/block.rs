//! Blocks, headers and validator votes
//!
//! The block hash is SHA-256 over the canonical JSON of the header only;
//! every signature over a block (proposer's and validators') covers the
//! ASCII string `"block:" + 0x-hex(hash)`.

use meridian_core::{Hash, MeridianError, MeridianResult, PublicKey, Signature};
use meridian_crypto::canonical::canonical_hash;
use meridian_crypto::hashing::merkle_root;
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Block header; the sole pre-image of the block hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp_ms: u64,
    #[serde(rename = "prevHash")]
    pub prev_hash: Hash,
    #[serde(rename = "txRoot")]
    pub tx_root: Hash,
    #[serde(rename = "stateRoot")]
    pub state_root: Hash,
    pub proposer: String,
    #[serde(rename = "txCount")]
    pub tx_count: usize,
}

impl BlockHeader {
    pub fn compute_hash(&self) -> MeridianResult<Hash> {
        canonical_hash(self)
    }
}

/// One validator's approval of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockVote {
    #[serde(rename = "validatorId")]
    pub validator_id: String,
    #[serde(rename = "validatorPubKey")]
    pub validator_public_key: PublicKey,
    pub signature: Signature,
    pub timestamp_ms: u64,
}

/// A block: header, transactions, and the signatures gathered for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub hash: Hash,
    #[serde(rename = "proposerSignature")]
    pub proposer_signature: Option<Signature>,
    pub votes: Vec<BlockVote>,
}

impl Block {
    /// Assemble an unsigned block from a header and its transactions
    pub fn assemble(header: BlockHeader, transactions: Vec<Transaction>) -> MeridianResult<Self> {
        let hash = header.compute_hash()?;
        Ok(Self {
            header,
            transactions,
            hash,
            proposer_signature: None,
            votes: vec![],
        })
    }

    /// Recompute the transaction Merkle root from the carried transactions
    pub fn compute_tx_root(&self) -> Hash {
        tx_root(&self.transactions)
    }

    /// Structural self-check: header hash, tx count and tx root
    pub fn verify_structure(&self) -> MeridianResult<()> {
        if self.header.compute_hash()? != self.hash {
            return Err(MeridianError::BadHash);
        }
        if self.transactions.len() != self.header.tx_count {
            return Err(MeridianError::TxCountMismatch {
                expected: self.header.tx_count,
                got: self.transactions.len(),
            });
        }
        if self.compute_tx_root() != self.header.tx_root {
            return Err(MeridianError::BadTxRoot);
        }
        Ok(())
    }
}

/// Merkle root over the transaction hashes, in block order
pub fn tx_root(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash).collect();
    merkle_root(&hashes)
}

/// The signing pre-image for any vote or proposer signature over a block
pub fn vote_preimage(block_hash: &Hash) -> Vec<u8> {
    format!("block:{}", block_hash.to_hex()).into_bytes()
}

/// Lightweight block view for `/block/latest`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: Hash,
    pub timestamp_ms: u64,
    #[serde(rename = "txCount")]
    pub tx_count: usize,
    pub proposer: String,
    pub votes: usize,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            height: block.header.height,
            hash: block.hash,
            timestamp_ms: block.header.timestamp_ms,
            tx_count: block.header.tx_count,
            proposer: block.header.proposer.clone(),
            votes: block.votes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{Address, Amount, Timestamp};
    use meridian_crypto::keys::KeyPair;

    fn sample_txs(n: usize) -> Vec<Transaction> {
        let kp = KeyPair::generate();
        (0..n)
            .map(|i| {
                Transaction::create(
                    &kp,
                    Address([7u8; 20]),
                    Amount::new(10),
                    i as u64,
                    Timestamp::from_millis(1_000 + i as u64),
                )
                .unwrap()
            })
            .collect()
    }

    fn sample_block(txs: Vec<Transaction>) -> Block {
        let header = BlockHeader {
            height: 1,
            timestamp_ms: 5_000,
            prev_hash: Hash([1u8; 32]),
            tx_root: tx_root(&txs),
            state_root: Hash([2u8; 32]),
            proposer: "proposer-0".to_string(),
            tx_count: txs.len(),
        };
        Block::assemble(header, txs).unwrap()
    }

    #[test]
    fn test_block_hash_covers_header_only() {
        let block = sample_block(sample_txs(2));
        let mut other = block.clone();
        other.votes.push(BlockVote {
            validator_id: "v".into(),
            validator_public_key: PublicKey([3u8; 32]),
            signature: Signature([4u8; 64]),
            timestamp_ms: 1,
        });
        // Votes are not part of the hash pre-image
        assert_eq!(other.header.compute_hash().unwrap(), block.hash);
    }

    #[test]
    fn test_single_tx_root_is_tx_hash() {
        let txs = sample_txs(1);
        assert_eq!(tx_root(&txs), txs[0].hash);
    }

    #[test]
    fn test_verify_structure_catches_tx_count() {
        let mut block = sample_block(sample_txs(3));
        block.transactions.pop();
        assert!(matches!(
            block.verify_structure(),
            Err(MeridianError::TxCountMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_verify_structure_catches_tx_root() {
        let mut block = sample_block(sample_txs(3));
        block.transactions.swap(0, 1);
        assert!(matches!(block.verify_structure(), Err(MeridianError::BadTxRoot)));
    }

    #[test]
    fn test_vote_preimage_format() {
        let hash = Hash([0xab; 32]);
        let preimage = String::from_utf8(vote_preimage(&hash)).unwrap();
        assert!(preimage.starts_with("block:0xabab"));
        assert_eq!(preimage.len(), "block:".len() + 2 + 64);
    }

    #[test]
    fn test_block_serde_roundtrip() {
        let block = sample_block(sample_txs(2));
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"prevHash\""));
        assert!(json.contains("\"stateRoot\""));
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }
}
