//! The coordinator capability surface
//!
//! The coordinator presents these operations to the proposer, the
//! validators and the HTTP façade. Production wiring hands the roles an
//! `Arc<Coordinator>` directly; tests may substitute any implementation.

use async_trait::async_trait;
use meridian_core::{Address, Amount, ConsensusConfig, Hash, MeridianResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::{Block, BlockSummary, BlockVote};
use crate::state::WorldState;
use crate::transaction::Transaction;

/// Chain-level status served by `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    #[serde(rename = "latestHeight")]
    pub latest_height: u64,
    #[serde(rename = "latestHash")]
    pub latest_hash: Hash,
    #[serde(rename = "genesisHash")]
    pub genesis_hash: Hash,
    #[serde(rename = "totalTx")]
    pub total_tx: u64,
    #[serde(rename = "pendingTx")]
    pub pending_tx: usize,
    pub processing: bool,
    #[serde(rename = "validatorCount")]
    pub validator_count: usize,
    #[serde(rename = "requiredSignatures")]
    pub required_signatures: usize,
    #[serde(rename = "lastUpdatedMs")]
    pub last_updated_ms: u64,
    #[serde(rename = "lastProposerError")]
    pub last_proposer_error: Option<String>,
}

/// Account view served by `/account/{addr}`; `pending_sequence` is the
/// committed sequence plus queued transactions from the sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub address: Address,
    pub balance: Amount,
    pub sequence: u64,
    #[serde(rename = "pendingSequence")]
    pub pending_sequence: u64,
}

/// Where a transaction currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Committed,
}

/// A transaction receipt: the transaction plus its chain position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub status: TxStatus,
    #[serde(rename = "blockHeight")]
    pub block_height: Option<u64>,
    #[serde(rename = "blockHash")]
    pub block_hash: Option<Hash>,
}

/// Result of a successful `commit_block`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub height: u64,
    #[serde(rename = "blockHash")]
    pub block_hash: Hash,
    pub executed: usize,
}

/// A full serializable copy of the coordinator record, used for backup
/// and restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub world: WorldState,
    pub queued: Vec<Transaction>,
    pub history: BTreeMap<u64, Block>,
    pub consensus: ConsensusConfig,
}

/// The coordinator's internal API
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Admit a transaction to the pending queue
    async fn add_transaction(&self, tx: Transaction) -> MeridianResult<()>;

    /// Begin a round: take the round lock and return the queue snapshot
    async fn acquire_processing_lock(&self) -> MeridianResult<Vec<Transaction>>;

    /// Release the round lock; optionally drop the queue
    async fn release_processing_lock(&self, clear_queue: bool) -> MeridianResult<()>;

    /// Assemble an unsigned candidate block from the queue head
    async fn pack_block(&self, proposer_id: &str) -> MeridianResult<Block>;

    /// Verify quorum and atomically finalise a block
    async fn commit_block(&self, block: Block, votes: Vec<BlockVote>) -> MeridianResult<CommitOutcome>;

    /// Initialise the chain from the genesis configuration
    async fn init_genesis(&self, genesis_time: Option<u64>, force: bool) -> MeridianResult<Hash>;

    async fn query_state(&self) -> NetworkStatus;

    /// Full world-state copy; used by validators for re-simulation
    async fn world_state(&self) -> WorldState;

    async fn query_account(&self, address: Address) -> AccountView;

    async fn query_block(&self, height: u64) -> Option<Block>;

    async fn query_blocks_range(&self, start: u64, limit: usize) -> Vec<Block>;

    async fn query_latest_block(&self) -> Option<BlockSummary>;

    async fn query_transaction(&self, hash: Hash) -> Option<TransactionRecord>;

    async fn transactions_by_address(&self, address: Address) -> Vec<TransactionRecord>;

    /// Force a backup snapshot now; returns the CID when one was uploaded
    async fn trigger_backup(&self) -> MeridianResult<Option<String>>;

    /// Replace the whole record from a snapshot (anti-rollback checked)
    async fn restore(&self, snapshot: ChainSnapshot, cid: &str, force: bool) -> MeridianResult<()>;

    /// Record a proposer-side failure for observability
    async fn report_error(&self, message: String);
}
