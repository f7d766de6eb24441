//! MERIDIAN ledger data model
//!
//! Transactions, blocks, the world state with its single execution
//! function, the pending queue, genesis construction, and the
//! [`CoordinatorApi`] capability trait the roles communicate through.

pub mod api;
pub mod block;
pub mod genesis;
pub mod queue;
pub mod state;
pub mod transaction;

pub use api::{
    AccountView, ChainSnapshot, CommitOutcome, CoordinatorApi, NetworkStatus, TransactionRecord,
    TxStatus,
};
pub use block::{tx_root, vote_preimage, Block, BlockHeader, BlockSummary, BlockVote};
pub use genesis::{build_genesis, genesis_consensus_config, GENESIS_PROPOSER};
pub use queue::PendingQueue;
pub use state::WorldState;
pub use transaction::{signing_payload, Transaction, DEFAULT_GAS_LIMIT};
