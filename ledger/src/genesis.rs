//! Deterministic genesis construction
//!
//! Block 0 is manufactured from the genesis configuration: every premine
//! allocation becomes a pseudo-transfer from the zero address, hashed with
//! the normal transaction rules so the genesis hash is reproducible from
//! the config alone.

use meridian_core::{ConsensusConfig, GenesisConfig, MeridianError, MeridianResult};
use tracing::info;

use crate::block::{tx_root, Block, BlockHeader};
use crate::state::WorldState;
use crate::transaction::Transaction;

/// Proposer label carried by the genesis header
pub const GENESIS_PROPOSER: &str = "genesis";

/// Build the genesis block and the world state it commits
pub fn build_genesis(
    config: &GenesisConfig,
    genesis_time: Option<u64>,
) -> MeridianResult<(WorldState, Block)> {
    let timestamp_ms = genesis_time.unwrap_or(config.timestamp_ms);

    let mut transactions = Vec::with_capacity(config.premine.len());
    let mut world = WorldState::default();

    for (i, alloc) in config.premine.iter().enumerate() {
        let tx = Transaction::premine(alloc.address, alloc.amount, i as u64, timestamp_ms)?;
        let balance = world
            .balance_of(&alloc.address)
            .checked_add(alloc.amount)
            .ok_or_else(|| MeridianError::ConfigError("premine overflows".to_string()))?;
        world.balances.insert(alloc.address, balance);
        transactions.push(tx);
    }

    let header = BlockHeader {
        height: 0,
        timestamp_ms,
        prev_hash: meridian_core::Hash::ZERO,
        tx_root: tx_root(&transactions),
        state_root: world.state_root()?,
        proposer: GENESIS_PROPOSER.to_string(),
        tx_count: transactions.len(),
    };

    let block = Block::assemble(header, transactions)?;

    world.latest_height = 0;
    world.latest_hash = block.hash;
    world.genesis_hash = block.hash;
    world.total_tx = block.header.tx_count as u64;
    world.last_updated_ms = timestamp_ms;

    info!(
        chain = %config.chain_name,
        hash = %block.hash,
        premine = block.header.tx_count,
        "genesis block built"
    );

    Ok((world, block))
}

/// The consensus parameters installed alongside genesis
pub fn genesis_consensus_config(
    config: &GenesisConfig,
    tuning: &meridian_core::ConsensusTuning,
) -> ConsensusConfig {
    ConsensusConfig::new(tuning, config.validator_keys())
}
