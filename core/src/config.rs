//! Configuration types for MERIDIAN

use crate::types::{Address, Amount, PublicKey};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quorum rule shared by every role: ceil(2N/3) signatures
pub fn required_signatures(validator_count: usize) -> usize {
    (2 * validator_count + 2) / 3
}

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Network tag gating devnet-only features such as the faucet
    pub network: NetworkTag,

    /// Consensus timing and sizing
    pub consensus: ConsensusTuning,

    /// API configuration
    pub api: ApiConfig,

    /// Backup configuration
    pub backup: BackupConfig,

    /// Remote validator endpoints; when empty, validators run in-process
    pub validator_endpoints: Vec<String>,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "meridian-node".to_string(),
            data_dir: PathBuf::from("./data"),
            network: NetworkTag::Devnet,
            consensus: ConsensusTuning::default(),
            api: ApiConfig::default(),
            backup: BackupConfig::default(),
            validator_endpoints: vec![],
            log_level: "info".to_string(),
        }
    }
}

/// Network tag; faucet and forced re-genesis are devnet-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTag {
    Devnet,
    Testnet,
    Mainnet,
}

impl NetworkTag {
    pub fn faucet_enabled(&self) -> bool {
        !matches!(self, NetworkTag::Mainnet)
    }
}

/// Tunable consensus parameters (the validator set itself lives in
/// [`ConsensusConfig`], installed at genesis)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusTuning {
    /// Maximum transactions per block
    pub block_max_txs: usize,

    /// Minimum transactions before a block is worth proposing
    pub block_min_txs: usize,

    /// Total deadline for one proposal round in milliseconds; locks older
    /// than this are considered stale and may be taken over
    pub consensus_timeout_ms: u64,

    /// Watchdog alarm horizon in milliseconds, armed at block packing
    pub watchdog_timeout_ms: u64,
}

impl Default for ConsensusTuning {
    fn default() -> Self {
        Self {
            block_max_txs: 100,
            block_min_txs: 1,
            consensus_timeout_ms: 10_000,
            watchdog_timeout_ms: 15_000,
        }
    }
}

/// The authoritative consensus parameters held by the coordinator,
/// installed at genesis and immutable thereafter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub block_max_txs: usize,
    pub block_min_txs: usize,
    pub consensus_timeout_ms: u64,
    pub watchdog_timeout_ms: u64,

    /// Public keys of the fixed validator set
    pub validators: Vec<PublicKey>,

    /// Quorum threshold, always `ceil(2 * |validators| / 3)`
    pub required_signatures: usize,

    /// When set, `commit_block` verifies the proposer signature against
    /// this key in addition to the validator quorum
    pub proposer_public_key: Option<PublicKey>,
}

impl ConsensusConfig {
    pub fn new(tuning: &ConsensusTuning, validators: Vec<PublicKey>) -> Self {
        let required = required_signatures(validators.len());
        Self {
            block_max_txs: tuning.block_max_txs,
            block_min_txs: tuning.block_min_txs,
            consensus_timeout_ms: tuning.consensus_timeout_ms,
            watchdog_timeout_ms: tuning.watchdog_timeout_ms,
            validators,
            required_signatures: required,
            proposer_public_key: None,
        }
    }

    pub fn is_validator(&self, key: &PublicKey) -> bool {
        self.validators.contains(key)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig::new(&ConsensusTuning::default(), vec![])
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8545".to_string(),
            enable_cors: true,
        }
    }
}

/// Off-chain backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Enable encrypted snapshot uploads
    pub enabled: bool,

    /// Minimum interval between snapshots in milliseconds
    pub interval_ms: u64,

    /// How many snapshots to keep pinned before unpinning the oldest
    pub ttl: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 60_000,
            ttl: 10,
        }
    }
}

/// A premined balance in the genesis block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremineAllocation {
    pub address: Address,
    pub amount: Amount,
    pub description: String,
}

/// A validator declared in the genesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub id: String,
    pub public_key: PublicKey,
    pub address: Address,
    pub stake: u64,
    pub commission_pct: u8,
}

/// Genesis configuration: everything needed to manufacture block 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_name: String,
    pub chain_id: u64,
    pub network_id: u64,

    /// Genesis timestamp in milliseconds
    pub timestamp_ms: u64,

    pub token_name: String,
    pub token_symbol: String,
    pub token_decimals: u8,

    pub premine: Vec<PremineAllocation>,
    pub validators: Vec<GenesisValidator>,

    /// Informational only; block production is trigger-driven
    pub block_time_ms: u64,

    /// Always zero on this chain
    pub block_reward: Amount,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            chain_name: "MERIDIAN Devnet".to_string(),
            chain_id: 7301,
            network_id: 1,
            timestamp_ms: 1_700_000_000_000,
            token_name: "Meridian".to_string(),
            token_symbol: "MRD".to_string(),
            token_decimals: 18,
            premine: vec![],
            validators: vec![],
            block_time_ms: 5_000,
            block_reward: Amount::ZERO,
        }
    }
}

impl GenesisConfig {
    pub fn devnet() -> Self {
        Self::default()
    }

    pub fn add_premine(mut self, address: Address, amount: Amount, description: &str) -> Self {
        self.premine.push(PremineAllocation {
            address,
            amount,
            description: description.to_string(),
        });
        self
    }

    pub fn add_validator(mut self, id: &str, public_key: PublicKey, address: Address) -> Self {
        self.validators.push(GenesisValidator {
            id: id.to_string(),
            public_key,
            address,
            stake: 1,
            commission_pct: 0,
        });
        self
    }

    pub fn validator_keys(&self) -> Vec<PublicKey> {
        self.validators.iter().map(|v| v.public_key).collect()
    }

    pub fn total_premine(&self) -> Option<Amount> {
        self.premine
            .iter()
            .try_fold(Amount::ZERO, |acc, p| acc.checked_add(p.amount))
    }

    pub fn to_json(&self) -> crate::MeridianResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::MeridianError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> crate::MeridianResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::MeridianError::SerializationError(e.to_string()))
    }
}
