//! MERIDIAN core: fundamental types, errors and configuration
//!
//! Everything in this crate is transport-agnostic and free of I/O; the
//! other crates build the ledger, the coordinator and the consensus roles
//! on top of it.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    required_signatures, ApiConfig, BackupConfig, ConsensusConfig, ConsensusTuning, GenesisConfig,
    GenesisValidator, NetworkTag, NodeConfig, PremineAllocation,
};
pub use error::{MeridianError, MeridianResult};
pub use types::{Address, Amount, Hash, Height, PublicKey, Signature, Timestamp, TxHash};
