//! Error types for MERIDIAN

use thiserror::Error;

/// Result alias used across all MERIDIAN crates
pub type MeridianResult<T> = Result<T, MeridianError>;

/// Main error type for MERIDIAN
#[derive(Error, Debug)]
pub enum MeridianError {
    // ============ Request / Cryptography ============
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address does not match public key")]
    AddressMismatch,

    // ============ Transaction admission ============
    #[error("Duplicate transaction {0}")]
    DuplicateTransaction(String),

    #[error("Sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    // ============ Round / lock ============
    #[error("Consensus round already in progress")]
    RoundInProgress,

    #[error("Transaction queue is empty")]
    EmptyQueue,

    // ============ Block commit ============
    #[error("Wrong block height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("Block does not extend the current chain head")]
    WrongParent,

    #[error("Insufficient signatures: got {got}, required {required}")]
    InsufficientSignatures { got: usize, required: usize },

    // ============ Block validation ============
    #[error("Block hash does not match header")]
    BadHash,

    #[error("Transaction root does not match header")]
    BadTxRoot,

    #[error("State root does not match header")]
    BadStateRoot,

    #[error("Transaction count mismatch: header says {expected}, block carries {got}")]
    TxCountMismatch { expected: usize, got: usize },

    #[error("Timestamp too far in the future")]
    TimestampTooFar,

    // ============ Genesis / restore ============
    #[error("Chain already initialised")]
    AlreadyInitialised,

    #[error("Backup CID does not match the latest index entry")]
    CidMismatch,

    // ============ Infrastructure ============
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization failed: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for MeridianError {
    fn from(err: std::io::Error) -> Self {
        MeridianError::StorageError(err.to_string())
    }
}

impl From<bincode::Error> for MeridianError {
    fn from(err: bincode::Error) -> Self {
        MeridianError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(err: serde_json::Error) -> Self {
        MeridianError::SerializationError(err.to_string())
    }
}
