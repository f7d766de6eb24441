//! MERIDIAN coordinator
//!
//! The singleton authoritative state machine: all chain mutations pass
//! through its atomic-transaction primitive, the watchdog rescues stuck
//! rounds, and encrypted snapshots flow to an off-chain store without
//! ever blocking the write path.

pub mod backup;
pub mod coordinator;
pub mod watchdog;

pub use backup::{
    BackupEntry, BackupService, ContentStore, IndexStore, MemoryContentStore, MemoryIndexStore,
};
pub use coordinator::{ChainRecord, Coordinator};
pub use watchdog::Watchdog;
