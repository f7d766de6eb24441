//! The pending transaction queue
//!
//! Strict FIFO; transactions leave only when a commit executes them. The
//! `processing` flag is the round lock: while it is set, exactly one
//! proposer is driving a block through the validators.

use meridian_core::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::block::Block;
use crate::transaction::Transaction;

/// FIFO queue of admitted transactions plus the round-lock state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingQueue {
    pub transactions: VecDeque<Transaction>,
    pub processing: bool,
    pub processing_started_at_ms: Option<u64>,
    pub current_block: Option<Block>,
}

impl PendingQueue {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.transactions.iter().any(|tx| &tx.hash == hash)
    }

    pub fn push(&mut self, tx: Transaction) {
        self.transactions.push_back(tx);
    }

    /// The first `n` transactions in FIFO order, cloned for block assembly
    pub fn first_n(&self, n: usize) -> Vec<Transaction> {
        self.transactions.iter().take(n).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.iter().cloned().collect()
    }

    /// Remove the given hashes, wherever they sit in the queue
    pub fn remove_hashes(&mut self, hashes: &[Hash]) {
        self.transactions.retain(|tx| !hashes.contains(&tx.hash));
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Queued transactions from one sender, FIFO order preserved
    pub fn pending_for(&self, address: &Address) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|tx| &tx.from == address)
            .cloned()
            .collect()
    }

    pub fn pending_count_for(&self, address: &Address) -> u64 {
        self.transactions.iter().filter(|tx| &tx.from == address).count() as u64
    }

    /// Release the round lock; the queue itself is only cleared when
    /// explicitly requested
    pub fn release(&mut self, clear_queue: bool) {
        self.processing = false;
        self.processing_started_at_ms = None;
        self.current_block = None;
        if clear_queue {
            self.transactions.clear();
        }
    }
}
