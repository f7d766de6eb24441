//! World state: committed balances and sequence numbers
//!
//! Pack, validate and commit all execute transactions through the single
//! [`WorldState::execute_transactions`] function, so the state root each
//! role computes is identical by construction.

use meridian_core::{Address, Amount, Hash, MeridianResult};
use meridian_crypto::canonical::canonical_hash;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::transaction::Transaction;

/// The committed ledger state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldState {
    pub balances: HashMap<Address, Amount>,
    pub sequences: HashMap<Address, u64>,
    pub latest_height: u64,
    pub latest_hash: Hash,
    pub genesis_hash: Hash,
    pub total_tx: u64,
    pub last_updated_ms: u64,
    pub last_proposer_error: Option<String>,
}

impl WorldState {
    pub fn balance_of(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or(Amount::ZERO)
    }

    pub fn sequence_of(&self, address: &Address) -> u64 {
        self.sequences.get(address).copied().unwrap_or(0)
    }

    /// Apply transactions in order, skipping any that fail the running
    /// sequence or balance check. Returns the hashes of the executed ones.
    ///
    /// This is the one execution function in the system; the pack path,
    /// every validator and the commit path all call it with the same
    /// inputs and must observe the same result.
    pub fn execute_transactions(&mut self, transactions: &[Transaction]) -> Vec<Hash> {
        let mut executed = Vec::with_capacity(transactions.len());

        for tx in transactions {
            if tx.sequence != self.sequence_of(&tx.from) {
                debug!(tx = %tx.hash, "skipping transaction: stale sequence");
                continue;
            }

            let debited = match self.balance_of(&tx.from).checked_sub(tx.amount) {
                Some(b) => b,
                None => {
                    debug!(tx = %tx.hash, "skipping transaction: insufficient balance");
                    continue;
                }
            };
            let credited = match self.balance_of(&tx.to).checked_add(tx.amount) {
                Some(b) => b,
                None => {
                    debug!(tx = %tx.hash, "skipping transaction: credit overflow");
                    continue;
                }
            };

            self.balances.insert(tx.from, debited);
            self.balances.insert(tx.to, credited);
            *self.sequences.entry(tx.from).or_insert(0) += 1;
            executed.push(tx.hash);
        }

        executed
    }

    /// Simulate block execution over a copy of this state
    pub fn speculate(&self, transactions: &[Transaction]) -> (WorldState, Vec<Hash>) {
        let mut next = self.clone();
        let executed = next.execute_transactions(transactions);
        (next, executed)
    }

    /// SHA-256 over the canonical JSON of `{balances, sequences}`:
    /// balances as an address-sorted array of `[address, decimal]` pairs,
    /// sequences as an object keyed by address
    pub fn state_root(&self) -> MeridianResult<Hash> {
        let mut balances: Vec<(&Address, &Amount)> = self.balances.iter().collect();
        balances.sort_by_key(|(addr, _)| **addr);
        let balances: Vec<Value> = balances
            .into_iter()
            .map(|(addr, amount)| json!([addr.to_hex(), amount.to_decimal()]))
            .collect();

        let mut sequences = Map::new();
        for (addr, seq) in &self.sequences {
            sequences.insert(addr.to_hex(), json!(seq));
        }

        canonical_hash(&json!({
            "balances": balances,
            "sequences": Value::Object(sequences),
        }))
    }
}
