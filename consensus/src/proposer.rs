//! The proposer role
//!
//! Stateless between rounds. A `trigger` drives one full round: take the
//! coordinator lock, pack a candidate, sign it, fan out to every validator
//! in parallel under a single deadline, and commit with the gathered
//! quorum. Any failure after the lock is taken releases it; unexpected
//! failures are additionally reported to the coordinator.

use futures::stream::{FuturesUnordered, StreamExt};
use meridian_core::{Hash, MeridianError, MeridianResult};
use meridian_crypto::keys::KeyPair;
use meridian_crypto::signing::sign;
use meridian_ledger::{vote_preimage, Block, BlockVote, CoordinatorApi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::ValidatorClient;

/// Compact result of a committed round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub height: u64,
    #[serde(rename = "blockHash")]
    pub block_hash: Hash,
    #[serde(rename = "txCount")]
    pub tx_count: usize,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
}

/// Why a trigger was a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleReason {
    RoundInProgress,
    EmptyQueue,
}

/// Outcome of one trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoundOutcome {
    Committed(RoundSummary),
    Idle { reason: IdleReason },
}

/// The proposer: an identity, a coordinator handle and the validator list
pub struct Proposer {
    id: String,
    keypair: KeyPair,
    coordinator: Arc<dyn CoordinatorApi>,
    validators: Vec<Arc<dyn ValidatorClient>>,
    consensus_timeout: Duration,
}

impl Proposer {
    pub fn new(
        id: &str,
        keypair: KeyPair,
        coordinator: Arc<dyn CoordinatorApi>,
        validators: Vec<Arc<dyn ValidatorClient>>,
        consensus_timeout: Duration,
    ) -> Self {
        Self {
            id: id.to_string(),
            keypair,
            coordinator,
            validators,
            consensus_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> meridian_core::PublicKey {
        self.keypair.public_key()
    }

    /// Drive one round. Safe under concurrent calls: the coordinator lock
    /// serialises, and a losing trigger returns an idle outcome.
    pub async fn trigger(&self) -> MeridianResult<RoundOutcome> {
        let started = Instant::now();

        match self.coordinator.acquire_processing_lock().await {
            Ok(snapshot) => {
                debug!(proposer = %self.id, queued = snapshot.len(), "round lock acquired");
            }
            Err(MeridianError::RoundInProgress) => {
                return Ok(RoundOutcome::Idle {
                    reason: IdleReason::RoundInProgress,
                })
            }
            Err(MeridianError::EmptyQueue) => {
                return Ok(RoundOutcome::Idle {
                    reason: IdleReason::EmptyQueue,
                })
            }
            Err(e) => return Err(e),
        }

        match self.run_round(started).await {
            Ok(summary) => {
                info!(
                    proposer = %self.id,
                    height = summary.height,
                    hash = %summary.block_hash,
                    txs = summary.tx_count,
                    elapsed_ms = summary.elapsed_ms,
                    "round committed"
                );
                Ok(RoundOutcome::Committed(summary))
            }
            Err(e) => {
                if let Err(release_err) = self.coordinator.release_processing_lock(false).await {
                    warn!(error = %release_err, "failed to release round lock");
                }
                self.coordinator.report_error(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_round(&self, started: Instant) -> MeridianResult<RoundSummary> {
        let mut block = self.coordinator.pack_block(&self.id).await?;
        block.proposer_signature = Some(sign(&self.keypair, &vote_preimage(&block.hash)));
        let tx_count = block.header.tx_count;

        let votes = self.collect_votes(&block).await;

        let required = self.coordinator.query_state().await.required_signatures;
        if votes.len() < required {
            return Err(MeridianError::InsufficientSignatures {
                got: votes.len(),
                required,
            });
        }

        let outcome = self.coordinator.commit_block(block, votes).await?;
        Ok(RoundSummary {
            height: outcome.height,
            block_hash: outcome.block_hash,
            tx_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Fan out to every validator concurrently and gather votes until all
    /// have answered or the round deadline passes. Late responses are
    /// discarded, not cancelled; partial quorum is fine.
    async fn collect_votes(&self, block: &Block) -> Vec<BlockVote> {
        let deadline = tokio::time::Instant::now() + self.consensus_timeout;

        let mut pending: FuturesUnordered<_> = self
            .validators
            .iter()
            .map(|client| {
                let client = client.clone();
                let block = block.clone();
                let proposer_id = self.id.clone();
                async move {
                    let result = client.validate(&block, &proposer_id).await;
                    (client.id().to_string(), result)
                }
            })
            .collect();

        let mut votes = Vec::with_capacity(self.validators.len());
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((validator_id, Ok(response)))) => match response.vote() {
                    Some(vote) => votes.push(vote),
                    None => warn!(
                        validator = %validator_id,
                        error = response.error.as_deref().unwrap_or("rejected"),
                        "validator voted against the block"
                    ),
                },
                Ok(Some((validator_id, Err(e)))) => {
                    warn!(validator = %validator_id, error = %e, "validator unreachable");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        missing = pending.len(),
                        "fan-out deadline reached; late validator responses discarded"
                    );
                    break;
                }
            }
        }

        votes
    }
}
