//! The MERIDIAN coordinator
//!
//! Sole owner of world state, the pending queue, block history and the
//! consensus configuration. Every mutation runs inside one closure holding
//! one mutex over the whole record; nothing awaits and nothing touches the
//! network while the lock is held. Backup uploads and the watchdog run as
//! detached tasks.

use meridian_core::{
    Address, ConsensusConfig, ConsensusTuning, GenesisConfig, Hash, MeridianError, MeridianResult,
    PublicKey, Timestamp,
};
use meridian_crypto::signing::{is_valid_signature, verify};
use meridian_ledger::{
    build_genesis, genesis_consensus_config, tx_root, vote_preimage, AccountView, Block,
    BlockHeader, BlockSummary, BlockVote, ChainSnapshot, CommitOutcome, CoordinatorApi,
    NetworkStatus, PendingQueue, Transaction, TransactionRecord, TxStatus, WorldState,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backup::BackupService;
use crate::watchdog::Watchdog;

/// Everything the coordinator owns, guarded as one unit
pub struct ChainRecord {
    pub world: WorldState,
    pub queue: PendingQueue,
    pub history: BTreeMap<u64, Block>,
    pub consensus: ConsensusConfig,
    /// Hashes of transactions executed in committed blocks; rebuilt from
    /// history on restore
    committed: HashSet<Hash>,
}

impl ChainRecord {
    fn empty(tuning: &ConsensusTuning) -> Self {
        Self {
            world: WorldState::default(),
            queue: PendingQueue::default(),
            history: BTreeMap::new(),
            consensus: ConsensusConfig::new(tuning, vec![]),
            committed: HashSet::new(),
        }
    }

    fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            world: self.world.clone(),
            queued: self.queue.snapshot(),
            history: self.history.clone(),
            consensus: self.consensus.clone(),
        }
    }
}

/// The singleton authoritative state machine
pub struct Coordinator {
    record: Mutex<ChainRecord>,
    genesis: GenesisConfig,
    tuning: ConsensusTuning,
    proposer_public_key: Option<PublicKey>,
    watchdog: Watchdog,
    backup: Option<Arc<BackupService>>,
    me: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(
        genesis: GenesisConfig,
        tuning: ConsensusTuning,
        proposer_public_key: Option<PublicKey>,
        backup: Option<Arc<BackupService>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            record: Mutex::new(ChainRecord::empty(&tuning)),
            genesis,
            tuning,
            proposer_public_key,
            watchdog: Watchdog::new(),
            backup,
            me: me.clone(),
        })
    }

    /// The atomic-transaction primitive: the closure observes and mutates
    /// the whole record under one lock, or not at all
    fn with_record<T>(&self, f: impl FnOnce(&mut ChainRecord) -> MeridianResult<T>) -> MeridianResult<T> {
        let mut record = self.record.lock();
        f(&mut record)
    }

    fn snapshot(&self) -> ChainSnapshot {
        self.record.lock().snapshot()
    }

    pub fn is_watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    /// Arm the round watchdog; fires once after `watchdog_timeout_ms`
    fn arm_round_watchdog(&self) {
        let me = self.me.clone();
        self.watchdog.arm(
            Duration::from_millis(self.tuning.watchdog_timeout_ms),
            move || async move {
                if let Some(coordinator) = me.upgrade() {
                    coordinator.watchdog_fired().await;
                }
            },
        );
    }

    /// Watchdog handler: rescue a stuck round, keep the backup cadence
    ///
    /// Returns an explicitly boxed, Send-asserted future: `watchdog_fired`
    /// re-arms itself with a closure that calls back into `watchdog_fired`,
    /// and an anonymous `async fn` return type can't express that cycle in
    /// a way the Send auto-trait solver can verify. Boxing behind this
    /// concrete, pre-asserted type breaks the cycle.
    fn watchdog_fired(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.watchdog_fired_inner())
    }

    async fn watchdog_fired_inner(self: Arc<Self>) {
        let released = self
            .with_record(|rec| {
                if rec.queue.processing {
                    rec.queue.release(false);
                    Ok(true)
                } else {
                    Ok(false)
                }
            })
            .unwrap_or(false);

        if released {
            warn!("watchdog released a stuck round lock; queue preserved");
        }

        if let Some(service) = &self.backup {
            self.spawn_backup_if_due(service.clone());

            // Idle chains still get periodic snapshots. Re-arming replaces
            // this task's own handle, so it must stay the last thing this
            // handler does.
            let me = self.me.clone();
            self.watchdog.arm(
                Duration::from_millis(service.interval_ms() * 3 / 2),
                move || async move {
                    if let Some(coordinator) = me.upgrade() {
                        coordinator.watchdog_fired().await;
                    }
                },
            );
        }
    }

    fn schedule_backup(&self) {
        if let Some(service) = &self.backup {
            self.spawn_backup_if_due(service.clone());
        }
    }

    fn spawn_backup_if_due(&self, service: Arc<BackupService>) {
        if !service.is_due(Timestamp::now()) {
            return;
        }
        let snapshot = self.snapshot();
        tokio::spawn(async move {
            if let Err(e) = service.upload(&snapshot).await {
                warn!(error = %e, "background backup failed");
            }
        });
    }
}

#[async_trait::async_trait]
impl CoordinatorApi for Coordinator {
    async fn add_transaction(&self, tx: Transaction) -> MeridianResult<()> {
        // The façade has already checked hash, address and signature; the
        // coordinator re-checks everything it is authoritative for
        tx.verify()?;

        self.with_record(|rec| {
            if rec.queue.contains(&tx.hash) || rec.committed.contains(&tx.hash) {
                return Err(MeridianError::DuplicateTransaction(tx.hash.to_hex()));
            }

            // Next acceptable sequence counts queued transactions from the
            // sender, so a client may chain submissions without waiting
            // for each commit
            let expected = rec.world.sequence_of(&tx.from) + rec.queue.pending_count_for(&tx.from);
            if tx.sequence != expected {
                return Err(MeridianError::SequenceMismatch {
                    expected,
                    got: tx.sequence,
                });
            }

            let available = rec.world.balance_of(&tx.from);
            if available < tx.amount {
                return Err(MeridianError::InsufficientBalance {
                    required: tx.amount.0,
                    available: available.0,
                });
            }

            debug!(tx = %tx.hash, from = %tx.from, "transaction admitted");
            rec.world.last_updated_ms = Timestamp::now().as_millis();
            rec.queue.push(tx);
            Ok(())
        })
    }

    async fn acquire_processing_lock(&self) -> MeridianResult<Vec<Transaction>> {
        self.with_record(|rec| {
            if rec.queue.processing {
                let started = rec.queue.processing_started_at_ms.unwrap_or(0);
                let age = Timestamp::now().as_millis().saturating_sub(started);
                if age < rec.consensus.consensus_timeout_ms {
                    return Err(MeridianError::RoundInProgress);
                }
                warn!(age_ms = age, "taking over a stale round lock");
            }
            if rec.queue.is_empty() {
                return Err(MeridianError::EmptyQueue);
            }

            rec.queue.processing = true;
            rec.queue.processing_started_at_ms = Some(Timestamp::now().as_millis());
            Ok(rec.queue.snapshot())
        })
    }

    async fn release_processing_lock(&self, clear_queue: bool) -> MeridianResult<()> {
        self.with_record(|rec| {
            rec.queue.release(clear_queue);
            Ok(())
        })?;
        self.watchdog.disarm();
        Ok(())
    }

    async fn pack_block(&self, proposer_id: &str) -> MeridianResult<Block> {
        let block = self.with_record(|rec| {
            if rec.queue.is_empty() {
                return Err(MeridianError::EmptyQueue);
            }

            let take = rec.consensus.block_max_txs.min(rec.queue.len());
            let transactions = rec.queue.first_n(take);

            // Simulate with the same rules commit re-executes under
            let (speculated, _) = rec.world.speculate(&transactions);

            let header = BlockHeader {
                height: rec.world.latest_height + 1,
                timestamp_ms: Timestamp::now().as_millis(),
                prev_hash: rec.world.latest_hash,
                tx_root: tx_root(&transactions),
                state_root: speculated.state_root()?,
                proposer: proposer_id.to_string(),
                tx_count: transactions.len(),
            };
            let block = Block::assemble(header, transactions)?;

            rec.queue.processing = true;
            if rec.queue.processing_started_at_ms.is_none() {
                rec.queue.processing_started_at_ms = Some(Timestamp::now().as_millis());
            }
            rec.queue.current_block = Some(block.clone());
            Ok(block)
        })?;

        self.arm_round_watchdog();
        info!(
            height = block.header.height,
            hash = %block.hash,
            txs = block.header.tx_count,
            "candidate block packed"
        );
        Ok(block)
    }

    async fn commit_block(&self, mut block: Block, votes: Vec<BlockVote>) -> MeridianResult<CommitOutcome> {
        let outcome = self.with_record(|rec| {
            let expected = rec.world.latest_height + 1;
            if block.header.height != expected {
                return Err(MeridianError::WrongHeight {
                    expected,
                    got: block.header.height,
                });
            }
            if block.header.prev_hash != rec.world.latest_hash {
                return Err(MeridianError::WrongParent);
            }
            if block.header.compute_hash()? != block.hash {
                return Err(MeridianError::BadHash);
            }

            // Quorum: membership, distinctness and a valid Ed25519
            // signature over the block pre-image
            let preimage = vote_preimage(&block.hash);
            let mut seen: HashSet<PublicKey> = HashSet::new();
            let valid: Vec<BlockVote> = votes
                .into_iter()
                .filter(|vote| {
                    rec.consensus.is_validator(&vote.validator_public_key)
                        && is_valid_signature(&vote.validator_public_key, &preimage, &vote.signature)
                        && seen.insert(vote.validator_public_key)
                })
                .collect();

            if valid.len() < rec.consensus.required_signatures {
                return Err(MeridianError::InsufficientSignatures {
                    got: valid.len(),
                    required: rec.consensus.required_signatures,
                });
            }

            if let Some(proposer_key) = &rec.consensus.proposer_public_key {
                let signature = block
                    .proposer_signature
                    .ok_or(MeridianError::InvalidSignature)?;
                verify(proposer_key, &preimage, &signature)?;
            }

            // Re-execute in order; invalid transactions are skipped, never
            // fatal to the commit
            let (mut next, executed) = rec.world.speculate(&block.transactions);
            next.latest_height = block.header.height;
            next.latest_hash = block.hash;
            next.total_tx += executed.len() as u64;
            next.last_updated_ms = Timestamp::now().as_millis();

            block.votes = valid;
            rec.world = next;
            rec.history.insert(block.header.height, block.clone());
            rec.committed.extend(executed.iter().copied());
            rec.queue.remove_hashes(&executed);
            rec.queue.release(false);

            Ok(CommitOutcome {
                height: block.header.height,
                block_hash: block.hash,
                executed: executed.len(),
            })
        })?;

        self.watchdog.disarm();
        self.schedule_backup();
        info!(
            height = outcome.height,
            hash = %outcome.block_hash,
            executed = outcome.executed,
            "block committed"
        );
        Ok(outcome)
    }

    async fn init_genesis(&self, genesis_time: Option<u64>, force: bool) -> MeridianResult<Hash> {
        let hash = self.with_record(|rec| {
            let initialised = rec.world.latest_height > 0 || !rec.history.is_empty();
            if initialised && !force {
                return Err(MeridianError::AlreadyInitialised);
            }

            let (world, genesis_block) = build_genesis(&self.genesis, genesis_time)?;
            let mut consensus = genesis_consensus_config(&self.genesis, &self.tuning);
            consensus.proposer_public_key = self.proposer_public_key;

            rec.committed = genesis_block.transactions.iter().map(|t| t.hash).collect();
            rec.world = world;
            rec.queue = PendingQueue::default();
            rec.history = BTreeMap::from([(0, genesis_block.clone())]);
            rec.consensus = consensus;
            Ok(genesis_block.hash)
        })?;

        info!(hash = %hash, "chain initialised from genesis");
        Ok(hash)
    }

    async fn query_state(&self) -> NetworkStatus {
        let rec = self.record.lock();
        NetworkStatus {
            latest_height: rec.world.latest_height,
            latest_hash: rec.world.latest_hash,
            genesis_hash: rec.world.genesis_hash,
            total_tx: rec.world.total_tx,
            pending_tx: rec.queue.len(),
            processing: rec.queue.processing,
            validator_count: rec.consensus.validators.len(),
            required_signatures: rec.consensus.required_signatures,
            last_updated_ms: rec.world.last_updated_ms,
            last_proposer_error: rec.world.last_proposer_error.clone(),
        }
    }

    async fn world_state(&self) -> WorldState {
        self.record.lock().world.clone()
    }

    async fn query_account(&self, address: Address) -> AccountView {
        let rec = self.record.lock();
        let sequence = rec.world.sequence_of(&address);
        AccountView {
            address,
            balance: rec.world.balance_of(&address),
            sequence,
            pending_sequence: sequence + rec.queue.pending_count_for(&address),
        }
    }

    async fn query_block(&self, height: u64) -> Option<Block> {
        self.record.lock().history.get(&height).cloned()
    }

    async fn query_blocks_range(&self, start: u64, limit: usize) -> Vec<Block> {
        let rec = self.record.lock();
        rec.history.range(start..).take(limit).map(|(_, b)| b.clone()).collect()
    }

    async fn query_latest_block(&self) -> Option<BlockSummary> {
        let rec = self.record.lock();
        rec.history.values().next_back().map(BlockSummary::from)
    }

    async fn query_transaction(&self, hash: Hash) -> Option<TransactionRecord> {
        let rec = self.record.lock();

        if let Some(tx) = rec.queue.transactions.iter().find(|tx| tx.hash == hash) {
            return Some(TransactionRecord {
                transaction: tx.clone(),
                status: TxStatus::Pending,
                block_height: None,
                block_hash: None,
            });
        }

        for block in rec.history.values().rev() {
            if let Some(tx) = block.transactions.iter().find(|tx| tx.hash == hash) {
                return Some(TransactionRecord {
                    transaction: tx.clone(),
                    status: TxStatus::Committed,
                    block_height: Some(block.header.height),
                    block_hash: Some(block.hash),
                });
            }
        }
        None
    }

    async fn transactions_by_address(&self, address: Address) -> Vec<TransactionRecord> {
        let rec = self.record.lock();
        let mut records = Vec::new();

        for block in rec.history.values() {
            for tx in &block.transactions {
                if tx.from == address || tx.to == address {
                    records.push(TransactionRecord {
                        transaction: tx.clone(),
                        status: TxStatus::Committed,
                        block_height: Some(block.header.height),
                        block_hash: Some(block.hash),
                    });
                }
            }
        }

        for tx in rec.queue.transactions.iter() {
            if tx.from == address || tx.to == address {
                records.push(TransactionRecord {
                    transaction: tx.clone(),
                    status: TxStatus::Pending,
                    block_height: None,
                    block_hash: None,
                });
            }
        }

        records
    }

    async fn trigger_backup(&self) -> MeridianResult<Option<String>> {
        match &self.backup {
            None => Ok(None),
            Some(service) => {
                let snapshot = self.snapshot();
                let cid = service.upload(&snapshot).await?;
                Ok(Some(cid))
            }
        }
    }

    async fn restore(&self, snapshot: ChainSnapshot, cid: &str, force: bool) -> MeridianResult<()> {
        let service = self
            .backup
            .as_ref()
            .ok_or_else(|| MeridianError::ConfigError("backup store not configured".to_string()))?;

        match service.latest_entry().await? {
            Some(entry) if entry.cid == cid => {}
            _ => return Err(MeridianError::CidMismatch),
        }

        self.with_record(|rec| {
            if rec.world.latest_height != 0 && !force {
                return Err(MeridianError::AlreadyInitialised);
            }

            rec.committed = snapshot
                .history
                .values()
                .flat_map(|b| b.transactions.iter().map(|t| t.hash))
                .collect();
            rec.world = snapshot.world;
            rec.queue = PendingQueue {
                transactions: snapshot.queued.into(),
                ..PendingQueue::default()
            };
            rec.history = snapshot.history;
            rec.consensus = snapshot.consensus;
            Ok(())
        })?;

        info!(cid = %cid, "state restored from snapshot");
        Ok(())
    }

    async fn report_error(&self, message: String) {
        warn!(error = %message, "proposer reported an error");
        let _ = self.with_record(|rec| {
            rec.world.last_proposer_error = Some(message);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{MemoryContentStore, MemoryIndexStore};
    use meridian_core::{Amount, BackupConfig, Signature};
    use meridian_crypto::keys::KeyPair;
    use meridian_crypto::signing::sign;

    fn tuning() -> ConsensusTuning {
        ConsensusTuning {
            block_max_txs: 100,
            block_min_txs: 1,
            consensus_timeout_ms: 200,
            watchdog_timeout_ms: 100,
        }
    }

    struct Fixture {
        coordinator: Arc<Coordinator>,
        funded: KeyPair,
        validators: Vec<KeyPair>,
    }

    async fn setup(validator_count: usize) -> Fixture {
        setup_with_backup(validator_count, None).await
    }

    async fn setup_with_backup(validator_count: usize, backup: Option<Arc<BackupService>>) -> Fixture {
        let funded = KeyPair::generate();
        let validators: Vec<KeyPair> = (0..validator_count).map(|_| KeyPair::generate()).collect();

        let mut genesis = GenesisConfig::devnet().add_premine(
            funded.address(),
            Amount::new(1_000_000),
            "test funds",
        );
        for (i, v) in validators.iter().enumerate() {
            genesis = genesis.add_validator(&format!("val-{}", i), v.public_key(), v.address());
        }

        let coordinator = Coordinator::new(genesis, tuning(), None, backup);
        coordinator.init_genesis(None, false).await.unwrap();

        Fixture {
            coordinator,
            funded,
            validators,
        }
    }

    fn transfer(kp: &KeyPair, to: Address, amount: u128, sequence: u64) -> Transaction {
        Transaction::create(kp, to, Amount::new(amount), sequence, Timestamp::now()).unwrap()
    }

    fn votes_for(block: &Block, validators: &[KeyPair]) -> Vec<BlockVote> {
        let preimage = vote_preimage(&block.hash);
        validators
            .iter()
            .enumerate()
            .map(|(i, kp)| BlockVote {
                validator_id: format!("val-{}", i),
                validator_public_key: kp.public_key(),
                signature: sign(kp, &preimage),
                timestamp_ms: Timestamp::now().as_millis(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_genesis_initialises_state() {
        let fx = setup(3).await;
        let status = fx.coordinator.query_state().await;

        assert_eq!(status.latest_height, 0);
        assert_eq!(status.validator_count, 3);
        assert_eq!(status.required_signatures, 2);
        assert_ne!(status.genesis_hash, Hash::ZERO);
        assert_eq!(status.latest_hash, status.genesis_hash);
    }

    #[tokio::test]
    async fn test_reinit_requires_force() {
        let fx = setup(3).await;
        let result = fx.coordinator.init_genesis(None, false).await;
        assert!(matches!(result, Err(MeridianError::AlreadyInitialised)));

        fx.coordinator.init_genesis(None, true).await.unwrap();
        assert_eq!(fx.coordinator.query_state().await.latest_height, 0);
    }

    #[tokio::test]
    async fn test_admission_happy_path() {
        let fx = setup(3).await;
        let tx = transfer(&fx.funded, Address([9u8; 20]), 100, 0);

        fx.coordinator.add_transaction(tx.clone()).await.unwrap();

        let status = fx.coordinator.query_state().await;
        assert_eq!(status.pending_tx, 1);

        let record = fx.coordinator.query_transaction(tx.hash).await.unwrap();
        assert_eq!(record.status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn test_admission_rejects_duplicate() {
        let fx = setup(3).await;
        let tx = transfer(&fx.funded, Address([9u8; 20]), 100, 0);

        fx.coordinator.add_transaction(tx.clone()).await.unwrap();
        let result = fx.coordinator.add_transaction(tx).await;
        assert!(matches!(result, Err(MeridianError::DuplicateTransaction(_))));
        assert_eq!(fx.coordinator.query_state().await.pending_tx, 1);
    }

    #[tokio::test]
    async fn test_admission_rejects_wrong_sequence() {
        let fx = setup(3).await;
        let tx = transfer(&fx.funded, Address([9u8; 20]), 100, 3);

        let result = fx.coordinator.add_transaction(tx).await;
        assert!(matches!(
            result,
            Err(MeridianError::SequenceMismatch { expected: 0, got: 3 })
        ));
    }

    #[tokio::test]
    async fn test_admission_counts_queued_transactions() {
        // Queued transactions advance the acceptable sequence, so a sender
        // can chain submissions; re-using a taken sequence is rejected
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([8u8; 20]), 100, 1))
            .await
            .unwrap();

        // Same sequence, different recipient: exactly one wins
        let result = fx
            .coordinator
            .add_transaction(transfer(&fx.funded, Address([7u8; 20]), 100, 1))
            .await;
        assert!(matches!(
            result,
            Err(MeridianError::SequenceMismatch { expected: 2, got: 1 })
        ));
        assert_eq!(fx.coordinator.query_state().await.pending_tx, 2);
    }

    #[tokio::test]
    async fn test_admission_rejects_insufficient_balance() {
        let fx = setup(3).await;
        let tx = transfer(&fx.funded, Address([9u8; 20]), 2_000_000, 0);

        let result = fx.coordinator.add_transaction(tx).await;
        assert!(matches!(result, Err(MeridianError::InsufficientBalance { .. })));
        assert_eq!(fx.coordinator.query_state().await.pending_tx, 0);
    }

    #[tokio::test]
    async fn test_lock_discipline() {
        let fx = setup(3).await;

        // Empty queue: no round to start
        let result = fx.coordinator.acquire_processing_lock().await;
        assert!(matches!(result, Err(MeridianError::EmptyQueue)));

        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        let snapshot = fx.coordinator.acquire_processing_lock().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        // A second acquisition while the round is fresh fails
        let result = fx.coordinator.acquire_processing_lock().await;
        assert!(matches!(result, Err(MeridianError::RoundInProgress)));

        fx.coordinator.release_processing_lock(false).await.unwrap();
        assert_eq!(fx.coordinator.query_state().await.pending_tx, 1);
        fx.coordinator.acquire_processing_lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_takeover() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();

        // After consensus_timeout_ms the lock is implicitly takeable
        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = fx.coordinator.acquire_processing_lock().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_full_round_commits_state() {
        let fx = setup(3).await;
        let to = Address([9u8; 20]);
        fx.coordinator
            .add_transaction(transfer(&fx.funded, to, 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.tx_count, 1);
        assert_eq!(block.header.tx_root, block.transactions[0].hash);

        let votes = votes_for(&block, &fx.validators);
        let outcome = fx.coordinator.commit_block(block, votes).await.unwrap();
        assert_eq!(outcome.height, 1);
        assert_eq!(outcome.executed, 1);

        let status = fx.coordinator.query_state().await;
        assert_eq!(status.latest_height, 1);
        assert_eq!(status.pending_tx, 0);
        assert!(!status.processing);

        let account = fx.coordinator.query_account(fx.funded.address()).await;
        assert_eq!(account.balance, Amount::new(999_900));
        assert_eq!(account.sequence, 1);
        assert_eq!(fx.coordinator.query_account(to).await.balance, Amount::new(100));

        // Hash chain holds
        let genesis = fx.coordinator.query_block(0).await.unwrap();
        let committed = fx.coordinator.query_block(1).await.unwrap();
        assert_eq!(committed.header.prev_hash, genesis.hash);
    }

    #[tokio::test]
    async fn test_commit_requires_quorum() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();

        // Only one of three validators signed
        let votes = votes_for(&block, &fx.validators[..1]);
        let result = fx.coordinator.commit_block(block, votes).await;
        assert!(matches!(
            result,
            Err(MeridianError::InsufficientSignatures { got: 1, required: 2 })
        ));

        // The transaction survives for the next round
        assert_eq!(fx.coordinator.query_state().await.pending_tx, 1);
    }

    #[tokio::test]
    async fn test_commit_filters_outsider_and_duplicate_votes() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        let preimage = vote_preimage(&block.hash);

        // One real vote duplicated, one vote from outside the set, one
        // vote with a garbage signature: quorum of 2 is not reached
        let outsider = KeyPair::generate();
        let real = BlockVote {
            validator_id: "val-0".to_string(),
            validator_public_key: fx.validators[0].public_key(),
            signature: sign(&fx.validators[0], &preimage),
            timestamp_ms: 1,
        };
        let votes = vec![
            real.clone(),
            real,
            BlockVote {
                validator_id: "intruder".to_string(),
                validator_public_key: outsider.public_key(),
                signature: sign(&outsider, &preimage),
                timestamp_ms: 1,
            },
            BlockVote {
                validator_id: "val-1".to_string(),
                validator_public_key: fx.validators[1].public_key(),
                signature: Signature::ZERO,
                timestamp_ms: 1,
            },
        ];

        let result = fx.coordinator.commit_block(block, votes).await;
        assert!(matches!(
            result,
            Err(MeridianError::InsufficientSignatures { got: 1, required: 2 })
        ));
    }

    #[tokio::test]
    async fn test_commit_rejects_wrong_height_and_parent() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        let votes = votes_for(&block, &fx.validators);

        let mut wrong_height = block.clone();
        wrong_height.header.height = 5;
        wrong_height.hash = wrong_height.header.compute_hash().unwrap();
        let result = fx
            .coordinator
            .commit_block(wrong_height.clone(), votes_for(&wrong_height, &fx.validators))
            .await;
        assert!(matches!(result, Err(MeridianError::WrongHeight { expected: 1, got: 5 })));

        let mut wrong_parent = block.clone();
        wrong_parent.header.prev_hash = Hash([0xee; 32]);
        wrong_parent.hash = wrong_parent.header.compute_hash().unwrap();
        let result = fx
            .coordinator
            .commit_block(wrong_parent.clone(), votes_for(&wrong_parent, &fx.validators))
            .await;
        assert!(matches!(result, Err(MeridianError::WrongParent)));

        // The untampered block still commits
        fx.coordinator.commit_block(block, votes).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_is_at_most_once() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        let votes = votes_for(&block, &fx.validators);

        fx.coordinator.commit_block(block.clone(), votes.clone()).await.unwrap();

        // A retry of the same block fails the height check
        let result = fx.coordinator.commit_block(block, votes).await;
        assert!(matches!(result, Err(MeridianError::WrongHeight { expected: 2, got: 1 })));
    }

    #[tokio::test]
    async fn test_strict_proposer_signature() {
        let proposer = KeyPair::generate();
        let funded = KeyPair::generate();
        let validators: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();

        let mut genesis =
            GenesisConfig::devnet().add_premine(funded.address(), Amount::new(1_000), "funds");
        for (i, v) in validators.iter().enumerate() {
            genesis = genesis.add_validator(&format!("val-{}", i), v.public_key(), v.address());
        }

        let coordinator = Coordinator::new(genesis, tuning(), Some(proposer.public_key()), None);
        coordinator.init_genesis(None, false).await.unwrap();
        coordinator
            .add_transaction(transfer(&funded, Address([9u8; 20]), 10, 0))
            .await
            .unwrap();

        coordinator.acquire_processing_lock().await.unwrap();
        let mut block = coordinator.pack_block("proposer-0").await.unwrap();
        let votes = votes_for(&block, &validators);

        // Unsigned block is rejected in strict mode
        let result = coordinator.commit_block(block.clone(), votes.clone()).await;
        assert!(matches!(result, Err(MeridianError::InvalidSignature)));

        block.proposer_signature = Some(sign(&proposer, &vote_preimage(&block.hash)));
        coordinator.commit_block(block, votes).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_of_twenty_in_one_block() {
        let fx = setup(3).await;
        let sink = Address([9u8; 20]);

        for i in 0..20u64 {
            fx.coordinator
                .add_transaction(transfer(&fx.funded, sink, 10, i))
                .await
                .unwrap();
        }
        assert_eq!(fx.coordinator.query_state().await.pending_tx, 20);

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        assert_eq!(block.header.tx_count, 20);

        let votes = votes_for(&block, &fx.validators);
        let outcome = fx.coordinator.commit_block(block, votes).await.unwrap();
        assert_eq!(outcome.executed, 20);

        let status = fx.coordinator.query_state().await;
        assert_eq!(status.latest_height, 1);
        assert_eq!(status.pending_tx, 0);

        let account = fx.coordinator.query_account(fx.funded.address()).await;
        assert_eq!(account.sequence, 20);
        assert_eq!(fx.coordinator.query_account(sink).await.balance, Amount::new(200));
    }

    #[tokio::test]
    async fn test_pack_caps_at_block_max_txs() {
        // Distinct senders so all transactions are admissible at once
        let senders: Vec<KeyPair> = (0..5).map(|_| KeyPair::generate()).collect();
        let validators: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();

        let mut genesis = GenesisConfig::devnet();
        for s in &senders {
            genesis = genesis.add_premine(s.address(), Amount::new(1_000), "sender");
        }
        for (i, v) in validators.iter().enumerate() {
            genesis = genesis.add_validator(&format!("val-{}", i), v.public_key(), v.address());
        }

        let mut small = tuning();
        small.block_max_txs = 3;
        let coordinator = Coordinator::new(genesis, small, None, None);
        coordinator.init_genesis(None, false).await.unwrap();

        for s in &senders {
            coordinator
                .add_transaction(transfer(s, Address([9u8; 20]), 10, 0))
                .await
                .unwrap();
        }

        coordinator.acquire_processing_lock().await.unwrap();
        let block = coordinator.pack_block("proposer-0").await.unwrap();
        assert_eq!(block.header.tx_count, 3);

        let votes = votes_for(&block, &validators);
        coordinator.commit_block(block, votes).await.unwrap();

        // The two overflow transactions stay queued
        assert_eq!(coordinator.query_state().await.pending_tx, 2);
    }

    #[tokio::test]
    async fn test_watchdog_rescues_stuck_round() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        fx.coordinator.pack_block("proposer-0").await.unwrap();
        assert!(fx.coordinator.is_watchdog_armed());

        // Proposer "crashes" here; the watchdog fires and releases the lock
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = fx.coordinator.query_state().await;
        assert!(!status.processing);
        assert_eq!(status.pending_tx, 1);

        // A fresh round at the same height succeeds
        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        assert_eq!(block.header.height, 1);
        let votes = votes_for(&block, &fx.validators);
        fx.coordinator.commit_block(block, votes).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_disarms_watchdog() {
        let fx = setup(3).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();

        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        let votes = votes_for(&block, &fx.validators);
        fx.coordinator.commit_block(block, votes).await.unwrap();

        assert!(!fx.coordinator.is_watchdog_armed());
    }

    #[tokio::test]
    async fn test_report_error_is_observable() {
        let fx = setup(3).await;
        fx.coordinator.report_error("fan-out timed out".to_string()).await;

        let status = fx.coordinator.query_state().await;
        assert_eq!(status.last_proposer_error.as_deref(), Some("fan-out timed out"));
    }

    #[tokio::test]
    async fn test_backup_and_restore_roundtrip() {
        let content = Arc::new(MemoryContentStore::new());
        let index = Arc::new(MemoryIndexStore::new());
        let config = BackupConfig {
            enabled: true,
            interval_ms: 3_600_000,
            ttl: 10,
        };
        let service = Arc::new(BackupService::new(
            &config,
            [5u8; 32],
            content.clone(),
            index.clone(),
        ));

        let fx = setup_with_backup(3, Some(service.clone())).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();
        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        let votes = votes_for(&block, &fx.validators);
        fx.coordinator.commit_block(block, votes).await.unwrap();

        let cid = fx.coordinator.trigger_backup().await.unwrap().unwrap();
        let snapshot = service.fetch_snapshot(&cid).await.unwrap();
        assert_eq!(snapshot.world.latest_height, 1);

        // Restore onto a fresh coordinator sharing the same stores
        let other = Coordinator::new(GenesisConfig::devnet(), tuning(), None, Some(service.clone()));

        // Anti-rollback: a CID that is not the newest entry is rejected
        let result = other
            .restore(snapshot.clone(), "not-the-latest-cid", false)
            .await;
        assert!(matches!(result, Err(MeridianError::CidMismatch)));

        other.restore(snapshot, &cid, false).await.unwrap();
        let status = other.query_state().await;
        assert_eq!(status.latest_height, 1);
        assert_eq!(
            other.query_account(fx.funded.address()).await.balance,
            Amount::new(999_900)
        );
    }

    #[tokio::test]
    async fn test_restore_refuses_nonempty_chain_without_force() {
        let content = Arc::new(MemoryContentStore::new());
        let index = Arc::new(MemoryIndexStore::new());
        let config = BackupConfig {
            enabled: true,
            interval_ms: 3_600_000,
            ttl: 10,
        };
        let service = Arc::new(BackupService::new(&config, [5u8; 32], content, index));

        let fx = setup_with_backup(3, Some(service.clone())).await;
        fx.coordinator
            .add_transaction(transfer(&fx.funded, Address([9u8; 20]), 100, 0))
            .await
            .unwrap();
        fx.coordinator.acquire_processing_lock().await.unwrap();
        let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
        let votes = votes_for(&block, &fx.validators);
        fx.coordinator.commit_block(block, votes).await.unwrap();

        let cid = fx.coordinator.trigger_backup().await.unwrap().unwrap();
        let snapshot = service.fetch_snapshot(&cid).await.unwrap();

        // The chain has advanced past genesis: restore needs force
        let result = fx.coordinator.restore(snapshot.clone(), &cid, false).await;
        assert!(matches!(result, Err(MeridianError::AlreadyInitialised)));
        fx.coordinator.restore(snapshot, &cid, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_pack_root_matches_commit_root_randomised() {
        // Property: the state root recorded at pack time equals the root
        // of the state commit actually installs, for arbitrary admitted
        // transaction sets
        for round in 0..10u64 {
            let fx = setup(3).await;
            let n = (round % 4) + 1;
            for i in 0..n {
                let to = KeyPair::generate().address();
                fx.coordinator
                    .add_transaction(transfer(&fx.funded, to, 100 + round as u128, i))
                    .await
                    .ok();
            }
            if fx.coordinator.query_state().await.pending_tx == 0 {
                continue;
            }

            fx.coordinator.acquire_processing_lock().await.unwrap();
            let block = fx.coordinator.pack_block("proposer-0").await.unwrap();
            let votes = votes_for(&block, &fx.validators);
            fx.coordinator.commit_block(block.clone(), votes).await.unwrap();

            let world = fx.coordinator.world_state().await;
            assert_eq!(world.state_root().unwrap(), block.header.state_root);
        }
    }
}
