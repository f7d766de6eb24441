//! Node runtime: wires the coordinator, the proposer and the validators
//!
//! Block production is event-driven: every successful admission fires the
//! proposer trigger as a detached task. The only autonomous timer in the
//! process is the coordinator's watchdog.

use meridian_consensus::{
    HttpValidatorClient, LocalValidatorClient, Proposer, RoundOutcome, ValidationResponse,
    Validator, ValidatorClient,
};
use meridian_coordinator::{BackupService, ContentStore, Coordinator, IndexStore, MemoryContentStore, MemoryIndexStore};
use meridian_core::{
    Address, Amount, GenesisConfig, Hash, MeridianError, MeridianResult, NodeConfig, PublicKey,
    Signature, Timestamp,
};
use meridian_crypto::keys::KeyPair;
use meridian_ledger::{Block, ChainSnapshot, CoordinatorApi, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builder for a fully wired node
pub struct NodeBuilder {
    config: NodeConfig,
    genesis: GenesisConfig,
    proposer_key: Option<KeyPair>,
    validator_keys: Vec<KeyPair>,
    faucet_key: Option<KeyPair>,
    backup_key: Option<[u8; 32]>,
    content_store: Option<Arc<dyn ContentStore>>,
    index_store: Option<Arc<dyn IndexStore>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig, genesis: GenesisConfig) -> Self {
        Self {
            config,
            genesis,
            proposer_key: None,
            validator_keys: vec![],
            faucet_key: None,
            backup_key: None,
            content_store: None,
            index_store: None,
        }
    }

    pub fn proposer_key(mut self, keypair: KeyPair) -> Self {
        self.proposer_key = Some(keypair);
        self
    }

    pub fn add_validator_key(mut self, keypair: KeyPair) -> Self {
        self.validator_keys.push(keypair);
        self
    }

    pub fn faucet_key(mut self, keypair: KeyPair) -> Self {
        self.faucet_key = Some(keypair);
        self
    }

    pub fn backup_key(mut self, key: [u8; 32]) -> Self {
        self.backup_key = Some(key);
        self
    }

    pub fn backup_stores(mut self, content: Arc<dyn ContentStore>, index: Arc<dyn IndexStore>) -> Self {
        self.content_store = Some(content);
        self.index_store = Some(index);
        self
    }

    pub fn build(self) -> MeridianResult<Arc<NodeRuntime>> {
        let backup = if self.config.backup.enabled {
            let key = self.backup_key.ok_or_else(|| {
                MeridianError::ConfigError("backup enabled without BACKUP_ENCRYPTION_KEY".to_string())
            })?;
            let content = self
                .content_store
                .unwrap_or_else(|| Arc::new(MemoryContentStore::new()));
            let index = self
                .index_store
                .unwrap_or_else(|| Arc::new(MemoryIndexStore::new()));
            Some(Arc::new(BackupService::new(&self.config.backup, key, content, index)))
        } else {
            None
        };

        let proposer_key = self.proposer_key.unwrap_or_else(KeyPair::generate);

        let coordinator = Coordinator::new(
            self.genesis.clone(),
            self.config.consensus.clone(),
            Some(proposer_key.public_key()),
            backup,
        );

        // In-process validator roles for every key this node holds
        let validators: Vec<Arc<Validator>> = self
            .validator_keys
            .iter()
            .enumerate()
            .map(|(i, kp)| {
                let id = validator_id(&self.genesis, &kp.public_key())
                    .unwrap_or_else(|| format!("val-{}", i));
                Arc::new(Validator::new(&id, kp.clone(), coordinator.clone() as Arc<dyn CoordinatorApi>))
            })
            .collect();

        let timeout = Duration::from_millis(self.config.consensus.consensus_timeout_ms);
        let clients: Vec<Arc<dyn ValidatorClient>> = if self.config.validator_endpoints.is_empty() {
            validators
                .iter()
                .map(|v| Arc::new(LocalValidatorClient::new(v.clone())) as Arc<dyn ValidatorClient>)
                .collect()
        } else {
            self.config
                .validator_endpoints
                .iter()
                .enumerate()
                .map(|(i, endpoint)| {
                    HttpValidatorClient::new(&format!("val-{}", i), endpoint, timeout)
                        .map(|c| Arc::new(c) as Arc<dyn ValidatorClient>)
                })
                .collect::<MeridianResult<Vec<_>>>()?
        };

        let proposer = Arc::new(Proposer::new(
            &self.config.name,
            proposer_key,
            coordinator.clone() as Arc<dyn CoordinatorApi>,
            clients,
            timeout,
        ));

        info!(
            name = %self.config.name,
            validators = validators.len(),
            network = ?self.config.network,
            "node runtime assembled"
        );

        Ok(Arc::new(NodeRuntime {
            config: self.config,
            genesis: self.genesis,
            coordinator,
            proposer,
            validators,
            faucet: self.faucet_key,
        }))
    }
}

fn validator_id(genesis: &GenesisConfig, key: &PublicKey) -> Option<String> {
    genesis
        .validators
        .iter()
        .find(|v| &v.public_key == key)
        .map(|v| v.id.clone())
}

/// A running node: the coordinator plus its consensus roles
pub struct NodeRuntime {
    config: NodeConfig,
    genesis: GenesisConfig,
    coordinator: Arc<Coordinator>,
    proposer: Arc<Proposer>,
    validators: Vec<Arc<Validator>>,
    faucet: Option<KeyPair>,
}

impl NodeRuntime {
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<dyn CoordinatorApi> {
        self.coordinator.clone()
    }

    pub async fn init_genesis(&self, genesis_time: Option<u64>, force: bool) -> MeridianResult<Hash> {
        self.coordinator.init_genesis(genesis_time, force).await
    }

    /// Façade-side admission: re-derive the hash, check the sender's
    /// address and signature, hand over to the coordinator, then trigger
    /// the proposer off the request path
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_transaction(
        &self,
        from: Address,
        to: Address,
        amount: Amount,
        sequence: u64,
        timestamp_ms: u64,
        public_key: PublicKey,
        signature: Signature,
    ) -> MeridianResult<Hash> {
        let tx =
            Transaction::from_signed_parts(from, to, amount, sequence, timestamp_ms, public_key, signature)?;
        tx.verify()?;

        let hash = tx.hash;
        self.coordinator.add_transaction(tx).await?;
        self.spawn_trigger();
        Ok(hash)
    }

    /// Devnet faucet: a normal signed transfer from the process-owned key
    pub async fn faucet_drip(&self, to: Address, amount: Amount) -> MeridianResult<Hash> {
        let faucet = self
            .faucet
            .as_ref()
            .ok_or_else(|| MeridianError::ConfigError("faucet key not configured".to_string()))?;

        let account = self.coordinator.query_account(faucet.address()).await;
        let tx = Transaction::create(faucet, to, amount, account.pending_sequence, Timestamp::now())?;

        let hash = tx.hash;
        self.coordinator.add_transaction(tx).await?;
        self.spawn_trigger();
        Ok(hash)
    }

    /// Fire the proposer without waiting for the outcome
    pub fn spawn_trigger(&self) {
        let proposer = self.proposer.clone();
        tokio::spawn(async move {
            match proposer.trigger().await {
                Ok(RoundOutcome::Committed(summary)) => {
                    debug!(height = summary.height, "triggered round committed")
                }
                Ok(RoundOutcome::Idle { reason }) => debug!(?reason, "trigger was a no-op"),
                Err(e) => warn!(error = %e, "triggered round failed"),
            }
        });
    }

    /// Fire the proposer and wait for the outcome
    pub async fn trigger_now(&self) -> MeridianResult<RoundOutcome> {
        self.proposer.trigger().await
    }

    /// Serve a remote proposer's validate request with this node's
    /// validator role
    pub async fn validate(&self, block: &Block, proposer_id: &str) -> Option<ValidationResponse> {
        match self.validators.first() {
            Some(validator) => Some(validator.validate(block, proposer_id).await),
            None => None,
        }
    }

    pub fn faucet_enabled(&self) -> bool {
        self.config.network.faucet_enabled() && self.faucet.is_some()
    }

    pub fn estimated_confirmation_ms(&self) -> u64 {
        self.genesis.block_time_ms
    }

    pub async fn trigger_backup(&self) -> MeridianResult<Option<String>> {
        self.coordinator.trigger_backup().await
    }

    pub async fn restore(&self, snapshot: ChainSnapshot, cid: &str, force: bool) -> MeridianResult<()> {
        self.coordinator.restore(snapshot, cid, force).await
    }
}
