//! Encrypted off-chain backups
//!
//! Snapshots of the whole coordinator record are encrypted with
//! AES-256-GCM (`IV(12) || ciphertext || tag(16)`) and uploaded to a
//! content-addressed store; an index of `{cid, height, timestamp}` entries
//! lives in a key-value store. Uploads and unpinning never run under the
//! coordinator's write lock.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use meridian_core::{BackupConfig, MeridianError, MeridianResult, Timestamp};
use meridian_crypto::hashing::sha256;
use meridian_ledger::ChainSnapshot;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NONCE_LEN: usize = 12;

/// One backup index record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub cid: String,
    pub height: u64,
    pub timestamp_ms: u64,
}

/// Content-addressed blob store (IPFS-like pin/unpin semantics)
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> MeridianResult<String>;
    async fn get(&self, cid: &str) -> MeridianResult<Vec<u8>>;
    async fn unpin(&self, cid: &str) -> MeridianResult<()>;
}

/// Ordered index of backup entries, newest last
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn entries(&self) -> MeridianResult<Vec<BackupEntry>>;
    async fn append(&self, entry: BackupEntry) -> MeridianResult<()>;
    async fn remove(&self, cid: &str) -> MeridianResult<()>;
}

/// In-memory content store; the CID is the hex SHA-256 of the blob
pub struct MemoryContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> MeridianResult<String> {
        let cid = hex::encode(sha256(&bytes).as_bytes());
        self.blobs.lock().insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> MeridianResult<Vec<u8>> {
        self.blobs
            .lock()
            .get(cid)
            .cloned()
            .ok_or_else(|| MeridianError::NotFound(format!("cid {}", cid)))
    }

    async fn unpin(&self, cid: &str) -> MeridianResult<()> {
        self.blobs.lock().remove(cid);
        Ok(())
    }
}

/// In-memory index store
pub struct MemoryIndexStore {
    entries: Mutex<Vec<BackupEntry>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn entries(&self) -> MeridianResult<Vec<BackupEntry>> {
        Ok(self.entries.lock().clone())
    }

    async fn append(&self, entry: BackupEntry) -> MeridianResult<()> {
        self.entries.lock().push(entry);
        Ok(())
    }

    async fn remove(&self, cid: &str) -> MeridianResult<()> {
        self.entries.lock().retain(|e| e.cid != cid);
        Ok(())
    }
}

/// Encrypts, uploads and prunes coordinator snapshots
pub struct BackupService {
    content: Arc<dyn ContentStore>,
    index: Arc<dyn IndexStore>,
    cipher: Aes256Gcm,
    interval_ms: u64,
    ttl: usize,
    last_backup_ms: Mutex<u64>,
}

impl BackupService {
    pub fn new(
        config: &BackupConfig,
        key: [u8; 32],
        content: Arc<dyn ContentStore>,
        index: Arc<dyn IndexStore>,
    ) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self {
            content,
            index,
            cipher,
            interval_ms: config.interval_ms,
            ttl: config.ttl,
            // The cadence starts at boot; the first snapshot is due one
            // interval in
            last_backup_ms: Mutex::new(Timestamp::now().as_millis()),
        }
    }

    /// Whether the backup cadence calls for a new snapshot
    pub fn is_due(&self, now: Timestamp) -> bool {
        now.as_millis().saturating_sub(*self.last_backup_ms.lock()) >= self.interval_ms
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> MeridianResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| MeridianError::StorageError("snapshot encryption failed".to_string()))?;

        let mut output = nonce_bytes.to_vec();
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    pub fn decrypt(&self, payload: &[u8]) -> MeridianResult<Vec<u8>> {
        if payload.len() < NONCE_LEN {
            return Err(MeridianError::StorageError(format!(
                "snapshot too short: {} bytes",
                payload.len()
            )));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| MeridianError::StorageError("snapshot decryption failed".to_string()))
    }

    /// Serialize, encrypt and upload a snapshot, then prune old entries
    pub async fn upload(&self, snapshot: &ChainSnapshot) -> MeridianResult<String> {
        let plaintext = bincode::serialize(snapshot)?;
        let payload = self.encrypt(&plaintext)?;

        let cid = self.content.put(payload).await?;
        let now = Timestamp::now();
        self.index
            .append(BackupEntry {
                cid: cid.clone(),
                height: snapshot.world.latest_height,
                timestamp_ms: now.as_millis(),
            })
            .await?;
        *self.last_backup_ms.lock() = now.as_millis();

        info!(cid = %cid, height = snapshot.world.latest_height, "snapshot uploaded");

        self.prune().await?;
        Ok(cid)
    }

    /// Newest index entry, if any backup exists
    pub async fn latest_entry(&self) -> MeridianResult<Option<BackupEntry>> {
        Ok(self.index.entries().await?.into_iter().last())
    }

    /// Download and decrypt a snapshot by CID
    pub async fn fetch_snapshot(&self, cid: &str) -> MeridianResult<ChainSnapshot> {
        let payload = self.content.get(cid).await?;
        let plaintext = self.decrypt(&payload)?;
        Ok(bincode::deserialize(&plaintext)?)
    }

    /// Drop index entries beyond `ttl`, unpinning blobs in the background
    async fn prune(&self) -> MeridianResult<()> {
        let entries = self.index.entries().await?;
        if entries.len() <= self.ttl {
            return Ok(());
        }

        let excess = entries.len() - self.ttl;
        for stale in entries.into_iter().take(excess) {
            self.index.remove(&stale.cid).await?;
            let content = self.content.clone();
            tokio::spawn(async move {
                debug!(cid = %stale.cid, "unpinning expired snapshot");
                if let Err(e) = content.unpin(&stale.cid).await {
                    warn!(cid = %stale.cid, error = %e, "unpin failed");
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::ConsensusConfig;
    use meridian_ledger::{PendingQueue, WorldState};
    use std::collections::BTreeMap;

    fn service(interval_ms: u64, ttl: usize) -> BackupService {
        let config = BackupConfig {
            enabled: true,
            interval_ms,
            ttl,
        };
        BackupService::new(
            &config,
            [7u8; 32],
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryIndexStore::new()),
        )
    }

    fn snapshot(height: u64) -> ChainSnapshot {
        let mut world = WorldState::default();
        world.latest_height = height;
        ChainSnapshot {
            world,
            queued: vec![],
            history: BTreeMap::new(),
            consensus: ConsensusConfig::default(),
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let svc = service(1_000, 10);
        let plaintext = b"coordinator snapshot".to_vec();
        let payload = svc.encrypt(&plaintext).unwrap();

        assert!(payload.len() >= plaintext.len() + NONCE_LEN + 16);
        assert_eq!(svc.decrypt(&payload).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_rejects_wrong_key() {
        let svc1 = service(1_000, 10);
        let config = BackupConfig::default();
        let svc2 = BackupService::new(
            &config,
            [8u8; 32],
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryIndexStore::new()),
        );

        let payload = svc1.encrypt(b"secret").unwrap();
        assert!(svc2.decrypt(&payload).is_err());
    }

    #[test]
    fn test_decrypt_rejects_tampered_payload() {
        let svc = service(1_000, 10);
        let mut payload = svc.encrypt(b"secret").unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        assert!(svc.decrypt(&payload).is_err());
    }

    #[tokio::test]
    async fn test_upload_and_fetch_roundtrip() {
        let svc = service(1_000, 10);
        let snap = snapshot(5);

        let cid = svc.upload(&snap).await.unwrap();
        let restored = svc.fetch_snapshot(&cid).await.unwrap();
        assert_eq!(restored.world.latest_height, 5);

        let latest = svc.latest_entry().await.unwrap().unwrap();
        assert_eq!(latest.cid, cid);
        assert_eq!(latest.height, 5);
    }

    #[tokio::test]
    async fn test_ttl_prunes_oldest() {
        let svc = service(0, 3);

        for h in 0..5 {
            svc.upload(&snapshot(h)).await.unwrap();
        }

        let entries = svc.index.entries().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].height, 2);
        assert_eq!(entries[2].height, 4);
    }

    #[tokio::test]
    async fn test_is_due_respects_interval() {
        // Zero interval: always due; a long interval: not due yet
        let eager = service(0, 10);
        assert!(eager.is_due(Timestamp::now()));

        let relaxed = service(60_000, 10);
        assert!(!relaxed.is_due(Timestamp::now()));
        assert!(relaxed.is_due(Timestamp::from_millis(
            Timestamp::now().as_millis() + 120_000
        )));

        // Uploading resets the zero-interval clock too
        eager.upload(&snapshot(1)).await.unwrap();
        assert!(eager.is_due(Timestamp::now()));
    }
}
