//! Encrypted local persistence
//!
//! Metrics snapshots are encrypted with the device key before they reach the
//! persistence collaborator. The collaborator only ever sees an opaque
//! [`PrivateEqData`] record; which engine backs it (file, database, platform
//! keystore) is up to the caller's [`KeyValueStore`] implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{EqError, Result};
use crate::keys::{EncryptedBlob, KeyManager, ENCRYPTION_STANDARD};
use crate::sync::{SyncStatus, SyncTask};
use crate::types::{EqMetrics, EqPatternType};

/// Version of the on-disk record layout
pub const STORAGE_VERSION: u32 = 1;

/// The only on-disk representation of EQ data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateEqData {
    pub encrypted_metrics: EncryptedBlob,
    pub encryption_standard: String,
    pub device_id: String,
    pub storage_version: u32,
    pub sync_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selective_sync_patterns: Option<Vec<EqPatternType>>,
}

/// Persistence collaborator (allows different backends)
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write bytes under a key, replacing any previous value
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Read bytes stored under a key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a key, reporting whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// In-process store, useful for tests and the CLI
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Storage key for a device's metrics record
pub fn storage_key(device_id: &str) -> String {
    format!("eq-vault/{device_id}/metrics")
}

/// Encrypting front for a [`KeyValueStore`]
pub struct SecureLocalStore<S: KeyValueStore> {
    backend: S,
    sync_enabled: bool,
    selective_sync_patterns: Option<Vec<EqPatternType>>,
}

impl<S: KeyValueStore> SecureLocalStore<S> {
    /// Wrap a backend with sync disabled
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            sync_enabled: false,
            selective_sync_patterns: None,
        }
    }

    /// Record in saved data that sync is enabled for the given pattern types
    pub fn with_sync(mut self, patterns: Vec<EqPatternType>) -> Self {
        self.sync_enabled = true;
        self.selective_sync_patterns = Some(patterns);
        self
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Encrypt a metrics snapshot and persist it.
    ///
    /// Encryption completes before the write is issued.
    pub async fn save(&self, keys: &KeyManager, metrics: &EqMetrics) -> Result<PrivateEqData> {
        let device_id = keys.device_id()?.to_string();
        let encrypted_metrics = keys.encrypt_json(metrics)?;

        let previous = self.load_record(&device_id).await?;
        let record = PrivateEqData {
            encrypted_metrics,
            encryption_standard: ENCRYPTION_STANDARD.to_string(),
            device_id,
            storage_version: STORAGE_VERSION,
            sync_enabled: self.sync_enabled,
            last_sync_hash: previous.and_then(|r| r.last_sync_hash),
            selective_sync_patterns: self.selective_sync_patterns.clone(),
        };

        self.write_record(&record).await?;
        info!(
            device_id = %record.device_id,
            data_points = metrics.data_points,
            "Persisted encrypted metrics"
        );
        Ok(record)
    }

    /// Load and decrypt the device's latest metrics snapshot
    pub async fn load(&self, keys: &KeyManager) -> Result<Option<EqMetrics>> {
        let device_id = keys.device_id()?;
        let Some(record) = self.load_record(device_id).await? else {
            return Ok(None);
        };

        if record.storage_version != STORAGE_VERSION {
            return Err(EqError::Storage(format!(
                "unsupported storage version {}",
                record.storage_version
            )));
        }

        let metrics = keys.decrypt_json(&record.encrypted_metrics)?;
        debug!(device_id, "Loaded encrypted metrics");
        Ok(Some(metrics))
    }

    /// Read the raw encrypted record without decrypting it
    pub async fn load_record(&self, device_id: &str) -> Result<Option<PrivateEqData>> {
        match self.backend.get(&storage_key(device_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remember the hash of the last successful sync
    pub async fn record_sync(&self, keys: &KeyManager, sync_hash: &str) -> Result<()> {
        let device_id = keys.device_id()?;
        let mut record = self
            .load_record(device_id)
            .await?
            .ok_or_else(|| EqError::Storage(format!("no record for device {device_id}")))?;

        record.last_sync_hash = Some(sync_hash.to_string());
        self.write_record(&record).await
    }

    /// Record a completed sync task's envelope hash as the last sync.
    /// Returns the stored hash.
    pub async fn record_completed_sync(&self, keys: &KeyManager, task: &SyncTask) -> Result<String> {
        if !matches!(task.status, SyncStatus::Completed { .. }) {
            return Err(EqError::InvalidInput(format!(
                "sync task {} has not completed",
                task.id
            )));
        }
        let hash = task.envelope.content_hash();
        self.record_sync(keys, &hash).await?;
        debug!(task_id = %task.id, "Recorded last sync hash");
        Ok(hash)
    }

    /// Delete the device's record
    pub async fn delete(&self, keys: &KeyManager) -> Result<bool> {
        let device_id = keys.device_id()?;
        let removed = self.backend.delete(&storage_key(device_id)).await?;
        info!(device_id, removed, "Deleted local EQ data");
        Ok(removed)
    }

    async fn write_record(&self, record: &PrivateEqData) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.put(&storage_key(&record.device_id), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_KDF_ITERATIONS;
    use crate::patterns::tests::flat_metrics;
    use pretty_assertions::assert_eq;

    async fn keys_for(device: &str) -> KeyManager {
        let mut keys = KeyManager::with_iterations(MIN_KDF_ITERATIONS).unwrap();
        keys.initialize("hunter2-but-longer", device).await.unwrap();
        keys
    }

    #[tokio::test]
    async fn test_metrics_roundtrip_is_byte_identical() {
        let keys = keys_for("phone-1").await;
        let store = SecureLocalStore::new(InMemoryStore::new());
        let mut metrics = flat_metrics(61.25, 0);
        metrics.empathy = 87.125;

        store.save(&keys, &metrics).await.unwrap();
        let loaded = store.load(&keys).await.unwrap().unwrap();

        assert_eq!(loaded, metrics);
        assert_eq!(
            serde_json::to_vec(&loaded).unwrap(),
            serde_json::to_vec(&metrics).unwrap()
        );
    }

    #[tokio::test]
    async fn test_backend_never_sees_plaintext() {
        let keys = keys_for("phone-1").await;
        let store = SecureLocalStore::new(InMemoryStore::new());
        store.save(&keys, &flat_metrics(50.0, 0)).await.unwrap();

        let raw = store
            .backend()
            .get(&storage_key("phone-1"))
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(!text.contains("self_awareness"));
        assert!(!text.contains("empathy"));
        assert!(text.contains(ENCRYPTION_STANDARD));
    }

    #[tokio::test]
    async fn test_save_requires_initialized_keys() {
        let store = SecureLocalStore::new(InMemoryStore::new());
        let result = store.save(&KeyManager::new(), &flat_metrics(50.0, 0)).await;
        assert!(matches!(result, Err(EqError::EncryptionNotInitialized)));
        assert!(store.backend().is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_record_loads_none() {
        let keys = keys_for("phone-2").await;
        let store = SecureLocalStore::new(InMemoryStore::new());
        assert!(store.load(&keys).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_hash_survives_resave() {
        let keys = keys_for("phone-3").await;
        let store = SecureLocalStore::new(InMemoryStore::new())
            .with_sync(vec![EqPatternType::EmpathySpike]);

        store.save(&keys, &flat_metrics(50.0, 0)).await.unwrap();
        store.record_sync(&keys, "abc123").await.unwrap();
        let record = store.save(&keys, &flat_metrics(55.0, 1)).await.unwrap();

        assert!(record.sync_enabled);
        assert_eq!(record.last_sync_hash.as_deref(), Some("abc123"));
        assert_eq!(
            record.selective_sync_patterns,
            Some(vec![EqPatternType::EmpathySpike])
        );
    }

    #[tokio::test]
    async fn test_completed_sync_task_sets_last_sync_hash() {
        use crate::sync::SyncEnvelope;
        use chrono::Utc;
        use uuid::Uuid;

        let keys = keys_for("phone-5").await;
        let store = SecureLocalStore::new(InMemoryStore::new());
        store.save(&keys, &flat_metrics(50.0, 0)).await.unwrap();

        let mut task = SyncTask::new(SyncEnvelope {
            task_id: Uuid::new_v4(),
            key_fingerprint: keys.fingerprint().unwrap(),
            item_count: 1,
            payload: keys.encrypt(b"payload").unwrap(),
            created_at: Utc::now(),
        });
        assert!(matches!(
            store.record_completed_sync(&keys, &task).await,
            Err(EqError::InvalidInput(_))
        ));

        task.status = SyncStatus::Completed { synced_items: 1 };
        let hash = store.record_completed_sync(&keys, &task).await.unwrap();

        assert_eq!(hash, task.envelope.content_hash());
        let record = store.load_record("phone-5").await.unwrap().unwrap();
        assert_eq!(record.last_sync_hash, Some(hash));
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let keys = keys_for("phone-4").await;
        let store = SecureLocalStore::new(InMemoryStore::new());
        store.save(&keys, &flat_metrics(50.0, 0)).await.unwrap();

        assert!(store.delete(&keys).await.unwrap());
        assert!(store.load(&keys).await.unwrap().is_none());
        assert!(!store.delete(&keys).await.unwrap());
    }
}
