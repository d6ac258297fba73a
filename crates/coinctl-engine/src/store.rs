//! Metadata store implementations.
//!
//! - [`MemoryMetadataStore`]: process-local map, with injectable failures
//! - [`JsonFileStore`]: one JSON document on disk, cached in memory

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use coinctl_core::error::StoreError;
use coinctl_core::traits::MetadataStore;
use coinctl_core::types::{UtxoKey, UtxoMetadata};

// ------------------------------------------------------------------
// MemoryMetadataStore
// ------------------------------------------------------------------

/// In-memory [`MetadataStore`].
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<UtxoKey, UtxoMetadata>>,
    load_failure: RwLock<Option<StoreError>>,
    save_failure: RwLock<Option<StoreError>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate from existing records.
    pub fn with_records(records: impl IntoIterator<Item = (UtxoKey, UtxoMetadata)>) -> Self {
        let store = Self::default();
        store.records.write().extend(records);
        store
    }

    /// Make every subsequent load fail with `err` (`None` to heal).
    pub fn fail_loads_with(&self, err: Option<StoreError>) {
        *self.load_failure.write() = err;
    }

    /// Make every subsequent save fail with `err` (`None` to heal).
    pub fn fail_saves_with(&self, err: Option<StoreError>) {
        *self.save_failure.write() = err;
    }

    /// Copy of the record for `key`, bypassing failure injection.
    pub fn get(&self, key: &UtxoKey) -> Option<UtxoMetadata> {
        self.records.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn load(&self, key: &UtxoKey) -> Result<Option<UtxoMetadata>, StoreError> {
        if let Some(err) = self.load_failure.read().clone() {
            return Err(err);
        }
        Ok(self.records.read().get(key).cloned())
    }

    async fn save(&self, key: &UtxoKey, metadata: &UtxoMetadata) -> Result<(), StoreError> {
        if let Some(err) = self.save_failure.read().clone() {
            return Err(err);
        }
        self.records.write().insert(*key, metadata.clone());
        Ok(())
    }

    async fn load_many(
        &self,
        keys: &[UtxoKey],
    ) -> Result<HashMap<UtxoKey, UtxoMetadata>, StoreError> {
        if let Some(err) = self.load_failure.read().clone() {
            return Err(err);
        }
        let records = self.records.read();
        Ok(keys
            .iter()
            .filter_map(|k| records.get(k).map(|md| (*k, md.clone())))
            .collect())
    }
}

// ------------------------------------------------------------------
// JsonFileStore
// ------------------------------------------------------------------

const FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    /// Records keyed by `txid:vout`.
    records: BTreeMap<String, UtxoMetadata>,
}

/// [`MetadataStore`] persisted as a single JSON document.
///
/// The whole file is read once on [`open`](Self::open) and rewritten on every
/// save through a sibling temp file and a rename, so a crash mid-write leaves
/// the previous version in place. A failed write reverts the cached record.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: tokio::sync::Mutex<BTreeMap<UtxoKey, UtxoMetadata>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store; the file
    /// and its parent directory are created on first save.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", path.display()))),
        };
        debug!(path = %path.display(), records = records.len(), "metadata store opened");
        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    async fn persist(&self, records: &BTreeMap<UtxoKey, UtxoMetadata>) -> Result<(), StoreError> {
        let bytes = encode(records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("{}: {e}", parent.display())))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.path.display())))
    }
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<UtxoKey, UtxoMetadata>, StoreError> {
    let file: StoreFile =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupted(e.to_string()))?;
    if file.version != FILE_VERSION {
        return Err(StoreError::Corrupted(format!(
            "unsupported version {}",
            file.version
        )));
    }
    file.records
        .into_iter()
        .map(|(key, md)| {
            key.parse::<UtxoKey>()
                .map(|k| (k, md))
                .map_err(|e| StoreError::Corrupted(e.to_string()))
        })
        .collect()
}

fn encode(records: &BTreeMap<UtxoKey, UtxoMetadata>) -> Result<Vec<u8>, StoreError> {
    let file = StoreFile {
        version: FILE_VERSION,
        records: records
            .iter()
            .map(|(k, md)| (k.to_string(), md.clone()))
            .collect(),
    };
    serde_json::to_vec_pretty(&file).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn load(&self, key: &UtxoKey) -> Result<Option<UtxoMetadata>, StoreError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &UtxoKey, metadata: &UtxoMetadata) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let previous = records.insert(*key, metadata.clone());
        if let Err(e) = self.persist(&records).await {
            match previous {
                Some(md) => records.insert(*key, md),
                None => records.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn load_many(
        &self,
        keys: &[UtxoKey],
    ) -> Result<HashMap<UtxoKey, UtxoMetadata>, StoreError> {
        let records = self.records.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| records.get(k).map(|md| (*k, md.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinctl_core::types::{Txid, UtxoSource};

    fn key(seed: u8, vout: u32) -> UtxoKey {
        UtxoKey::new(Txid([seed; 32]), vout)
    }

    fn labelled(label: &str) -> UtxoMetadata {
        UtxoMetadata {
            label: label.into(),
            source: UtxoSource::P2p,
            ..UtxoMetadata::default()
        }
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryMetadataStore::new();
        assert_eq!(store.load(&key(1, 0)).await.unwrap(), None);
        store.save(&key(1, 0), &labelled("rent")).await.unwrap();
        assert_eq!(store.load(&key(1, 0)).await.unwrap(), Some(labelled("rent")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_injected_failures() {
        let store = MemoryMetadataStore::with_records([(key(1, 0), labelled("a"))]);
        let err = StoreError::Unavailable("offline".into());

        store.fail_saves_with(Some(err.clone()));
        assert_eq!(store.save(&key(1, 0), &labelled("b")).await, Err(err.clone()));
        assert_eq!(store.get(&key(1, 0)), Some(labelled("a")));

        store.fail_loads_with(Some(err.clone()));
        assert_eq!(store.load_many(&[key(1, 0)]).await, Err(err));

        store.fail_loads_with(None);
        store.fail_saves_with(None);
        store.save(&key(1, 0), &labelled("b")).await.unwrap();
        assert_eq!(store.load(&key(1, 0)).await.unwrap(), Some(labelled("b")));
    }

    #[tokio::test]
    async fn json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("meta.json")).await.unwrap();
        assert_eq!(store.len().await, 0);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("meta.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        store.save(&key(1, 0), &labelled("savings")).await.unwrap();
        store.save(&key(2, 3), &labelled("tips")).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.load(&key(2, 3)).await.unwrap(), Some(labelled("tips")));
        let many = reopened.load_many(&[key(1, 0), key(9, 9)]).await.unwrap();
        assert_eq!(many.len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn json_store_file_is_keyed_by_outpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        store.save(&key(0xab, 7), &labelled("x")).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        let expected = format!("{}:7", "ab".repeat(32));
        assert_eq!(raw["records"][expected.as_str()]["label"], "x");
        assert_eq!(raw["records"][expected.as_str()]["source"], "p2p");
    }

    #[tokio::test]
    async fn json_store_rejects_corrupted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Corrupted(_))
        ));

        std::fs::write(&path, br#"{"version":1,"records":{"nope":{}}}"#).unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn json_store_reverts_cache_on_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        // The target path is an existing directory, so the rename fails.
        let path = dir.path().join("meta.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupant"), b"x").unwrap();

        let store = JsonFileStore {
            path: path.clone(),
            records: tokio::sync::Mutex::new(BTreeMap::new()),
        };
        let err = store.save(&key(1, 0), &labelled("lost")).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.load(&key(1, 0)).await.unwrap(), None);
    }
}
