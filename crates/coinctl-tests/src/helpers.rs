//! Shared fixtures for integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use coinctl_core::error::StoreError;
use coinctl_core::traits::MetadataStore;
use coinctl_core::types::*;
use coinctl_engine::{CoinControlEngine, EngineConfig, MemoryMetadataStore, MemoryUtxoSource};

/// Deterministic txid from a seed byte.
pub fn txid(seed: u8) -> Txid {
    Txid([seed; 32])
}

pub fn key(seed: u8, vout: u32) -> UtxoKey {
    UtxoKey::new(txid(seed), vout)
}

pub fn utxo(seed: u8, vout: u32, value: u64, confirmations: u32) -> Utxo {
    Utxo::new(txid(seed), vout, value, confirmations)
}

pub fn metadata(label: &str, source: UtxoSource) -> UtxoMetadata {
    UtxoMetadata {
        label: label.to_string(),
        source,
        ..UtxoMetadata::default()
    }
}

/// Engine wired to in-memory collaborators the test can still reach.
pub struct Harness {
    pub source: Arc<MemoryUtxoSource>,
    pub store: Arc<MemoryMetadataStore>,
    pub engine: Arc<CoinControlEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let source = Arc::new(MemoryUtxoSource::new());
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = Arc::new(CoinControlEngine::new(
            source.clone(),
            store.clone(),
            config,
        ));
        Self {
            source,
            store,
            engine,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle event recorded by [`SlowStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    Begin(UtxoKey, String),
    End(UtxoKey, String),
}

/// [`MetadataStore`] that sleeps inside every save and logs when each save
/// begins and ends, for checking write serialization. Loads can be slowed
/// too, to hold a refresh between fetch and publish.
pub struct SlowStore {
    inner: MemoryMetadataStore,
    delay: Duration,
    load_delay: Duration,
    events: Mutex<Vec<SaveEvent>>,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            delay,
            load_delay: Duration::ZERO,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_load_delay(mut self, load_delay: Duration) -> Self {
        self.load_delay = load_delay;
        self
    }

    pub fn events(&self) -> Vec<SaveEvent> {
        self.events.lock().clone()
    }

    pub fn get(&self, key: &UtxoKey) -> Option<UtxoMetadata> {
        self.inner.get(key)
    }
}

#[async_trait]
impl MetadataStore for SlowStore {
    async fn load(&self, key: &UtxoKey) -> Result<Option<UtxoMetadata>, StoreError> {
        tokio::time::sleep(self.load_delay).await;
        self.inner.load(key).await
    }

    async fn save(&self, key: &UtxoKey, metadata: &UtxoMetadata) -> Result<(), StoreError> {
        self.events
            .lock()
            .push(SaveEvent::Begin(*key, metadata.label.clone()));
        tokio::time::sleep(self.delay).await;
        let result = self.inner.save(key, metadata).await;
        self.events
            .lock()
            .push(SaveEvent::End(*key, metadata.label.clone()));
        result
    }

    async fn load_many(
        &self,
        keys: &[UtxoKey],
    ) -> Result<HashMap<UtxoKey, UtxoMetadata>, StoreError> {
        tokio::time::sleep(self.load_delay).await;
        self.inner.load_many(keys).await
    }
}
