//! Collaborator contracts consumed by the engine.
//!
//! - [`ChainUtxoSource`]: network view of an address's unspent outputs
//!   (the Esplora client in the `coinctl` binary, in-memory fakes in tests)
//! - [`MetadataStore`]: persistence for wallet-local annotations
//!
//! Both are injected into the engine at construction so tests can substitute
//! fakes without touching process-wide state.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{NetworkError, StoreError};
use crate::types::{Chain, Utxo, UtxoKey, UtxoMetadata};

/// Source of truth for which outputs are currently unspent.
#[async_trait]
pub trait ChainUtxoSource: Send + Sync {
    /// Fetch every unspent output currently paying to `address` on `chain`.
    ///
    /// Implementations own their transport timeout; the engine applies an
    /// additional outer bound from its configuration.
    async fn fetch_utxos(&self, address: &str, chain: Chain) -> Result<Vec<Utxo>, NetworkError>;
}

/// Key-value persistence for [`UtxoMetadata`], keyed by outpoint.
///
/// Records are never deleted by the engine: metadata of spent outputs stays
/// retrievable so a reappearing output (reorg) gets its annotations back.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Load the record for `key`. `Ok(None)` if the output was never annotated.
    async fn load(&self, key: &UtxoKey) -> Result<Option<UtxoMetadata>, StoreError>;

    /// Insert or replace the record for `key`.
    async fn save(&self, key: &UtxoKey, metadata: &UtxoMetadata) -> Result<(), StoreError>;

    /// Load records for several keys at once. Keys without a record are
    /// absent from the returned map.
    ///
    /// Default implementation calls [`load`](Self::load) per key.
    async fn load_many(
        &self,
        keys: &[UtxoKey],
    ) -> Result<HashMap<UtxoKey, UtxoMetadata>, StoreError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(metadata) = self.load(key).await? {
                found.insert(*key, metadata);
            }
        }
        Ok(found)
    }
}
