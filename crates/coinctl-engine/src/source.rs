//! Programmable in-memory chain source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use coinctl_core::error::NetworkError;
use coinctl_core::traits::ChainUtxoSource;
use coinctl_core::types::{Chain, Utxo};

/// [`ChainUtxoSource`] backed by a map of `(address, chain)` to outputs.
///
/// Unknown addresses report no outputs. Used for offline CLI runs and as a
/// test double: it counts fetches and can inject latency or failures.
#[derive(Debug, Default)]
pub struct MemoryUtxoSource {
    utxos: RwLock<HashMap<(String, Chain), Vec<Utxo>>>,
    failure: RwLock<Option<NetworkError>>,
    latency: RwLock<Duration>,
    fetches: AtomicUsize,
}

impl MemoryUtxoSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source for `chain` from an address map.
    pub fn from_address_map(chain: Chain, map: HashMap<String, Vec<Utxo>>) -> Self {
        let source = Self::default();
        {
            let mut utxos = source.utxos.write();
            for (address, list) in map {
                utxos.insert((address, chain), list);
            }
        }
        source
    }

    /// Replace the outputs reported for `address` on `chain`.
    pub fn set_utxos(&self, address: &str, chain: Chain, utxos: Vec<Utxo>) {
        self.utxos.write().insert((address.to_string(), chain), utxos);
    }

    /// Fail every subsequent fetch with `err` (`None` to heal).
    pub fn fail_with(&self, err: Option<NetworkError>) {
        *self.failure.write() = err;
    }

    /// Delay every subsequent fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainUtxoSource for MemoryUtxoSource {
    async fn fetch_utxos(&self, address: &str, chain: Chain) -> Result<Vec<Utxo>, NetworkError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.failure.read().clone() {
            return Err(err);
        }
        Ok(self
            .utxos
            .read()
            .get(&(address.to_string(), chain))
            .cloned()
            .unwrap_or_default())
    }
}
