//! The observable live set.
//!
//! A [`LiveSet`] is an immutable value: every change builds a new one with
//! scores, snapshot and generation computed together, and the engine swaps it
//! in as a single update. Observers therefore never see scores that disagree
//! with membership, or a snapshot that disagrees with either.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use coinctl_core::error::RefreshError;
use coinctl_core::types::{Chain, ManagedUtxo, UtxoKey};

use crate::balance::{aggregate, Snapshot};
use crate::privacy::PrivacyPolicy;

/// A tracked address on one chain.
pub type TrackedAddress = (String, Chain);

/// Why and since when an address's outputs may be out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleInfo {
    /// Failure of the most recent refresh attempt.
    pub cause: RefreshError,
    /// First failure since the last successful refresh.
    pub since: DateTime<Utc>,
}

/// Reconciled, scored outputs of every tracked address plus their aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSet {
    utxos: Vec<ManagedUtxo>,
    snapshot: Snapshot,
    stale: BTreeMap<TrackedAddress, StaleInfo>,
    generation: u64,
}

impl LiveSet {
    /// Score, sort and aggregate `utxos` into a new set.
    pub(crate) fn build(
        mut utxos: Vec<ManagedUtxo>,
        stale: BTreeMap<TrackedAddress, StaleInfo>,
        generation: u64,
        policy: &PrivacyPolicy,
    ) -> Self {
        utxos.sort_by_key(ManagedUtxo::key);
        utxos.dedup_by_key(|u| u.key());
        policy.score_all(&mut utxos);
        let snapshot = aggregate(&utxos);
        Self {
            utxos,
            snapshot,
            stale,
            generation,
        }
    }

    /// Same outputs and aggregates under a new stale map and generation.
    pub(crate) fn with_stale(&self, stale: BTreeMap<TrackedAddress, StaleInfo>, generation: u64) -> Self {
        Self {
            utxos: self.utxos.clone(),
            snapshot: self.snapshot,
            stale,
            generation,
        }
    }

    /// Every live output, sorted by key.
    pub fn utxos(&self) -> &[ManagedUtxo] {
        &self.utxos
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Stale indicators by address and chain.
    pub fn stale(&self) -> &BTreeMap<TrackedAddress, StaleInfo> {
        &self.stale
    }

    /// Whether any tracked address failed its last refresh.
    pub fn is_stale(&self) -> bool {
        !self.stale.is_empty()
    }

    pub fn stale_for(&self, address: &str, chain: Chain) -> Option<&StaleInfo> {
        self.stale.get(&(address.to_string(), chain))
    }

    /// Incremented on every published change. Starts at 0 for the empty set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, key: &UtxoKey) -> Option<&ManagedUtxo> {
        self.utxos
            .binary_search_by_key(key, ManagedUtxo::key)
            .ok()
            .map(|idx| &self.utxos[idx])
    }

    pub fn contains(&self, key: &UtxoKey) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    /// `(address, chain)` pairs with at least one live output.
    pub fn addresses(&self) -> BTreeSet<(&str, Chain)> {
        self.utxos
            .iter()
            .map(|u| (u.address.as_str(), u.chain))
            .collect()
    }

    /// Live outputs fetched for `address` on `chain`, sorted by key.
    pub fn for_address<'a>(
        &'a self,
        address: &'a str,
        chain: Chain,
    ) -> impl Iterator<Item = &'a ManagedUtxo> + 'a {
        self.utxos
            .iter()
            .filter(move |u| u.is_tracked_by(address, chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinctl_core::error::NetworkError;
    use coinctl_core::types::{Txid, Utxo, UtxoMetadata, UtxoSource};

    fn output(seed: u8, address: &str, value: u64, source: UtxoSource) -> ManagedUtxo {
        ManagedUtxo::new(
            Utxo::new(Txid([seed; 32]), 0, value, 1),
            address,
            Chain::Bitcoin,
            UtxoMetadata {
                source,
                ..UtxoMetadata::default()
            },
        )
    }

    fn sample() -> LiveSet {
        LiveSet::build(
            vec![
                output(3, "b", 777, UtxoSource::Wallet),
                output(1, "a", 555, UtxoSource::Wallet),
                output(2, "a", 333, UtxoSource::Exchange),
            ],
            BTreeMap::new(),
            7,
            &PrivacyPolicy::default(),
        )
    }

    #[test]
    fn default_is_empty_generation_zero() {
        let set = LiveSet::default();
        assert!(set.is_empty());
        assert_eq!(set.generation(), 0);
        assert_eq!(set.snapshot(), Snapshot::default());
        assert!(!set.is_stale());
    }

    #[test]
    fn build_sorts_and_scores() {
        let set = sample();
        let seeds: Vec<u8> = set.utxos().iter().map(|u| u.utxo.txid.0[0]).collect();
        assert_eq!(seeds, vec![1, 2, 3]);
        // Address "a" has two outputs, so each carries one reuse penalty.
        let a = set.get(&UtxoKey::new(Txid([1; 32]), 0)).unwrap();
        let b = set.get(&UtxoKey::new(Txid([3; 32]), 0)).unwrap();
        assert!(a.privacy_score < b.privacy_score);
        assert_eq!(set.snapshot().total, 1_665);
        assert_eq!(set.generation(), 7);
    }

    #[test]
    fn lookup_and_address_views() {
        let set = sample();
        assert!(set.contains(&UtxoKey::new(Txid([2; 32]), 0)));
        assert!(!set.contains(&UtxoKey::new(Txid([9; 32]), 0)));
        assert_eq!(
            set.addresses().into_iter().collect::<Vec<_>>(),
            vec![("a", Chain::Bitcoin), ("b", Chain::Bitcoin)]
        );
        assert_eq!(set.for_address("a", Chain::Bitcoin).count(), 2);
        assert_eq!(set.for_address("a", Chain::Litecoin).count(), 0);
        assert_eq!(set.for_address("zzz", Chain::Bitcoin).count(), 0);
    }

    #[test]
    fn stale_tracking() {
        let info = StaleInfo {
            cause: RefreshError::Network(NetworkError::Timeout),
            since: Utc::now(),
        };
        let set = LiveSet::build(
            Vec::new(),
            BTreeMap::from([(("a".to_string(), Chain::Bitcoin), info.clone())]),
            1,
            &PrivacyPolicy::default(),
        );
        assert!(set.is_stale());
        assert_eq!(set.stale_for("a", Chain::Bitcoin), Some(&info));
        assert_eq!(set.stale_for("a", Chain::Litecoin), None);
        assert_eq!(set.stale_for("b", Chain::Bitcoin), None);
    }
}
