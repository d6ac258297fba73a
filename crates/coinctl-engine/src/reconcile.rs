//! Merge chain-reported outputs with stored wallet metadata.
//!
//! The output set is exactly the raw outputs (one per key), each paired with
//! its stored metadata or [`UtxoMetadata::default`]. Outputs that a previous
//! live set held but `raw` no longer reports are simply absent from the
//! result; their metadata records are left in the store.
//!
//! Scores are not computed here. The live set rescoring happens once for the
//! whole population when the result is published.

use std::collections::{BTreeSet, HashMap};

use coinctl_core::types::{Chain, ManagedUtxo, Utxo, UtxoKey, UtxoMetadata};

/// Pair each raw output for `address` on `chain` with its resolved metadata.
///
/// Duplicate keys in `raw` keep the first occurrence. The result is sorted by
/// key.
pub fn reconcile(
    address: &str,
    chain: Chain,
    raw: &[Utxo],
    stored: &HashMap<UtxoKey, UtxoMetadata>,
) -> Vec<ManagedUtxo> {
    let mut seen = BTreeSet::new();
    let mut out: Vec<ManagedUtxo> = raw
        .iter()
        .filter(|utxo| seen.insert(utxo.key()))
        .map(|utxo| {
            let metadata = stored.get(&utxo.key()).cloned().unwrap_or_default();
            ManagedUtxo::new(utxo.clone(), address, chain, metadata)
        })
        .collect();
    out.sort_by_key(ManagedUtxo::key);
    out
}

/// Membership change between two generations of one address's outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileDiff {
    /// Keys first observed in the new set.
    pub added: Vec<UtxoKey>,
    /// Keys no longer reported (spent or reorged out).
    pub removed: Vec<UtxoKey>,
    /// Keys present in both.
    pub retained: usize,
}

/// Compare the keys of `previous` and `next`. Both sides are returned sorted.
pub fn diff(previous: &[ManagedUtxo], next: &[ManagedUtxo]) -> ReconcileDiff {
    let before: BTreeSet<UtxoKey> = previous.iter().map(ManagedUtxo::key).collect();
    let after: BTreeSet<UtxoKey> = next.iter().map(ManagedUtxo::key).collect();
    ReconcileDiff {
        added: after.difference(&before).copied().collect(),
        removed: before.difference(&after).copied().collect(),
        retained: before.intersection(&after).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinctl_core::types::{Txid, UtxoSource};

    fn raw(seed: u8, vout: u32, value: u64) -> Utxo {
        Utxo::new(Txid([seed; 32]), vout, value, 3)
    }

    #[test]
    fn missing_metadata_defaults() {
        let out = reconcile("addr", Chain::Bitcoin, &[raw(1, 0, 10_000)], &HashMap::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metadata, UtxoMetadata::default());
        assert_eq!(out[0].metadata.source, UtxoSource::Unknown);
        assert!(!out[0].is_frozen());
        assert_eq!(out[0].address, "addr");
        assert_eq!(out[0].chain, Chain::Bitcoin);
    }

    #[test]
    fn stored_metadata_is_attached() {
        let u = raw(1, 0, 10_000);
        let md = UtxoMetadata {
            label: "cold".into(),
            source: UtxoSource::Mining,
            ..UtxoMetadata::default()
        };
        let stored = HashMap::from([(u.key(), md.clone())]);
        let out = reconcile("addr", Chain::Bitcoin, &[u], &stored);
        assert_eq!(out[0].metadata, md);
    }

    #[test]
    fn output_is_exactly_the_raw_set() {
        let stale_key = raw(9, 0, 1).key();
        let stored = HashMap::from([(stale_key, UtxoMetadata::default())]);
        let out = reconcile("addr", Chain::Bitcoin, &[raw(2, 0, 5), raw(1, 1, 7)], &stored);
        let keys: Vec<UtxoKey> = out.iter().map(ManagedUtxo::key).collect();
        assert_eq!(keys, vec![raw(1, 1, 7).key(), raw(2, 0, 5).key()]);
    }

    #[test]
    fn duplicate_keys_collapse_to_first() {
        let out = reconcile("addr", Chain::Bitcoin, &[raw(1, 0, 100), raw(1, 0, 999)], &HashMap::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value(), 100);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let raws = [raw(3, 0, 1), raw(1, 2, 2), raw(2, 1, 3)];
        let a = reconcile("addr", Chain::Bitcoin, &raws, &HashMap::new());
        let b = reconcile("addr", Chain::Bitcoin, &raws, &HashMap::new());
        assert_eq!(a, b);
    }

    #[test]
    fn diff_reports_membership_change() {
        let prev = reconcile("a", Chain::Bitcoin, &[raw(1, 0, 1), raw(2, 0, 1)], &HashMap::new());
        let next = reconcile("a", Chain::Bitcoin, &[raw(2, 0, 1), raw(3, 0, 1)], &HashMap::new());
        let d = diff(&prev, &next);
        assert_eq!(d.added, vec![raw(3, 0, 1).key()]);
        assert_eq!(d.removed, vec![raw(1, 0, 1).key()]);
        assert_eq!(d.retained, 1);
    }
}
