//! Balance aggregation over the live set.

use serde::{Deserialize, Serialize};

use coinctl_core::types::ManagedUtxo;

/// Totals over a set of outputs.
///
/// Invariant: `total == spendable + frozen`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total: u64,
    pub spendable: u64,
    pub frozen: u64,
    /// Rounded mean of `privacy_score`; 0 for an empty set.
    pub average_privacy_score: u8,
    pub count: usize,
}

/// Aggregate values and scores over `utxos`.
pub fn aggregate(utxos: &[ManagedUtxo]) -> Snapshot {
    let mut snapshot = Snapshot {
        count: utxos.len(),
        ..Snapshot::default()
    };
    for utxo in utxos {
        if utxo.is_frozen() {
            snapshot.frozen = snapshot.frozen.saturating_add(utxo.value());
        } else {
            snapshot.spendable = snapshot.spendable.saturating_add(utxo.value());
        }
    }
    snapshot.total = snapshot.spendable.saturating_add(snapshot.frozen);
    snapshot.average_privacy_score = rounded_mean(utxos.iter().map(|u| u.privacy_score));
    snapshot
}

/// Mean of `scores`, rounded half-up. 0 when empty.
pub(crate) fn rounded_mean(scores: impl Iterator<Item = u8>) -> u8 {
    let (sum, n) = scores.fold((0u64, 0u64), |(sum, n), s| (sum + u64::from(s), n + 1));
    if n == 0 {
        return 0;
    }
    ((sum * 2 + n) / (2 * n)) as u8
}
