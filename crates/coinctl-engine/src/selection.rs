//! Strategy ordering and coin selection.
//!
//! Every entry point filters frozen outputs first, then orders the remaining
//! candidates by the strategy's key with ties broken by `(txid, vout)`
//! ascending. The same order serves browsing (no target) and funding
//! (greedy minimal prefix). Nothing here mutates its input.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;

use coinctl_core::constants::{estimate_fee, OPTIMAL_VALUE_SCALE};
use coinctl_core::error::SelectionError;
use coinctl_core::types::{ManagedUtxo, SelectionStrategy, UtxoKey};

use crate::balance::rounded_mean;

/// Composite `optimal` key, equivalent in ordering to
/// `value / OPTIMAL_VALUE_SCALE + privacy_score` without truncation.
fn optimal_key(utxo: &ManagedUtxo) -> u128 {
    u128::from(utxo.value()) + u128::from(utxo.privacy_score) * u128::from(OPTIMAL_VALUE_SCALE)
}

/// Total order used by `strategy`.
pub fn compare(a: &ManagedUtxo, b: &ManagedUtxo, strategy: SelectionStrategy) -> Ordering {
    let primary = match strategy {
        SelectionStrategy::LargestFirst => b.value().cmp(&a.value()),
        SelectionStrategy::SmallestFirst => a.value().cmp(&b.value()),
        SelectionStrategy::OldestFirst => b.confirmations().cmp(&a.confirmations()),
        SelectionStrategy::NewestFirst => a.confirmations().cmp(&b.confirmations()),
        SelectionStrategy::PrivacyOptimized => b.privacy_score.cmp(&a.privacy_score),
        SelectionStrategy::Optimal => optimal_key(b).cmp(&optimal_key(a)),
    };
    primary.then_with(|| a.key().cmp(&b.key()))
}

/// Sort `utxos` in place by `strategy`, frozen outputs included.
pub fn sort(utxos: &mut [ManagedUtxo], strategy: SelectionStrategy) {
    utxos.sort_by(|a, b| compare(a, b, strategy));
}

/// Non-frozen outputs of `utxos`, ordered by `strategy`.
pub fn candidates(utxos: &[ManagedUtxo], strategy: SelectionStrategy) -> Vec<ManagedUtxo> {
    let mut pool: Vec<ManagedUtxo> = utxos.iter().filter(|u| !u.is_frozen()).cloned().collect();
    sort(&mut pool, strategy);
    pool
}

fn sum_values(utxos: &[ManagedUtxo]) -> u64 {
    utxos.iter().fold(0u64, |acc, u| acc.saturating_add(u.value()))
}

/// Browse (`target == None`) or fund (`Some(target)`) from `utxos`.
///
/// Funding returns the shortest strategy-ordered prefix whose sum reaches
/// `target`. A zero target needs no inputs and yields an empty selection.
pub fn select(
    utxos: &[ManagedUtxo],
    strategy: SelectionStrategy,
    target: Option<u64>,
) -> Result<Vec<ManagedUtxo>, SelectionError> {
    let pool = candidates(utxos, strategy);
    let Some(target) = target else {
        return Ok(pool);
    };
    if target == 0 {
        return Ok(Vec::new());
    }

    let mut running: u64 = 0;
    for (idx, utxo) in pool.iter().enumerate() {
        running = running.saturating_add(utxo.value());
        if running >= target {
            let mut selected = pool;
            selected.truncate(idx + 1);
            return Ok(selected);
        }
    }
    Err(SelectionError::insufficient(running, target))
}

/// Manual coin control: exactly the outputs named by `keys`, in key order.
///
/// Every key must be live and not frozen. With a target, the chosen outputs
/// must cover it.
pub fn select_manual(
    utxos: &[ManagedUtxo],
    keys: &[UtxoKey],
    target: Option<u64>,
) -> Result<Vec<ManagedUtxo>, SelectionError> {
    let wanted: BTreeSet<UtxoKey> = keys.iter().copied().collect();
    let mut selected = Vec::with_capacity(wanted.len());
    for key in &wanted {
        let utxo = utxos
            .iter()
            .find(|u| u.key() == *key)
            .ok_or(SelectionError::UnknownUtxo(*key))?;
        if utxo.is_frozen() {
            return Err(SelectionError::FrozenUtxo(*key));
        }
        selected.push(utxo.clone());
    }

    if let Some(target) = target {
        let total = sum_values(&selected);
        if total < target {
            return Err(SelectionError::insufficient(total, target));
        }
    }
    Ok(selected)
}

/// Inputs chosen to fund a payment, with the fee and change they imply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundingPlan {
    /// Selected inputs in strategy order.
    pub selected: Vec<ManagedUtxo>,
    /// Sum of selected input values.
    pub total: u64,
    /// Estimated fee for `selected.len()` inputs.
    pub fee: u64,
    /// `total - target - fee`.
    pub change: u64,
}

/// Fee-aware funding at `fee_rate` (smallest unit per vbyte).
///
/// Accumulates in strategy order until the sum covers `target` plus the fee
/// for the inputs taken so far. On failure the shortfall is measured against
/// the fee for the whole candidate pool.
pub fn fund(
    utxos: &[ManagedUtxo],
    strategy: SelectionStrategy,
    target: u64,
    fee_rate: u64,
) -> Result<FundingPlan, SelectionError> {
    let pool = candidates(utxos, strategy);

    let mut total: u64 = 0;
    for (idx, utxo) in pool.iter().enumerate() {
        total = total.saturating_add(utxo.value());
        let fee = estimate_fee(idx + 1, fee_rate);
        let needed = target.saturating_add(fee);
        if total >= needed {
            let mut selected = pool;
            selected.truncate(idx + 1);
            return Ok(FundingPlan {
                selected,
                total,
                fee,
                change: total - needed,
            });
        }
    }

    let required = target.saturating_add(estimate_fee(pool.len().max(1), fee_rate));
    Err(SelectionError::insufficient(total, required))
}

/// Aggregate view of a selection for confirmation screens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionSummary {
    pub total_value: u64,
    pub input_count: usize,
    /// Rounded mean score of the selected inputs; 0 when empty.
    pub average_privacy_score: u8,
}

impl SelectionSummary {
    pub fn of(selected: &[ManagedUtxo]) -> Self {
        Self {
            total_value: sum_values(selected),
            input_count: selected.len(),
            average_privacy_score: rounded_mean(selected.iter().map(|u| u.privacy_score)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinctl_core::types::{Chain, Txid, Utxo, UtxoMetadata, UtxoSource};
    use proptest::prelude::*;

    fn output(seed: u8, vout: u32, value: u64, confirmations: u32, source: UtxoSource) -> ManagedUtxo {
        ManagedUtxo::new(
            Utxo::new(Txid([seed; 32]), vout, value, confirmations),
            "addr",
            Chain::Bitcoin,
            UtxoMetadata {
                source,
                ..UtxoMetadata::default()
            },
        )
    }

    fn scored(mut u: ManagedUtxo, score: u8) -> ManagedUtxo {
        u.privacy_score = score;
        u
    }

    fn frozen(mut u: ManagedUtxo) -> ManagedUtxo {
        u.metadata.is_frozen = true;
        u
    }

    /// t1: 50000/6 conf/unknown, t2: 30000/2/wallet, t3: 20000/10/exchange.
    fn scenario() -> Vec<ManagedUtxo> {
        vec![
            output(1, 0, 50_000, 6, UtxoSource::Unknown),
            output(2, 1, 30_000, 2, UtxoSource::Wallet),
            output(3, 0, 20_000, 10, UtxoSource::Exchange),
        ]
    }

    fn keys(utxos: &[ManagedUtxo]) -> Vec<UtxoKey> {
        utxos.iter().map(ManagedUtxo::key).collect()
    }

    #[test]
    fn largest_first_minimal_prefix() {
        let set = scenario();
        let picked = select(&set, SelectionStrategy::LargestFirst, Some(60_000)).unwrap();
        assert_eq!(keys(&picked), vec![set[0].key(), set[1].key()]);
        assert_eq!(sum_values(&picked), 80_000);
    }

    #[test]
    fn frozen_largest_reports_shortfall() {
        let mut set = scenario();
        set[0] = frozen(set[0].clone());
        let err = select(&set, SelectionStrategy::LargestFirst, Some(70_000)).unwrap_err();
        assert_eq!(err, SelectionError::insufficient(50_000, 70_000));
        assert_eq!(err.shortfall(), Some(20_000));
    }

    #[test]
    fn browsing_returns_full_pool_in_order() {
        let set = scenario();
        let oldest = select(&set, SelectionStrategy::OldestFirst, None).unwrap();
        assert_eq!(keys(&oldest), vec![set[2].key(), set[0].key(), set[1].key()]);

        let newest = select(&set, SelectionStrategy::NewestFirst, None).unwrap();
        assert_eq!(keys(&newest), vec![set[1].key(), set[0].key(), set[2].key()]);

        let smallest = select(&set, SelectionStrategy::SmallestFirst, None).unwrap();
        assert_eq!(keys(&smallest), vec![set[2].key(), set[1].key(), set[0].key()]);
    }

    #[test]
    fn browsing_excludes_frozen() {
        let mut set = scenario();
        set[1] = frozen(set[1].clone());
        let pool = select(&set, SelectionStrategy::LargestFirst, None).unwrap();
        assert_eq!(keys(&pool), vec![set[0].key(), set[2].key()]);
    }

    #[test]
    fn ties_break_by_key() {
        let set = vec![
            output(9, 0, 1_000, 1, UtxoSource::Unknown),
            output(1, 5, 1_000, 1, UtxoSource::Unknown),
            output(1, 2, 1_000, 1, UtxoSource::Unknown),
        ];
        for strategy in SelectionStrategy::ALL {
            let pool = select(&set, strategy, None).unwrap();
            assert_eq!(keys(&pool), vec![set[2].key(), set[1].key(), set[0].key()], "{strategy}");
        }
    }

    #[test]
    fn privacy_optimized_orders_by_score() {
        let set = vec![
            scored(output(1, 0, 10, 1, UtxoSource::Exchange), 35),
            scored(output(2, 0, 10, 1, UtxoSource::CoinJoin), 95),
            scored(output(3, 0, 10, 1, UtxoSource::Wallet), 80),
        ];
        let pool = select(&set, SelectionStrategy::PrivacyOptimized, None).unwrap();
        assert_eq!(keys(&pool), vec![set[1].key(), set[2].key(), set[0].key()]);
    }

    #[test]
    fn optimal_trades_value_against_privacy() {
        // 1.5M at 40 -> 15 + 40 = 55; 200k at 60 -> 2 + 60 = 62; 5M at 0 -> 50.
        let set = vec![
            scored(output(1, 0, 1_500_000, 1, UtxoSource::Unknown), 40),
            scored(output(2, 0, 200_000, 1, UtxoSource::Unknown), 60),
            scored(output(3, 0, 5_000_000, 1, UtxoSource::Unknown), 0),
        ];
        let pool = select(&set, SelectionStrategy::Optimal, None).unwrap();
        assert_eq!(keys(&pool), vec![set[1].key(), set[0].key(), set[2].key()]);
    }

    #[test]
    fn zero_target_selects_nothing() {
        let picked = select(&scenario(), SelectionStrategy::Optimal, Some(0)).unwrap();
        assert!(picked.is_empty());
    }

    #[test]
    fn empty_pool_is_insufficient() {
        let err = select(&[], SelectionStrategy::LargestFirst, Some(1)).unwrap_err();
        assert_eq!(err.shortfall(), Some(1));
    }

    #[test]
    fn manual_selection_in_key_order() {
        let set = scenario();
        let picked = select_manual(&set, &[set[2].key(), set[0].key()], Some(70_000)).unwrap();
        assert_eq!(keys(&picked), vec![set[0].key(), set[2].key()]);
    }

    #[test]
    fn manual_selection_rejects_unknown_and_frozen() {
        let mut set = scenario();
        let ghost = UtxoKey::new(Txid([42; 32]), 0);
        assert_eq!(
            select_manual(&set, &[ghost], None).unwrap_err(),
            SelectionError::UnknownUtxo(ghost)
        );

        set[1] = frozen(set[1].clone());
        assert_eq!(
            select_manual(&set, &[set[1].key()], None).unwrap_err(),
            SelectionError::FrozenUtxo(set[1].key())
        );
    }

    #[test]
    fn manual_selection_checks_target() {
        let set = scenario();
        let err = select_manual(&set, &[set[2].key()], Some(25_000)).unwrap_err();
        assert_eq!(err.shortfall(), Some(5_000));
    }

    #[test]
    fn fund_accounts_for_fee() {
        let set = scenario();
        // One input at 10 sat/vB: (148 + 68 + 10) * 10 = 2260. 50000 < 47000 + 2260? no.
        let plan = fund(&set, SelectionStrategy::LargestFirst, 47_000, 10).unwrap();
        assert_eq!(plan.selected.len(), 1);
        assert_eq!(plan.fee, 2_260);
        assert_eq!(plan.total, 50_000);
        assert_eq!(plan.change, 50_000 - 47_000 - 2_260);

        // 48000 + 2260 > 50000, so a second input is needed: fee 3740.
        let plan = fund(&set, SelectionStrategy::LargestFirst, 48_000, 10).unwrap();
        assert_eq!(plan.selected.len(), 2);
        assert_eq!(plan.fee, 3_740);
        assert_eq!(plan.change, 80_000 - 48_000 - 3_740);
    }

    #[test]
    fn fund_shortfall_uses_full_pool_fee() {
        let set = scenario();
        let err = fund(&set, SelectionStrategy::LargestFirst, 100_000, 1).unwrap_err();
        let required = 100_000 + estimate_fee(3, 1);
        assert_eq!(err, SelectionError::insufficient(100_000, required));
    }

    #[test]
    fn summary_of_selection() {
        let set = vec![
            scored(output(1, 0, 10, 1, UtxoSource::Unknown), 50),
            scored(output(2, 0, 20, 1, UtxoSource::Unknown), 81),
        ];
        let s = SelectionSummary::of(&set);
        assert_eq!(s.total_value, 30);
        assert_eq!(s.input_count, 2);
        assert_eq!(s.average_privacy_score, 66);
        assert_eq!(SelectionSummary::of(&[]), SelectionSummary::default());
    }

    fn arb_set() -> impl Strategy<Value = Vec<ManagedUtxo>> {
        prop::collection::vec(
            (any::<u8>(), 0u32..4, 1u64..5_000_000, 0u32..200, 0u8..=100, any::<bool>()),
            0..24,
        )
        .prop_map(|rows| {
            let mut out: Vec<ManagedUtxo> = Vec::new();
            for (seed, vout, value, conf, score, is_frozen) in rows {
                let mut u = scored(output(seed, vout, value, conf, UtxoSource::Unknown), score);
                u.metadata.is_frozen = is_frozen;
                if out.iter().all(|o| o.key() != u.key()) {
                    out.push(u);
                }
            }
            out
        })
    }

    fn arb_strategy() -> impl Strategy<Value = SelectionStrategy> {
        (0..SelectionStrategy::ALL.len()).prop_map(|i| SelectionStrategy::ALL[i])
    }

    proptest! {
        #[test]
        fn never_selects_frozen(set in arb_set(), strategy in arb_strategy(), target in prop::option::of(0u64..20_000_000)) {
            if let Ok(picked) = select(&set, strategy, target) {
                prop_assert!(picked.iter().all(|u| !u.is_frozen()));
            }
        }

        #[test]
        fn success_is_sufficient_and_minimal(set in arb_set(), strategy in arb_strategy(), target in 1u64..20_000_000) {
            match select(&set, strategy, Some(target)) {
                Ok(picked) => {
                    prop_assert!(sum_values(&picked) >= target);
                    let without_last = sum_values(&picked[..picked.len() - 1]);
                    prop_assert!(without_last < target);
                }
                Err(SelectionError::InsufficientFunds { available, required, shortfall }) => {
                    let spendable: u64 = set.iter().filter(|u| !u.is_frozen()).map(|u| u.value()).sum();
                    prop_assert_eq!(available, spendable);
                    prop_assert_eq!(required, target);
                    prop_assert_eq!(shortfall, target - spendable);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }

        #[test]
        fn selection_is_deterministic(set in arb_set(), strategy in arb_strategy(), target in prop::option::of(1u64..20_000_000)) {
            let first = select(&set, strategy, target);
            let mut shuffled = set.clone();
            shuffled.reverse();
            prop_assert_eq!(first.clone(), select(&set, strategy, target));
            prop_assert_eq!(first, select(&shuffled, strategy, target));
        }
    }
}
