//! Heuristic privacy scoring.
//!
//! A score in `[0, 100]` rates how much spending an output is likely to leak
//! about its owner. Inputs, each moving the score in one direction only:
//!
//! 1. Provenance baseline: self-generated (`wallet`, `mining`) and mixed
//!    (`coinjoin`) outputs start high; `exchange` starts lowest.
//! 2. Round values (exact multiples of [`ROUND_DENOMINATION`]) look like
//!    purchase amounts and lose points.
//! 3. Address reuse: every other live output on the same address and chain
//!    costs points, up to a cap.
//!
//! Confirmation depth is a finality signal and is deliberately not an input.
//! Because (3) depends on the whole live set, scores are always recomputed
//! for the full population.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use coinctl_core::constants::{MAX_PRIVACY_SCORE, ROUND_DENOMINATION};
use coinctl_core::types::{Chain, ManagedUtxo, UtxoSource};

/// Starting score for an output of the given provenance.
pub fn baseline(source: UtxoSource) -> u8 {
    match source {
        UtxoSource::CoinJoin => 95,
        UtxoSource::Wallet | UtxoSource::Mining | UtxoSource::SelfTransfer => 80,
        UtxoSource::Change | UtxoSource::Lightning => 70,
        UtxoSource::P2p => 65,
        UtxoSource::Salary | UtxoSource::Gift | UtxoSource::Unknown => 50,
        UtxoSource::Exchange => 35,
    }
}

/// Tunable penalty constants. Only the direction of each effect is fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyPolicy {
    /// Values that are a non-zero multiple of this unit count as round.
    pub round_unit: u64,
    /// Points removed for a round value.
    pub round_penalty: u8,
    /// Points removed per other live output sharing the address.
    pub reuse_penalty: u8,
    /// Maximum total address-reuse penalty.
    pub reuse_penalty_cap: u8,
}

impl Default for PrivacyPolicy {
    fn default() -> Self {
        Self {
            round_unit: ROUND_DENOMINATION,
            round_penalty: 15,
            reuse_penalty: 10,
            reuse_penalty_cap: 30,
        }
    }
}

impl PrivacyPolicy {
    /// Whether `value` looks like a round purchase amount.
    pub fn is_round(&self, value: u64) -> bool {
        self.round_unit > 0 && value > 0 && value % self.round_unit == 0
    }

    /// Score `utxo` against the population `all`.
    ///
    /// `all` may or may not contain `utxo` itself; it is never counted as
    /// its own sibling.
    pub fn score(&self, utxo: &ManagedUtxo, all: &[ManagedUtxo]) -> u8 {
        let key = utxo.key();
        let siblings = all
            .iter()
            .filter(|other| other.same_slice(utxo) && other.key() != key)
            .count();
        self.score_with_siblings(utxo, siblings)
    }

    /// Recompute `privacy_score` for every output in place.
    pub fn score_all(&self, utxos: &mut [ManagedUtxo]) {
        let mut per_address: HashMap<(String, Chain), usize> = HashMap::new();
        for utxo in utxos.iter() {
            *per_address
                .entry((utxo.address.clone(), utxo.chain))
                .or_default() += 1;
        }
        for utxo in utxos.iter_mut() {
            let siblings = per_address
                .get(&(utxo.address.clone(), utxo.chain))
                .map_or(0, |count| count.saturating_sub(1));
            utxo.privacy_score = self.score_with_siblings(utxo, siblings);
        }
    }

    fn score_with_siblings(&self, utxo: &ManagedUtxo, siblings: usize) -> u8 {
        let mut score = i64::from(baseline(utxo.metadata.source));

        if self.is_round(utxo.value()) {
            score -= i64::from(self.round_penalty);
        }

        let reuse = (siblings as u64)
            .saturating_mul(u64::from(self.reuse_penalty))
            .min(u64::from(self.reuse_penalty_cap));
        score -= reuse as i64;

        score.clamp(0, i64::from(MAX_PRIVACY_SCORE)) as u8
    }
}

/// Score `utxo` against `all` with the default policy.
pub fn score(utxo: &ManagedUtxo, all: &[ManagedUtxo]) -> u8 {
    PrivacyPolicy::default().score(utxo, all)
}
