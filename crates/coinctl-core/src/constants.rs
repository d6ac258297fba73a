//! Engine constants. All monetary values in the smallest chain unit
//! (1 coin = 10^8 units for every supported chain).

pub const COIN: u64 = 100_000_000;

/// Values that are an exact multiple of this unit (0.01 coin) look like
/// purchase amounts and are penalised by the privacy scorer.
pub const ROUND_DENOMINATION: u64 = COIN / 100;

/// Upper bound of a privacy score.
pub const MAX_PRIVACY_SCORE: u8 = 100;

/// Divisor that brings an output value into the same range as a privacy
/// score in the `optimal` composite key (`value / 100_000 + score`).
pub const OPTIMAL_VALUE_SCALE: u64 = 100_000;

/// Approximate virtual size of one P2PKH-style input.
pub const INPUT_VBYTES: u64 = 148;

/// Approximate virtual size of one output.
pub const OUTPUT_VBYTES: u64 = 34;

/// Fixed transaction overhead (version, locktime, counts).
pub const TX_OVERHEAD_VBYTES: u64 = 10;

/// Outputs assumed by fee estimation: recipient plus change.
pub const FUNDING_OUTPUTS: u64 = 2;

/// Default upper bound on a single chain fetch, in seconds.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

/// Estimated fee for a transaction spending `inputs` outputs at `fee_rate`
/// units per virtual byte.
///
/// # Examples
///
/// ```
/// use coinctl_core::constants::estimate_fee;
/// assert_eq!(estimate_fee(1, 1), 148 + 2 * 34 + 10);
/// assert_eq!(estimate_fee(0, 5), (2 * 34 + 10) * 5);
/// ```
pub fn estimate_fee(inputs: usize, fee_rate: u64) -> u64 {
    let vsize = (inputs as u64)
        .saturating_mul(INPUT_VBYTES)
        .saturating_add(FUNDING_OUTPUTS * OUTPUT_VBYTES)
        .saturating_add(TX_OVERHEAD_VBYTES);
    vsize.saturating_mul(fee_rate)
}
