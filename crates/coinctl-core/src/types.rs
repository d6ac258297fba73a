//! Core engine types: outputs, keys, wallet-local metadata, strategies.
//!
//! All monetary values are in the smallest unit of the chain's native asset
//! and use `u64`. Floating point appears only in display helpers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::COIN;
use crate::error::ParseError;

/// A 32-byte transaction identifier, kept in display (RPC) byte order so
/// that byte ordering and hex ordering agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    /// The all-zero txid.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a txid from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Txid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| ParseError::InvalidTxid(s.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseError::InvalidTxid(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of an output: `(txid, vout)`.
///
/// The derived ordering is `txid` then `vout`, which is the tie-break order
/// used by every selection strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoKey {
    /// Transaction that created the output.
    pub txid: Txid,
    /// Output index within that transaction.
    pub vout: u32,
}

impl UtxoKey {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for UtxoKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidKey(s.to_string()))?;
        let txid = txid.parse()?;
        let vout = vout
            .parse()
            .map_err(|_| ParseError::InvalidKey(s.to_string()))?;
        Ok(Self { txid, vout })
    }
}

/// Chain a tracked address lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Chain {
    #[default]
    Bitcoin,
    BitcoinTestnet,
    Litecoin,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Bitcoin, Chain::BitcoinTestnet, Chain::Litecoin];

    /// Stable identifier used in config files and on the command line.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::BitcoinTestnet => "bitcoin-testnet",
            Self::Litecoin => "litecoin",
        }
    }

    /// Ticker of the native asset.
    pub fn ticker(&self) -> &'static str {
        match self {
            Self::Bitcoin => "BTC",
            Self::BitcoinTestnet => "tBTC",
            Self::Litecoin => "LTC",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Chain {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.id() == normalized)
            .ok_or_else(|| ParseError::UnknownChain(s.to_string()))
    }
}

/// Raw unspent output as reported by the chain source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in the smallest chain unit.
    pub value: u64,
    /// Network-reported depth; 0 for mempool outputs.
    pub confirmations: u32,
}

impl Utxo {
    pub fn new(txid: Txid, vout: u32, value: u64, confirmations: u32) -> Self {
        Self {
            txid,
            vout,
            value,
            confirmations,
        }
    }

    pub fn key(&self) -> UtxoKey {
        UtxoKey::new(self.txid, self.vout)
    }
}

/// Provenance of an output, used by the privacy scorer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtxoSource {
    /// Received on one of the wallet's own receive addresses.
    Wallet,
    Exchange,
    Mining,
    Gift,
    #[default]
    Unknown,
    /// Peer-to-peer trade.
    P2p,
    Salary,
    /// Change from one of the wallet's own spends.
    Change,
    /// Moved between the owner's own wallets.
    SelfTransfer,
    CoinJoin,
    /// Lightning channel close.
    Lightning,
}

impl UtxoSource {
    pub const ALL: [UtxoSource; 11] = [
        UtxoSource::Wallet,
        UtxoSource::Exchange,
        UtxoSource::Mining,
        UtxoSource::Gift,
        UtxoSource::Unknown,
        UtxoSource::P2p,
        UtxoSource::Salary,
        UtxoSource::Change,
        UtxoSource::SelfTransfer,
        UtxoSource::CoinJoin,
        UtxoSource::Lightning,
    ];

    /// Stable identifier used for persistence and the command line.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Exchange => "exchange",
            Self::Mining => "mining",
            Self::Gift => "gift",
            Self::Unknown => "unknown",
            Self::P2p => "p2p",
            Self::Salary => "salary",
            Self::Change => "change",
            Self::SelfTransfer => "self_transfer",
            Self::CoinJoin => "coin_join",
            Self::Lightning => "lightning",
        }
    }

    /// Human-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Wallet => "Wallet",
            Self::Exchange => "Exchange",
            Self::Mining => "Mining",
            Self::Gift => "Gift",
            Self::Unknown => "Unknown",
            Self::P2p => "P2P",
            Self::Salary => "Salary",
            Self::Change => "Change",
            Self::SelfTransfer => "Self transfer",
            Self::CoinJoin => "CoinJoin",
            Self::Lightning => "Lightning",
        }
    }
}

impl fmt::Display for UtxoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for UtxoSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        let normalized = match normalized.as_str() {
            "coinjoin" => "coin_join",
            "selftransfer" => "self_transfer",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|src| src.id() == normalized)
            .ok_or_else(|| ParseError::UnknownSource(s.to_string()))
    }
}

/// Wallet-local annotation of an output, independent of chain state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtxoMetadata {
    pub label: String,
    pub note: String,
    pub source: UtxoSource,
    pub is_frozen: bool,
    /// Set when `is_frozen` last became true.
    pub frozen_at: Option<DateTime<Utc>>,
}

impl UtxoMetadata {
    /// Apply a freeze flag, stamping or clearing `frozen_at`.
    pub fn set_frozen(&mut self, frozen: bool, now: DateTime<Utc>) {
        self.is_frozen = frozen;
        self.frozen_at = frozen.then_some(now);
    }
}

/// An output paired with its metadata and derived privacy score: the unit
/// the rest of the engine operates on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedUtxo {
    pub utxo: Utxo,
    /// Address the output was fetched for.
    pub address: String,
    /// Chain the address was fetched on. The same address string may be
    /// tracked on several chains; each `(address, chain)` pair owns its own
    /// outputs.
    pub chain: Chain,
    pub metadata: UtxoMetadata,
    /// Derived 0–100 score, recomputed on every live-set change.
    pub privacy_score: u8,
}

impl ManagedUtxo {
    /// Wrap a raw output with unscored metadata.
    pub fn new(utxo: Utxo, address: impl Into<String>, chain: Chain, metadata: UtxoMetadata) -> Self {
        Self {
            utxo,
            address: address.into(),
            chain,
            metadata,
            privacy_score: 0,
        }
    }

    pub fn key(&self) -> UtxoKey {
        self.utxo.key()
    }

    /// Whether this output belongs to the `(address, chain)` slice.
    pub fn is_tracked_by(&self, address: &str, chain: Chain) -> bool {
        self.address == address && self.chain == chain
    }

    /// Whether `self` and `other` were fetched for the same address on the
    /// same chain.
    pub fn same_slice(&self, other: &ManagedUtxo) -> bool {
        self.is_tracked_by(&other.address, other.chain)
    }

    pub fn value(&self) -> u64 {
        self.utxo.value
    }

    pub fn confirmations(&self) -> u32 {
        self.utxo.confirmations
    }

    pub fn is_frozen(&self) -> bool {
        self.metadata.is_frozen
    }

    /// Abbreviated txid (`first8...last8`) for list views.
    pub fn short_txid(&self) -> String {
        let full = self.utxo.txid.to_string();
        format!("{}...{}", &full[..8], &full[full.len() - 8..])
    }

    /// Value in whole coins (display helper, not for arithmetic).
    pub fn value_coins(&self) -> f64 {
        self.utxo.value as f64 / COIN as f64
    }
}

/// Ordering policy used for both browsing and funding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Value, descending.
    LargestFirst,
    /// Value, ascending.
    SmallestFirst,
    /// Confirmations, descending.
    OldestFirst,
    /// Confirmations, ascending.
    NewestFirst,
    /// Privacy score, descending.
    PrivacyOptimized,
    /// `value / 100_000 + privacy_score`, descending.
    #[default]
    Optimal,
}

impl SelectionStrategy {
    pub const ALL: [SelectionStrategy; 6] = [
        SelectionStrategy::LargestFirst,
        SelectionStrategy::SmallestFirst,
        SelectionStrategy::OldestFirst,
        SelectionStrategy::NewestFirst,
        SelectionStrategy::PrivacyOptimized,
        SelectionStrategy::Optimal,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::LargestFirst => "largest-first",
            Self::SmallestFirst => "smallest-first",
            Self::OldestFirst => "oldest-first",
            Self::NewestFirst => "newest-first",
            Self::PrivacyOptimized => "privacy-optimized",
            Self::Optimal => "optimal",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::LargestFirst => "Largest first",
            Self::SmallestFirst => "Smallest first",
            Self::OldestFirst => "Oldest first",
            Self::NewestFirst => "Newest first",
            Self::PrivacyOptimized => "Privacy optimized",
            Self::Optimal => "Optimal",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SelectionStrategy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|st| st.id() == normalized)
            .ok_or_else(|| ParseError::UnknownStrategy(s.to_string()))
    }
}
