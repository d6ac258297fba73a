//! Error types for the coinctl engine.
use thiserror::Error;

use crate::types::{Chain, UtxoKey};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid txid: {0}")] InvalidTxid(String),
    #[error("invalid outpoint (expected txid:vout): {0}")] InvalidKey(String),
    #[error("unknown chain: {0}")] UnknownChain(String),
    #[error("unknown source: {0}")] UnknownSource(String),
    #[error("unknown strategy: {0}")] UnknownStrategy(String),
}

/// Failure to obtain the UTXO list from the chain source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("unreachable: {0}")] Unreachable(String),
    #[error("timeout")] Timeout,
    #[error("unexpected HTTP status {0}")] HttpStatus(u16),
    #[error("invalid response: {0}")] InvalidResponse(String),
    #[error("unsupported chain: {0}")] UnsupportedChain(Chain),
}

/// Failure to read or persist metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O: {0}")] Io(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("corrupted store: {0}")] Corrupted(String),
    #[error("store unavailable: {0}")] Unavailable(String),
}

/// Coin selection could not produce a usable set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// The spendable pool cannot cover the requested amount.
    #[error("insufficient funds: have {available}, need {required} (short {shortfall})")]
    InsufficientFunds {
        /// Sum of all eligible candidates.
        available: u64,
        /// Amount the selection had to reach.
        required: u64,
        /// `required - available`.
        shortfall: u64,
    },
    /// A manually requested output is not in the live set.
    #[error("unknown UTXO: {0}")]
    UnknownUtxo(UtxoKey),
    /// A manually requested output is frozen.
    #[error("UTXO is frozen: {0}")]
    FrozenUtxo(UtxoKey),
}

impl SelectionError {
    /// Build an [`InsufficientFunds`](Self::InsufficientFunds) error, deriving
    /// the shortfall.
    pub fn insufficient(available: u64, required: u64) -> Self {
        Self::InsufficientFunds {
            available,
            required,
            shortfall: required.saturating_sub(available),
        }
    }

    /// Missing amount for an insufficient-funds error, `None` otherwise.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            Self::InsufficientFunds { shortfall, .. } => Some(*shortfall),
            _ => None,
        }
    }
}

/// A metadata mutation was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The output left the live set (likely spent); refresh and retry.
    #[error("UTXO not in live set: {0}")]
    NotFound(UtxoKey),
    /// Persisting the change failed; the in-memory state was not modified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A refresh did not produce a new live set. The previous set is retained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinControlError {
    #[error(transparent)] Parse(#[from] ParseError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Selection(#[from] SelectionError),
    #[error(transparent)] Mutation(#[from] MutationError),
    #[error(transparent)] Refresh(#[from] RefreshError),
}
