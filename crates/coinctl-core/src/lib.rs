//! # coinctl-core
//! Foundation types and traits for the coinctl coin control engine.
//!
//! # Modules
//!
//! - [`constants`]: denominations and sizing constants
//! - [`error`]: error taxonomy shared by every crate
//! - [`traits`]: [`ChainUtxoSource`](traits::ChainUtxoSource) and
//!   [`MetadataStore`](traits::MetadataStore) collaborator contracts
//! - [`types`]: outputs, keys, metadata, strategies

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    CoinControlError, MutationError, NetworkError, ParseError, RefreshError, SelectionError,
    StoreError,
};
pub use traits::{ChainUtxoSource, MetadataStore};
pub use types::{Chain, ManagedUtxo, SelectionStrategy, Txid, Utxo, UtxoKey, UtxoMetadata, UtxoSource};
