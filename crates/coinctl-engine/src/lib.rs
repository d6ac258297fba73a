//! # coinctl-engine: coin control over a wallet's unspent outputs.
//!
//! Reconciles chain-reported outputs with wallet-local metadata, scores
//! them for privacy, aggregates balances, and orders or selects them for
//! browsing and funding.
//!
//! # Modules
//!
//! - [`reconcile`]: merge fetched outputs with stored metadata
//! - [`privacy`]: population-relative 0–100 privacy heuristic
//! - [`balance`]: total/spendable/frozen snapshot
//! - [`selection`]: strategy ordering, greedy funding, manual coin control
//! - [`state`]: the observable live set
//! - [`engine`]: [`CoinControlEngine`]: refresh coordination and mutators
//! - [`store`]: in-memory and JSON-file metadata stores
//! - [`source`]: programmable in-memory chain source
//! - [`config`]: engine configuration

pub mod balance;
pub mod config;
pub mod engine;
pub mod privacy;
pub mod reconcile;
pub mod selection;
pub mod source;
pub mod state;
pub mod store;

pub use balance::{aggregate, Snapshot};
pub use config::EngineConfig;
pub use engine::{CoinControlEngine, RefreshHandle, RefreshReport};
pub use privacy::PrivacyPolicy;
pub use selection::{FundingPlan, SelectionSummary};
pub use source::MemoryUtxoSource;
pub use state::{LiveSet, StaleInfo, TrackedAddress};
pub use store::{JsonFileStore, MemoryMetadataStore};
