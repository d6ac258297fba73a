//! The coin control engine: refresh coordination, mutators, selection.
//!
//! [`CoinControlEngine`] owns the live set and publishes it through a
//! `tokio::sync::watch` channel. Every change (refresh, stale marking,
//! metadata mutation) builds a complete new [`LiveSet`] and swaps it in with
//! one `send_modify`, so receivers only ever observe whole generations.
//!
//! Concurrency rules:
//!
//! - At most one fetch per `(address, chain)` is in flight. Concurrent
//!   `refresh` calls for the same pair share a `OnceCell` and all receive the
//!   result of the single fetch.
//! - Dropping a `refresh` future (or cancelling a [`RefreshHandle`]) before
//!   it publishes leaves the live set untouched.
//! - Mutations serialize per key on an async mutex, persist first, then
//!   publish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coinctl_core::error::{MutationError, NetworkError, RefreshError, SelectionError};
use coinctl_core::traits::{ChainUtxoSource, MetadataStore};
use coinctl_core::types::{Chain, ManagedUtxo, SelectionStrategy, Utxo, UtxoKey, UtxoMetadata, UtxoSource};

use crate::balance::Snapshot;
use crate::config::EngineConfig;
use crate::reconcile::{diff, reconcile, ReconcileDiff};
use crate::selection::{self, FundingPlan};
use crate::state::{LiveSet, StaleInfo};

type RefreshResult = Result<RefreshReport, RefreshError>;

/// Outcome of a successful refresh of one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub address: String,
    pub chain: Chain,
    /// Live outputs for the address after the refresh.
    pub count: usize,
    /// Keys that entered the live set.
    pub added: Vec<UtxoKey>,
    /// Keys that left the live set (spent or reorged out).
    pub removed: Vec<UtxoKey>,
    /// Generation of the published live set.
    pub generation: u64,
}

/// Handle to a refresh running on its own task.
///
/// Dropping the handle detaches the task; use [`cancel`](Self::cancel) to
/// stop it.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<RefreshResult>,
}

impl RefreshHandle {
    /// Abort the refresh. If it has not published yet, it never will.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the refresh. `None` if it was cancelled.
    pub async fn join(self) -> Option<RefreshResult> {
        match self.task.await {
            Ok(result) => Some(result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => None,
        }
    }
}

/// Coin control over the unspent outputs of any number of addresses.
pub struct CoinControlEngine {
    source: Arc<dyn ChainUtxoSource>,
    store: Arc<dyn MetadataStore>,
    config: EngineConfig,
    live: watch::Sender<Arc<LiveSet>>,
    inflight: DashMap<(String, Chain), Arc<OnceCell<RefreshResult>>>,
    key_locks: DashMap<UtxoKey, Arc<tokio::sync::Mutex<()>>>,
}

impl CoinControlEngine {
    pub fn new(
        source: Arc<dyn ChainUtxoSource>,
        store: Arc<dyn MetadataStore>,
        config: EngineConfig,
    ) -> Self {
        let (live, _) = watch::channel(Arc::new(LiveSet::default()));
        Self {
            source,
            store,
            config,
            live,
            inflight: DashMap::new(),
            key_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// The current live set.
    pub fn live_set(&self) -> Arc<LiveSet> {
        Arc::clone(&self.live.borrow())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.live.borrow().snapshot()
    }

    /// Receiver notified on every published generation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<LiveSet>> {
        self.live.subscribe()
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Fetch `address` on `chain` and reconcile it into the live set.
    ///
    /// Joins an in-flight refresh of the same pair instead of fetching again.
    /// On failure the previous outputs stay live and the address is marked
    /// stale with the cause.
    pub async fn refresh(&self, address: &str, chain: Chain) -> RefreshResult {
        let slot = (address.to_string(), chain);
        let cell = Arc::clone(self.inflight.entry(slot.clone()).or_default().value());
        if Arc::strong_count(&cell) > 2 {
            debug!(address, %chain, "joining in-flight refresh");
        }

        let result = cell
            .get_or_init(|| self.run_refresh(address, chain))
            .await
            .clone();

        self.inflight.remove_if(&slot, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    /// Run [`refresh`](Self::refresh) on a new task.
    pub fn spawn_refresh(self: &Arc<Self>, address: impl Into<String>, chain: Chain) -> RefreshHandle {
        let engine = Arc::clone(self);
        let address = address.into();
        let task = tokio::spawn(async move { engine.refresh(&address, chain).await });
        RefreshHandle { task }
    }

    async fn run_refresh(&self, address: &str, chain: Chain) -> RefreshResult {
        let raw = match self.fetch(address, chain).await {
            Ok(raw) => raw,
            Err(e) => return Err(self.mark_stale(address, chain, e.into())),
        };

        // Load every fetched key, live or not: membership can change while
        // the load is pending, and publication falls back to these records
        // for any key that is no longer live by then.
        let keys: Vec<UtxoKey> = raw.iter().map(Utxo::key).collect();
        let stored = match self.store.load_many(&keys).await {
            Ok(stored) => stored,
            Err(e) => return Err(self.mark_stale(address, chain, e.into())),
        };

        let report = self.publish_refresh(address, chain, &raw, &stored);
        self.prune_key_locks();
        info!(
            address,
            %chain,
            count = report.count,
            added = report.added.len(),
            removed = report.removed.len(),
            generation = report.generation,
            "refresh complete"
        );
        Ok(report)
    }

    async fn fetch(&self, address: &str, chain: Chain) -> Result<Vec<Utxo>, NetworkError> {
        match tokio::time::timeout(
            self.config.refresh_timeout,
            self.source.fetch_utxos(address, chain),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout),
        }
    }

    /// Replace the outputs of `address` on `chain` in one update.
    ///
    /// Outputs that are live keep their in-memory metadata. A key already
    /// owned by another `(address, chain)` stays with its owner.
    fn publish_refresh(
        &self,
        address: &str,
        chain: Chain,
        raw: &[Utxo],
        stored: &HashMap<UtxoKey, UtxoMetadata>,
    ) -> RefreshReport {
        let mut changes = ReconcileDiff::default();
        let mut count = 0;
        let mut generation = 0;
        self.live.send_modify(|set| {
            let mut fresh = reconcile(address, chain, raw, stored);
            fresh.retain(|utxo| match set.get(&utxo.key()) {
                Some(owner) if !owner.is_tracked_by(address, chain) => {
                    warn!(
                        address,
                        %chain,
                        key = %utxo.key(),
                        owner = %owner.address,
                        owner_chain = %owner.chain,
                        "output already tracked elsewhere; skipped"
                    );
                    false
                }
                _ => true,
            });
            for utxo in &mut fresh {
                if let Some(live) = set.get(&utxo.key()) {
                    utxo.metadata = live.metadata.clone();
                }
            }

            let previous: Vec<ManagedUtxo> = set.for_address(address, chain).cloned().collect();
            changes = diff(&previous, &fresh);
            count = fresh.len();

            let mut utxos: Vec<ManagedUtxo> = set
                .utxos()
                .iter()
                .filter(|u| !u.is_tracked_by(address, chain))
                .cloned()
                .collect();
            utxos.extend(fresh);

            let mut stale = set.stale().clone();
            stale.remove(&(address.to_string(), chain));

            generation = set.generation() + 1;
            *set = Arc::new(LiveSet::build(utxos, stale, generation, &self.config.privacy));
        });
        RefreshReport {
            address: address.to_string(),
            chain,
            count,
            added: changes.added,
            removed: changes.removed,
            generation,
        }
    }

    /// Record `cause` against `address` on `chain` and publish. Returns `cause`.
    fn mark_stale(&self, address: &str, chain: Chain, cause: RefreshError) -> RefreshError {
        warn!(address, %chain, error = %cause, "refresh failed; keeping previous outputs");
        let tracked = (address.to_string(), chain);
        self.live.send_modify(|set| {
            let mut stale = set.stale().clone();
            let since = stale.get(&tracked).map_or_else(Utc::now, |info| info.since);
            stale.insert(
                tracked.clone(),
                StaleInfo {
                    cause: cause.clone(),
                    since,
                },
            );
            let generation = set.generation() + 1;
            *set = Arc::new(set.with_stale(stale, generation));
        });
        cause
    }

    /// Stop tracking `address` on `chain`: drop its outputs and stale
    /// marker. Stored metadata is kept.
    pub fn forget(&self, address: &str, chain: Chain) -> bool {
        self.live.send_if_modified(|set| {
            if set.for_address(address, chain).next().is_none()
                && set.stale_for(address, chain).is_none()
            {
                return false;
            }
            let utxos = set
                .utxos()
                .iter()
                .filter(|u| !u.is_tracked_by(address, chain))
                .cloned()
                .collect();
            let mut stale = set.stale().clone();
            stale.remove(&(address.to_string(), chain));
            let generation = set.generation() + 1;
            *set = Arc::new(LiveSet::build(utxos, stale, generation, &self.config.privacy));
            true
        })
    }

    fn prune_key_locks(&self) {
        let live = self.live_set();
        self.key_locks
            .retain(|key, lock| live.contains(key) || Arc::strong_count(lock) > 1);
    }

    // ------------------------------------------------------------------
    // Metadata mutators
    // ------------------------------------------------------------------

    /// Freeze or unfreeze; freezing stamps `frozen_at` with the current time.
    pub async fn set_frozen(&self, key: &UtxoKey, frozen: bool) -> Result<(), MutationError> {
        let now = Utc::now();
        self.mutate(key, move |md| md.set_frozen(frozen, now)).await
    }

    pub async fn set_label(&self, key: &UtxoKey, label: impl Into<String>) -> Result<(), MutationError> {
        let label = label.into();
        self.mutate(key, move |md| md.label = label).await
    }

    pub async fn set_note(&self, key: &UtxoKey, note: impl Into<String>) -> Result<(), MutationError> {
        let note = note.into();
        self.mutate(key, move |md| md.note = note).await
    }

    /// Change provenance. Rescoring covers the whole set, so siblings on the
    /// same address are updated in the same generation.
    pub async fn set_source(&self, key: &UtxoKey, source: UtxoSource) -> Result<(), MutationError> {
        self.mutate(key, move |md| md.source = source).await
    }

    async fn mutate<F>(&self, key: &UtxoKey, apply: F) -> Result<(), MutationError>
    where
        F: FnOnce(&mut UtxoMetadata) + Send,
    {
        let lock = Arc::clone(self.key_locks.entry(*key).or_default().value());
        let _guard = lock.lock().await;

        let current = self.live.borrow().get(key).map(|u| u.metadata.clone());
        let mut metadata = current.ok_or(MutationError::NotFound(*key))?;
        apply(&mut metadata);

        if let Err(e) = self.store.save(key, &metadata).await {
            warn!(%key, error = %e, "metadata save failed; live set unchanged");
            return Err(e.into());
        }

        let applied = self.live.send_if_modified(|set| {
            if !set.contains(key) {
                return false;
            }
            let utxos = set
                .utxos()
                .iter()
                .cloned()
                .map(|mut u| {
                    if u.key() == *key {
                        u.metadata = metadata.clone();
                    }
                    u
                })
                .collect();
            let generation = set.generation() + 1;
            *set = Arc::new(LiveSet::build(
                utxos,
                set.stale().clone(),
                generation,
                &self.config.privacy,
            ));
            true
        });

        if applied {
            debug!(%key, "metadata updated");
        } else {
            debug!(%key, "metadata saved but output left the live set");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Browse (`None`) or fund (`Some(target)`) from the current live set.
    pub fn select(
        &self,
        strategy: SelectionStrategy,
        target: Option<u64>,
    ) -> Result<Vec<ManagedUtxo>, SelectionError> {
        let live = self.live_set();
        let result = selection::select(live.utxos(), strategy, target);
        match &result {
            Ok(picked) => debug!(%strategy, ?target, inputs = picked.len(), "selection"),
            Err(e) => debug!(%strategy, ?target, error = %e, "selection failed"),
        }
        result
    }

    /// Manual coin control over explicitly named outputs.
    pub fn select_manual(
        &self,
        keys: &[UtxoKey],
        target: Option<u64>,
    ) -> Result<Vec<ManagedUtxo>, SelectionError> {
        selection::select_manual(self.live_set().utxos(), keys, target)
    }

    /// Fee-aware funding at `fee_rate` per vbyte.
    pub fn fund(
        &self,
        strategy: SelectionStrategy,
        target: u64,
        fee_rate: u64,
    ) -> Result<FundingPlan, SelectionError> {
        selection::fund(self.live_set().utxos(), strategy, target, fee_rate)
    }
}

impl std::fmt::Debug for CoinControlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinControlEngine")
            .field("config", &self.config)
            .field("generation", &self.live.borrow().generation())
            .field("inflight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}
