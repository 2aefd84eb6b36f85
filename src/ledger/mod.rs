//! Durable ledger of open wagers and settlement cursors.
//!
//! [`Ledger`] is the only path to the persisted [`LedgerState`]. Every
//! mutation builds the next snapshot, saves it through the [`LedgerStore`],
//! and only then swaps it in, so a failed save leaves both the disk and the
//! in-memory view exactly as they were.

pub mod store;

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::LedgerError;
use crate::settlement::{total_stake, SettlementResult};
use crate::wager::{Side, Wager};

pub use store::{JsonFileStore, LedgerStore, MemoryStore};

/// Default size of the recently-settled id set.
pub const DEFAULT_SETTLED_ID_CAPACITY: usize = 10_000;

/// Persisted ledger snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Marker of the most recent fully settled round.
    pub last_resolved_round: u64,
    /// Highest `placed_at` among recorded wagers.
    pub last_wager_cursor: i64,
    /// Open wagers keyed by id.
    pub open_wagers: BTreeMap<String, Wager>,
    /// Wagers already folded into a round, oldest first.
    #[serde(default)]
    pub settled_ids: VecDeque<SettledWager>,
    /// Highest `placed_at` among settled wagers evicted from `settled_ids`.
    ///
    /// Any unknown id placed at or before it belongs to a round that has
    /// already been folded and is treated as a duplicate.
    #[serde(default)]
    pub settled_horizon: Option<i64>,
    /// Payout decision of the most recently settled round.
    #[serde(default)]
    pub last_settlement: Option<SettlementResult>,
}

/// Id and placement time of a wager folded into a past round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledWager {
    /// Wager id.
    pub id: String,
    /// Source timestamp of the wager.
    pub placed_at: i64,
}

impl LedgerState {
    /// Empty ledger with the wager cursor at `cursor`.
    pub fn with_cursor(cursor: i64) -> Self {
        Self {
            last_wager_cursor: cursor,
            ..Default::default()
        }
    }

    /// Empty ledger whose wager cursor looks back `lookback_secs` from `now`.
    pub fn fresh(now: i64, lookback_secs: i64) -> Self {
        Self::with_cursor(now.saturating_sub(lookback_secs))
    }

    /// Total open stake on one side.
    pub fn open_stake(&self, side: Side) -> u64 {
        total_stake(self.open_wagers.values().filter(|w| w.side == side))
    }
}

/// Owned ledger bound to its store.
pub struct Ledger {
    state: LedgerState,
    store: Box<dyn LedgerStore>,
    settled_id_capacity: usize,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("state", &self.state)
            .field("store", &self.store.describe())
            .field("settled_id_capacity", &self.settled_id_capacity)
            .finish()
    }
}

impl Ledger {
    /// Open the ledger from its store, falling back to `fresh` on first start.
    pub fn open(
        store: Box<dyn LedgerStore>,
        fresh: LedgerState,
        settled_id_capacity: usize,
    ) -> Result<Self, LedgerError> {
        let state = store.load()?.unwrap_or(fresh);
        Ok(Self {
            state,
            store,
            settled_id_capacity: settled_id_capacity.max(1),
        })
    }

    /// Current snapshot.
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Marker of the last settled round.
    pub fn last_resolved_round(&self) -> u64 {
        self.state.last_resolved_round
    }

    /// Current wager cursor.
    pub fn last_wager_cursor(&self) -> i64 {
        self.state.last_wager_cursor
    }

    /// Whether `id` is open, was recently settled, or was placed at or
    /// before the settled horizon.
    pub fn has_seen(&self, id: &str, placed_at: Option<i64>) -> bool {
        if self.state.open_wagers.contains_key(id)
            || self.state.settled_ids.iter().any(|s| s.id == id)
        {
            return true;
        }
        matches!(
            (placed_at, self.state.settled_horizon),
            (Some(t), Some(horizon)) if t <= horizon
        )
    }

    /// Persist `next` and make it current.
    fn commit(&mut self, next: LedgerState) -> Result<(), LedgerError> {
        if let Err(e) = self.store.save(&next) {
            error!(error = %e, store = %self.store.describe(), "Ledger commit failed");
            return Err(e);
        }
        self.state = next;
        Ok(())
    }

    /// Append an accepted wager and advance the wager cursor.
    pub fn record(&mut self, wager: Wager) -> Result<(), LedgerError> {
        let mut next = self.state.clone();
        next.last_wager_cursor = next.last_wager_cursor.max(wager.placed_at);
        debug!(wager_id = %wager.id, cursor = next.last_wager_cursor, "Recording wager");
        next.open_wagers.insert(wager.id.clone(), wager);
        self.commit(next)
    }

    /// Fold a settled round: drop its wagers, remember their ids, advance
    /// the round cursor, and store the payout decision, in one commit.
    pub fn fold_round(
        &mut self,
        round_marker: u64,
        eligible_ids: &[String],
        settlement: Option<SettlementResult>,
    ) -> Result<(), LedgerError> {
        let mut next = self.state.clone();
        for id in eligible_ids {
            if let Some(wager) = next.open_wagers.remove(id) {
                next.settled_ids.push_back(SettledWager {
                    id: wager.id,
                    placed_at: wager.placed_at,
                });
            }
        }
        while next.settled_ids.len() > self.settled_id_capacity {
            if let Some(evicted) = next.settled_ids.pop_front() {
                next.settled_horizon = Some(
                    next.settled_horizon
                        .map_or(evicted.placed_at, |h| h.max(evicted.placed_at)),
                );
            }
        }
        next.last_resolved_round = next.last_resolved_round.max(round_marker);
        if settlement.is_some() {
            next.last_settlement = settlement;
        }
        self.commit(next)
    }

    /// Move the round cursor forward without settling anything.
    ///
    /// Returns `false` (and writes nothing) when `round_marker` is not ahead.
    pub fn advance_round(&mut self, round_marker: u64) -> Result<bool, LedgerError> {
        if round_marker <= self.state.last_resolved_round {
            return Ok(false);
        }
        let mut next = self.state.clone();
        next.last_resolved_round = round_marker;
        self.commit(next)?;
        Ok(true)
    }
}
