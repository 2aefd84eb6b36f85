//! Startup catch-up of events missed while offline.
//!
//! Runs once before live subscriptions are attached. The wager pass goes
//! first, so wagers placed before a pending round's cut-off are open when
//! that round is replayed. Rounds are then replayed one at a time in
//! increasing marker order through the same engine the live loop uses.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{RecoveryError, SettlementError};
use crate::feed::{OracleFeed, WagerFeed};
use crate::settlement::{RoundStatus, SettlementEngine, SettlementResult};
use crate::wager::IntakeOutcome;

/// What a recovery run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Wager events fetched from the backlog.
    pub wagers_fetched: usize,
    /// Newly accepted wagers.
    pub accepted: usize,
    /// Already known wagers.
    pub duplicates: usize,
    /// Malformed wagers.
    pub rejected: usize,
    /// Round marker the fresh ledger was anchored at, if any.
    pub anchored_at: Option<u64>,
    /// Rounds skipped for a malformed oracle value.
    pub skipped_rounds: Vec<u64>,
    /// Replayed rounds, oldest first.
    pub settlements: Vec<SettlementResult>,
    /// Last persisted settlement from before this run, dispatched again
    /// since its payouts may never have reached the rail.
    pub redelivered: Option<SettlementResult>,
}

impl RecoveryReport {
    /// Rounds that owe somebody money, oldest first.
    pub fn payable(&self) -> impl Iterator<Item = &SettlementResult> {
        self.redelivered
            .iter()
            .chain(self.settlements.iter())
            .filter(|s| s.has_payouts())
    }
}

/// Replays wager and oracle backlogs into the engine.
pub struct RecoveryCoordinator {
    engine: Arc<SettlementEngine>,
    wagers: Arc<dyn WagerFeed>,
    oracle: Arc<dyn OracleFeed>,
}

impl RecoveryCoordinator {
    /// Create a coordinator.
    pub fn new(
        engine: Arc<SettlementEngine>,
        wagers: Arc<dyn WagerFeed>,
        oracle: Arc<dyn OracleFeed>,
    ) -> Self {
        Self {
            engine,
            wagers,
            oracle,
        }
    }

    /// Run both passes.
    ///
    /// A fetch failure aborts the run; whatever was fully folded before it
    /// stays folded and the rest is picked up by the next attempt.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RecoveryReport, RecoveryError> {
        let mut report = RecoveryReport {
            redelivered: self.engine.last_settlement().await,
            ..Default::default()
        };
        self.recover_wagers(&mut report).await?;
        self.recover_rounds(&mut report).await?;

        info!(
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            rounds = report.settlements.len(),
            anchored_at = ?report.anchored_at,
            redelivered = ?report.redelivered.as_ref().map(|s| s.round_marker),
            "Recovery complete"
        );
        Ok(report)
    }

    async fn recover_wagers(&self, report: &mut RecoveryReport) -> Result<(), RecoveryError> {
        let cursor = self.engine.last_wager_cursor().await;
        let events = self.wagers.fetch_since(cursor).await?;
        info!(feed = self.wagers.name(), cursor, count = events.len(), "Replaying missed wagers");
        report.wagers_fetched = events.len();

        for event in &events {
            match self.engine.record_wager(event).await? {
                IntakeOutcome::Accepted(_) => report.accepted += 1,
                IntakeOutcome::Duplicate { .. } => report.duplicates += 1,
                IntakeOutcome::Rejected(_) => report.rejected += 1,
            }
        }
        Ok(())
    }

    async fn recover_rounds(&self, report: &mut RecoveryReport) -> Result<(), RecoveryError> {
        let last = self.engine.last_resolved_round().await;
        let head = self.oracle.head().await?;

        if last == 0 {
            if self.engine.anchor_rounds(head).await? {
                report.anchored_at = Some(head);
            }
            return Ok(());
        }
        if head <= last {
            info!(last, head, "No missed rounds");
            return Ok(());
        }

        info!(feed = self.oracle.name(), from = last + 1, to = head, "Replaying missed rounds");
        for marker in (last + 1)..=head {
            let event = self.oracle.fetch_round(marker).await?;
            match self.engine.settle_round(&event).await {
                Ok(result) if result.status == RoundStatus::AlreadySettled => {}
                Ok(result) => report.settlements.push(result),
                Err(SettlementError::InvalidOracle(e)) => {
                    warn!(round = marker, error = %e, "Replayed round skipped");
                    report.skipped_rounds.push(marker);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{MockOracleFeed, MockWagerFeed};
    use crate::ledger::{Ledger, LedgerState, MemoryStore};
    use crate::oracle::OracleEvent;
    use crate::wager::{DeclaredAmount, Side, WagerEvent};
    use rust_decimal_macros::dec;

    fn engine_at(state: LedgerState, store: &MemoryStore) -> Arc<SettlementEngine> {
        let ledger = Ledger::open(Box::new(store.clone()), state, 100).unwrap();
        Arc::new(SettlementEngine::new(ledger, dec!(0.01), Box::new(DeclaredAmount)))
    }

    #[tokio::test]
    async fn fresh_ledger_anchors_at_head() {
        let store = MemoryStore::new();
        let engine = engine_at(LedgerState::with_cursor(0), &store);
        let oracle = Arc::new(MockOracleFeed::new());
        oracle.push_round(OracleEvent::new(840_000, "1", 100));

        let report = RecoveryCoordinator::new(engine.clone(), Arc::new(MockWagerFeed::new()), oracle)
            .run()
            .await
            .unwrap();

        assert_eq!(report.anchored_at, Some(840_000));
        assert!(report.settlements.is_empty());
        assert_eq!(engine.last_resolved_round().await, 840_000);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_without_moving_round_cursor() {
        let mut state = LedgerState::with_cursor(0);
        state.last_resolved_round = 4;
        let store = MemoryStore::with_state(state.clone());
        let engine = engine_at(state, &store);

        let wagers = Arc::new(MockWagerFeed::new());
        wagers.push_backlog(WagerEvent::new("1", "alice", Side::A, 100, 3));
        let oracle = Arc::new(MockOracleFeed::new());
        oracle.push_round(OracleEvent::new(5, "0", 10));
        oracle.push_round(OracleEvent::new(6, "0", 20));
        oracle.fail_round(Some(5));

        let coordinator = RecoveryCoordinator::new(engine.clone(), wagers, oracle.clone());
        assert!(matches!(
            coordinator.run().await,
            Err(RecoveryError::Fetch(_))
        ));
        assert_eq!(engine.last_resolved_round().await, 4);
        assert_eq!(engine.snapshot().await.open_wagers.len(), 1);

        oracle.fail_round(None);
        let report = coordinator.run().await.unwrap();
        assert_eq!(report.wagers_fetched, 0);
        assert_eq!(report.settlements.len(), 2);
        assert_eq!(engine.last_resolved_round().await, 6);
    }

    #[tokio::test]
    async fn malformed_round_is_skipped() {
        let mut state = LedgerState::with_cursor(0);
        state.last_resolved_round = 1;
        let store = MemoryStore::with_state(state.clone());
        let engine = engine_at(state, &store);

        let oracle = Arc::new(MockOracleFeed::new());
        oracle.push_round(OracleEvent::new(2, "", 10));
        oracle.push_round(OracleEvent::new(3, "a", 20));

        let report = RecoveryCoordinator::new(engine.clone(), Arc::new(MockWagerFeed::new()), oracle)
            .run()
            .await
            .unwrap();

        assert_eq!(report.skipped_rounds, vec![2]);
        assert_eq!(engine.last_resolved_round().await, 3);
    }

    #[tokio::test]
    async fn wager_fetch_failure_leaves_ledger_untouched() {
        let mut state = LedgerState::with_cursor(0);
        state.last_resolved_round = 4;
        let store = MemoryStore::with_state(state.clone());
        let engine = engine_at(state.clone(), &store);

        let wagers = Arc::new(MockWagerFeed::new());
        wagers.push_backlog(WagerEvent::new("1", "alice", Side::A, 100, 3));
        wagers.set_fail_fetch(true);
        let oracle = Arc::new(MockOracleFeed::new());
        oracle.push_round(OracleEvent::new(5, "0", 10));

        let coordinator = RecoveryCoordinator::new(engine.clone(), wagers.clone(), oracle);
        assert!(matches!(
            coordinator.run().await,
            Err(RecoveryError::Fetch(_))
        ));
        assert_eq!(wagers.fetch_calls(), 1);
        assert_eq!(engine.snapshot().await, state);
        assert_eq!(store.save_count(), 0);

        wagers.set_fail_fetch(false);
        let report = coordinator.run().await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.settlements.len(), 1);
        assert_eq!(engine.last_resolved_round().await, 5);
    }

    #[tokio::test]
    async fn last_settlement_is_offered_again() {
        let mut state = LedgerState::with_cursor(0);
        state.last_resolved_round = 4;
        let store = MemoryStore::with_state(state.clone());
        let engine = engine_at(state, &store);
        engine
            .record_wager(&WagerEvent::new("1", "alice", Side::A, 1_000, 3))
            .await
            .unwrap();
        let settled = engine.settle_round(&OracleEvent::new(5, "0", 10)).await.unwrap();

        // Restart over the same store with nothing new on the feeds.
        let restarted = engine_at(LedgerState::default(), &store);
        let oracle = Arc::new(MockOracleFeed::new());
        oracle.push_round(OracleEvent::new(5, "0", 10));

        let report = RecoveryCoordinator::new(restarted, Arc::new(MockWagerFeed::new()), oracle)
            .run()
            .await
            .unwrap();

        assert!(report.settlements.is_empty());
        assert_eq!(report.redelivered, Some(settled));
        let payable: Vec<u64> = report.payable().map(|s| s.round_marker).collect();
        assert_eq!(payable, vec![5]);
    }
}
