//! Integration tests for the settlement engine.
//!
//! These drive the public API end to end with in-memory feeds and both
//! ledger stores; nothing here touches the network.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use blockbet::error::LedgerError;
use blockbet::feed::{MockOracleFeed, MockWagerFeed, OracleFeed, RetryPolicy, WagerFeed};
use blockbet::ledger::{JsonFileStore, Ledger, LedgerState, LedgerStore, MemoryStore};
use blockbet::oracle::OracleEvent;
use blockbet::payout::{DirectoryLookup, DryRunRail, PayoutDispatcher};
use blockbet::recovery::RecoveryCoordinator;
use blockbet::settlement::{RoundStatus, SettlementEngine};
use blockbet::wager::{DeclaredAmount, IntakeOutcome, Side, WagerEvent};

fn engine_with(store: Box<dyn LedgerStore>, fresh: LedgerState) -> Arc<SettlementEngine> {
    let ledger = Ledger::open(store, fresh, 1_000).expect("ledger opens");
    Arc::new(SettlementEngine::new(ledger, dec!(0.01), Box::new(DeclaredAmount)))
}

fn temp_ledger_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("blockbet-it-{}", uuid::Uuid::new_v4()))
        .join("ledger.json")
}

fn alice() -> WagerEvent {
    WagerEvent::new("1", "alice@getalby.com", Side::A, 1_000, 10)
}

fn bob() -> WagerEvent {
    WagerEvent::new("2", "bob@getalby.com", Side::B, 3_000, 11)
}

fn round_five() -> OracleEvent {
    OracleEvent::new(5, "0000000000000000000268a1c7c3f1e4", 12)
}

#[tokio::test]
async fn reference_round_pays_sole_winner_whole_pool() {
    let engine = engine_with(Box::new(MemoryStore::new()), LedgerState::with_cursor(0));
    engine.record_wager(&alice()).await.unwrap();
    engine.record_wager(&bob()).await.unwrap();

    let result = engine.settle_round(&round_five()).await.unwrap();

    assert_eq!(result.outcome, Some(Side::A));
    assert_eq!(result.pot, 4_000);
    assert_eq!(result.fee, 40);
    assert_eq!(result.payout_pool, 3_960);
    assert_eq!(result.payouts.len(), 1);
    assert_eq!(result.payouts[0].wager_id, "1");
    assert_eq!(result.payouts[0].amount, 3_960);

    let state = engine.snapshot().await;
    assert!(state.open_wagers.is_empty());
    assert_eq!(state.last_resolved_round, 5);
}

#[tokio::test]
async fn replayed_wager_and_round_are_no_ops() {
    let engine = engine_with(Box::new(MemoryStore::new()), LedgerState::with_cursor(0));

    assert!(matches!(
        engine.record_wager(&alice()).await.unwrap(),
        IntakeOutcome::Accepted(_)
    ));
    assert_eq!(engine.record_wager(&alice()).await.unwrap().label(), "duplicate");
    engine.record_wager(&bob()).await.unwrap();

    let first = engine.settle_round(&round_five()).await.unwrap();
    let second = engine.settle_round(&round_five()).await.unwrap();

    assert_eq!(first.payouts.len(), 1);
    assert_eq!(second.status, RoundStatus::AlreadySettled);
    assert!(second.payouts.is_empty());
    assert_eq!(engine.record_wager(&alice()).await.unwrap().label(), "duplicate");
}

#[tokio::test]
async fn recovery_matches_a_process_that_never_stopped() {
    let mut restarted = LedgerState::with_cursor(0);
    restarted.last_resolved_round = 4;
    let seed = engine_with(Box::new(MemoryStore::with_state(restarted)), LedgerState::default());
    seed.record_wager(&alice()).await.unwrap();
    seed.record_wager(&bob()).await.unwrap();
    let before = seed.snapshot().await;
    assert_eq!(before.last_wager_cursor, 11);

    let carol = WagerEvent::new("3", "carol@getalby.com", Side::B, 500, 13);

    // Never restarted: events arrive live, in order.
    let live = engine_with(Box::new(MemoryStore::with_state(before.clone())), LedgerState::default());
    live.record_wager(&carol).await.unwrap();
    live.settle_round(&round_five()).await.unwrap();

    // Restarted: the same events come back through recovery.
    let recovered = engine_with(Box::new(MemoryStore::with_state(before)), LedgerState::default());
    let wagers = Arc::new(MockWagerFeed::new());
    for event in [alice(), bob(), carol.clone()] {
        wagers.push_backlog(event);
    }
    let oracle = Arc::new(MockOracleFeed::new());
    oracle.push_round(round_five());

    let report = RecoveryCoordinator::new(recovered.clone(), wagers, oracle)
        .run()
        .await
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.settlements.len(), 1);
    assert_eq!(recovered.snapshot().await, live.snapshot().await);
    assert!(recovered.snapshot().await.open_wagers.contains_key("3"));
}

#[tokio::test]
async fn recovery_twice_changes_nothing_the_second_time() {
    let mut state = LedgerState::with_cursor(0);
    state.last_resolved_round = 4;
    let engine = engine_with(Box::new(MemoryStore::with_state(state)), LedgerState::default());

    let wagers = Arc::new(MockWagerFeed::new());
    wagers.push_backlog(alice());
    wagers.push_backlog(bob());
    let oracle = Arc::new(MockOracleFeed::new());
    oracle.push_round(round_five());
    oracle.push_round(OracleEvent::new(6, "f", 30));

    let coordinator = RecoveryCoordinator::new(engine.clone(), wagers, oracle);
    let first = assert_ok!(coordinator.run().await);
    let after_first = engine.snapshot().await;
    let second = assert_ok!(coordinator.run().await);

    assert_eq!(first.payable().count(), 1);
    assert!(second.settlements.is_empty());
    // Only the persisted round 5 decision is offered again; the rail's
    // idempotency key absorbs it.
    let again: Vec<u64> = second.payable().map(|r| r.round_marker).collect();
    assert_eq!(again, vec![5]);
    assert_eq!(engine.snapshot().await, after_first);
}

#[tokio::test]
async fn json_ledger_survives_restart() {
    let path = temp_ledger_path();

    {
        let engine = engine_with(Box::new(JsonFileStore::new(&path)), LedgerState::with_cursor(0));
        engine.record_wager(&alice()).await.unwrap();
        engine.record_wager(&bob()).await.unwrap();
    }

    let reopened = engine_with(Box::new(JsonFileStore::new(&path)), LedgerState::with_cursor(999));
    assert_eq!(reopened.last_wager_cursor().await, 11);
    assert_eq!(reopened.snapshot().await.open_wagers.len(), 2);
    let result = reopened.settle_round(&round_five()).await.unwrap();
    assert_eq!(result.payouts[0].amount, 3_960);
    drop(reopened);

    let persisted = JsonFileStore::new(&path).load().unwrap().unwrap();
    assert_eq!(persisted.last_resolved_round, 5);
    assert!(persisted.open_wagers.is_empty());
    assert_eq!(persisted.last_settlement.map(|s| s.total_paid()), Some(3_960));

    let again = engine_with(Box::new(JsonFileStore::new(&path)), LedgerState::default());
    assert_eq!(
        again.settle_round(&round_five()).await.unwrap().status,
        RoundStatus::AlreadySettled
    );

    if let Some(dir) = path.parent() {
        std::fs::remove_dir_all(dir).ok();
    }
}

#[test]
fn corrupt_snapshot_is_a_hard_error() {
    let path = temp_ledger_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not a ledger").unwrap();

    let err = Ledger::open(Box::new(JsonFileStore::new(&path)), LedgerState::default(), 10)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Corrupt { .. }));

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[tokio::test]
async fn live_feeds_settle_and_dispatch() {
    let mut state = LedgerState::with_cursor(0);
    state.last_resolved_round = 4;
    let engine = engine_with(Box::new(MemoryStore::with_state(state)), LedgerState::default());

    let wagers = Arc::new(MockWagerFeed::new());
    wagers.push_live(alice());
    wagers.push_live(bob());
    let oracle = Arc::new(MockOracleFeed::new());

    let (feed_tx, feed_rx) = mpsc::channel(16);
    let (payout_tx, payout_rx) = mpsc::unbounded_channel();

    let rail = Arc::new(DryRunRail::new());
    let dispatcher = PayoutDispatcher::new(
        Arc::new(DirectoryLookup::from_entries(HashMap::new())),
        rail.clone(),
    );
    let dispatch_handle = dispatcher.spawn(payout_rx);

    // Wagers first, so the round sees them open.
    wagers.clone().subscribe(0, feed_tx.clone()).await.unwrap();
    oracle.push_round(round_five());
    oracle.clone().subscribe(4, feed_tx).await.unwrap();

    engine.clone().run(feed_rx, payout_tx, RetryPolicy::default()).await.unwrap();
    dispatch_handle.await.unwrap();

    assert_eq!(engine.last_resolved_round().await, 5);
    assert_eq!(rail.count(), 1);
    assert_eq!(rail.total(), 3_960);
    assert_eq!(engine.history().await.len(), 1);
}

#[tokio::test]
async fn evicted_winner_redelivered_is_not_paid_twice() {
    let ledger = Ledger::open(
        Box::new(MemoryStore::new()),
        LedgerState::with_cursor(0),
        1,
    )
    .expect("ledger opens");
    let engine = SettlementEngine::new(ledger, dec!(0.01), Box::new(DeclaredAmount));

    engine.record_wager(&alice()).await.unwrap();
    engine.record_wager(&bob()).await.unwrap();
    let first = engine.settle_round(&round_five()).await.unwrap();
    assert_eq!(first.payouts.len(), 1);

    let carol = WagerEvent::new("3", "carol@getalby.com", Side::B, 500, 20);
    engine.record_wager(&carol).await.unwrap();
    engine.settle_round(&OracleEvent::new(6, "b", 30)).await.unwrap();

    // Both of the first round's ids have left the settled window by now.
    assert_eq!(engine.record_wager(&alice()).await.unwrap().label(), "duplicate");
    let later = engine.settle_round(&OracleEvent::new(7, "a", 40)).await.unwrap();
    assert!(later.payouts.is_empty());
    assert_eq!(later.pot, 0);
}
