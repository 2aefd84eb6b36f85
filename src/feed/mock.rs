//! In-memory feeds for tests and offline runs.
//!
//! These feeds serve scripted events without touching the network and can
//! be told to fail, so recovery and retry paths can be exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FeedEvent, OracleFeed, WagerFeed};
use crate::error::FeedError;
use crate::oracle::OracleEvent;
use crate::wager::WagerEvent;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted wager feed.
#[derive(Debug, Default)]
pub struct MockWagerFeed {
    backlog: Mutex<Vec<WagerEvent>>,
    live: Mutex<Vec<WagerEvent>>,
    fail_fetch: AtomicBool,
    fetch_calls: AtomicU32,
}

impl MockWagerFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event served by `fetch_since`.
    pub fn push_backlog(&self, event: WagerEvent) {
        lock(&self.backlog).push(event);
    }

    /// Add an event delivered by `subscribe`.
    pub fn push_live(&self, event: WagerEvent) {
        lock(&self.live).push(event);
    }

    /// Make `fetch_since` fail.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Number of `fetch_since` calls so far.
    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WagerFeed for MockWagerFeed {
    async fn fetch_since(&self, cursor: i64) -> Result<Vec<WagerEvent>, FeedError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FeedError::Decode("mock wager feed unavailable".to_string()));
        }
        let mut events: Vec<WagerEvent> = lock(&self.backlog)
            .iter()
            .filter(|e| e.placed_at.map_or(true, |t| t > cursor))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.placed_at.unwrap_or(i64::MIN));
        Ok(events)
    }

    fn subscribe(self: Arc<Self>, _cursor: i64, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()> {
        let events: Vec<WagerEvent> = lock(&self.live).drain(..).collect();
        tokio::spawn(async move {
            for event in events {
                if tx.send(FeedEvent::Wager(event)).await.is_err() {
                    return;
                }
            }
        })
    }

    fn name(&self) -> &str {
        "mock-wagers"
    }
}

/// Scripted oracle feed keyed by round marker.
#[derive(Debug, Default)]
pub struct MockOracleFeed {
    rounds: Mutex<BTreeMap<u64, OracleEvent>>,
    fail_fetch: AtomicBool,
    fail_at: Mutex<Option<u64>>,
}

impl MockOracleFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a round.
    pub fn push_round(&self, event: OracleEvent) {
        lock(&self.rounds).insert(event.round_marker, event);
    }

    /// Make every fetch fail.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make fetching one specific round fail.
    pub fn fail_round(&self, round_marker: Option<u64>) {
        *lock(&self.fail_at) = round_marker;
    }
}

#[async_trait]
impl OracleFeed for MockOracleFeed {
    async fn head(&self) -> Result<u64, FeedError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FeedError::Decode("mock oracle feed unavailable".to_string()));
        }
        Ok(lock(&self.rounds).keys().next_back().copied().unwrap_or(0))
    }

    async fn fetch_round(&self, round_marker: u64) -> Result<OracleEvent, FeedError> {
        if self.fail_fetch.load(Ordering::SeqCst) || *lock(&self.fail_at) == Some(round_marker) {
            return Err(FeedError::Decode(format!("mock round {round_marker} unavailable")));
        }
        lock(&self.rounds)
            .get(&round_marker)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("round {round_marker}")))
    }

    fn subscribe(self: Arc<Self>, last_seen: u64, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()> {
        let events: Vec<OracleEvent> = lock(&self.rounds)
            .range(last_seen + 1..)
            .map(|(_, e)| e.clone())
            .collect();
        tokio::spawn(async move {
            for event in events {
                if tx.send(FeedEvent::Round(event)).await.is_err() {
                    return;
                }
            }
        })
    }

    fn name(&self) -> &str {
        "mock-oracle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wager::Side;

    #[tokio::test]
    async fn wager_backlog_is_filtered_by_cursor() {
        let feed = MockWagerFeed::new();
        feed.push_backlog(WagerEvent::new("1", "a", Side::A, 1, 10));
        feed.push_backlog(WagerEvent::new("2", "b", Side::B, 1, 11));

        let events = feed.fetch_since(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("2"));

        feed.set_fail_fetch(true);
        assert!(feed.fetch_since(0).await.is_err());
        assert_eq!(feed.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn oracle_subscribe_delivers_newer_rounds_in_order() {
        let feed = Arc::new(MockOracleFeed::new());
        for h in [7, 5, 6] {
            feed.push_round(OracleEvent::new(h, "0", h as i64));
        }
        assert_eq!(feed.head().await.unwrap(), 7);

        let (tx, mut rx) = mpsc::channel(8);
        feed.clone().subscribe(5, tx).await.unwrap();

        let mut seen = Vec::new();
        while let Some(FeedEvent::Round(e)) = rx.recv().await {
            seen.push(e.round_marker);
        }
        assert_eq!(seen, vec![6, 7]);
    }

    #[tokio::test]
    async fn missing_round_is_not_found() {
        let feed = MockOracleFeed::new();
        assert!(matches!(
            feed.fetch_round(3).await,
            Err(FeedError::NotFound(_))
        ));
    }
}
