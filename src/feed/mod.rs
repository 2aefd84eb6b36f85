//! External event feeds.
//!
//! This module handles:
//! - The [`WagerFeed`] and [`OracleFeed`] collaborator traits
//! - Bounded retry with backoff for backlog fetches
//! - Block explorer oracle adapter (REST backlog + WebSocket live)
//! - HTTP wager relay adapter
//! - In-memory feeds for tests and offline runs

pub mod http_wagers;
pub mod mempool;
pub mod mock;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::FeedError;
use crate::oracle::OracleEvent;
use crate::wager::WagerEvent;

pub use http_wagers::HttpWagerFeed;
pub use mempool::MempoolOracleFeed;
pub use mock::{MockOracleFeed, MockWagerFeed};
pub use retry::RetryPolicy;

/// An event bound for the single serialized ledger writer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A raw wager event.
    Wager(WagerEvent),
    /// A round-closing oracle event.
    Round(OracleEvent),
}

/// Source of wager events.
#[async_trait]
pub trait WagerFeed: Send + Sync {
    /// Wager events placed strictly after `cursor`, oldest first.
    async fn fetch_since(&self, cursor: i64) -> Result<Vec<WagerEvent>, FeedError>;

    /// Stream live wager events into `tx` until the receiver is dropped.
    fn subscribe(self: Arc<Self>, cursor: i64, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

/// Source of round-closing oracle events.
#[async_trait]
pub trait OracleFeed: Send + Sync {
    /// Highest round marker currently available.
    async fn head(&self) -> Result<u64, FeedError>;

    /// The oracle event for one round marker.
    async fn fetch_round(&self, round_marker: u64) -> Result<OracleEvent, FeedError>;

    /// Stream live oracle events after `last_seen` into `tx`, in
    /// increasing marker order, until the receiver is dropped.
    fn subscribe(self: Arc<Self>, last_seen: u64, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()>;

    /// Short label for logs.
    fn name(&self) -> &str;
}
