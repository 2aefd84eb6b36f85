//! Block explorer oracle feed.
//!
//! Each Bitcoin block closes one round: the block height is the round
//! marker, the block hash is the oracle value and the block timestamp is
//! the eligibility cut-off. Backlog is read over REST; live blocks arrive
//! over the explorer's WebSocket, with reconnect backoff and gap backfill.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use super::retry::RetryPolicy;
use super::{FeedEvent, OracleFeed};
use crate::error::FeedError;
use crate::metrics;
use crate::oracle::OracleEvent;

/// Block summary as served by the explorer.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockSummary {
    /// Block hash.
    pub id: String,
    /// Block height.
    pub height: u64,
    /// Block timestamp (Unix seconds).
    pub timestamp: i64,
}

impl From<BlockSummary> for OracleEvent {
    fn from(block: BlockSummary) -> Self {
        OracleEvent::new(block.height, block.id, block.timestamp)
    }
}

/// Live WebSocket frame; only `block` is of interest.
#[derive(Debug, Deserialize)]
struct WsFrame {
    #[serde(default)]
    block: Option<BlockSummary>,
}

/// Subscription request sent after connecting.
const WANT_BLOCKS: &str = r#"{"action":"want","data":["blocks"]}"#;

/// Why a live session ended.
enum SessionEnd {
    /// Connection dropped; reconnect.
    Disconnected,
    /// Consumer went away; stop.
    ReceiverClosed,
}

/// Oracle feed backed by a mempool.space-compatible explorer.
#[derive(Debug, Clone)]
pub struct MempoolOracleFeed {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
    retry: RetryPolicy,
}

impl MempoolOracleFeed {
    /// Create a feed for the given REST and WebSocket endpoints.
    pub fn new(rest_url: &str, ws_url: &str, retry: RetryPolicy) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(retry.timeout).build()?;
        Ok(Self {
            client,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.to_string(),
            retry,
        })
    }

    async fn get_text(&self, url: String) -> Result<String, FeedError> {
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FeedError::NotFound(url));
        }
        if !status.is_success() {
            return Err(FeedError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    async fn fetch_block(&self, height: u64) -> Result<BlockSummary, FeedError> {
        let hash = self
            .get_text(format!("{}/block-height/{}", self.rest_url, height))
            .await?;
        let body = self
            .get_text(format!("{}/block/{}", self.rest_url, hash.trim()))
            .await?;
        serde_json::from_str(&body).map_err(|e| FeedError::Decode(e.to_string()))
    }

    /// Deliver every round after `last_seen` up to and including `upto`.
    ///
    /// Stops at the first failure so rounds are never delivered out of order.
    async fn backfill(
        &self,
        last_seen: &mut u64,
        upto: u64,
        tx: &mpsc::Sender<FeedEvent>,
    ) -> Result<bool, FeedError> {
        // Nothing anchored yet: start from the tip rather than genesis.
        if *last_seen == 0 {
            *last_seen = upto;
            return Ok(true);
        }
        if *last_seen + 1 < upto {
            info!(from = *last_seen + 1, to = upto - 1, "Backfilling missed blocks");
        }
        for height in (*last_seen + 1)..=upto {
            let event = self.fetch_round(height).await?;
            if tx.send(FeedEvent::Round(event)).await.is_err() {
                return Ok(false);
            }
            *last_seen = height;
        }
        Ok(true)
    }

    async fn session(
        &self,
        last_seen: &mut u64,
        attempt: &mut u32,
        tx: &mpsc::Sender<FeedEvent>,
    ) -> Result<SessionEnd, FeedError> {
        info!(url = %self.ws_url, "Connecting to block feed");
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        write.send(Message::Text(WANT_BLOCKS.to_string())).await?;
        *attempt = 0;

        // Blocks mined while disconnected.
        let head = self.head().await?;
        if head > *last_seen && !self.backfill(last_seen, head, tx).await? {
            return Ok(SessionEnd::ReceiverClosed);
        }

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => {
                    let Some(block) = parse_block(&text) else {
                        continue;
                    };
                    if block.height <= *last_seen {
                        debug!(height = block.height, "Stale block ignored");
                        continue;
                    }
                    if !self.backfill(last_seen, block.height - 1, tx).await? {
                        return Ok(SessionEnd::ReceiverClosed);
                    }
                    let height = block.height;
                    info!(height, hash = %block.id, "New block");
                    if tx.send(FeedEvent::Round(block.into())).await.is_err() {
                        return Ok(SessionEnd::ReceiverClosed);
                    }
                    *last_seen = height;
                }
                Message::Close(frame) => {
                    warn!(frame = ?frame, "Block feed closed");
                    break;
                }
                _ => {}
            }
        }

        Ok(SessionEnd::Disconnected)
    }
}

fn parse_block(text: &str) -> Option<BlockSummary> {
    serde_json::from_str::<WsFrame>(text).ok()?.block
}

#[async_trait]
impl OracleFeed for MempoolOracleFeed {
    #[instrument(skip(self))]
    async fn head(&self) -> Result<u64, FeedError> {
        let url = format!("{}/blocks/tip/height", self.rest_url);
        self.retry
            .run("oracle_head", || {
                let url = url.clone();
                async move {
                    let text = self.get_text(url).await?;
                    text.trim()
                        .parse::<u64>()
                        .map_err(|e| FeedError::Decode(format!("tip height {text:?}: {e}")))
                }
            })
            .await
    }

    #[instrument(skip(self))]
    async fn fetch_round(&self, round_marker: u64) -> Result<OracleEvent, FeedError> {
        self.retry
            .run("oracle_round", || async move { self.fetch_block(round_marker).await })
            .await
            .map(OracleEvent::from)
    }

    fn subscribe(self: Arc<Self>, last_seen: u64, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_seen = last_seen;
            let mut attempt = 0u32;

            loop {
                match self.session(&mut last_seen, &mut attempt, &tx).await {
                    Ok(SessionEnd::ReceiverClosed) => {
                        info!("Channel closed, stopping block feed");
                        return;
                    }
                    Ok(SessionEnd::Disconnected) => warn!("Block feed ended, will reconnect"),
                    Err(e) => error!(error = %e, attempt, "Block feed failed"),
                }
                if tx.is_closed() {
                    return;
                }

                let delay = self.retry.next_delay(attempt);
                metrics::inc_ws_reconnects();
                info!(delay_ms = delay.as_millis() as u64, last_seen, "Reconnecting after delay");
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        })
    }

    fn name(&self) -> &str {
        "mempool"
    }
}
