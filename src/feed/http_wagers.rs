//! HTTP wager relay feed.
//!
//! The relay serves `GET {base}/wagers?since=<cursor>` as a JSON array of
//! wager events. Live delivery polls the same endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::retry::RetryPolicy;
use super::{FeedEvent, WagerFeed};
use crate::error::FeedError;
use crate::wager::WagerEvent;

/// Wager feed polling an HTTP relay.
#[derive(Debug, Clone)]
pub struct HttpWagerFeed {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl HttpWagerFeed {
    /// Create a feed for the relay at `base_url`.
    pub fn new(base_url: &str, poll_interval: Duration, retry: RetryPolicy) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(retry.timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            retry,
        })
    }

    async fn fetch_once(&self, cursor: i64) -> Result<Vec<WagerEvent>, FeedError> {
        let url = format!("{}/wagers", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("since", cursor)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let events: Vec<WagerEvent> =
            serde_json::from_str(&body).map_err(|e| FeedError::Decode(e.to_string()))?;
        Ok(after_cursor(events, cursor))
    }
}

/// Keep events strictly after `cursor`, oldest first.
///
/// Events without a timestamp are kept so intake can reject them.
fn after_cursor(mut events: Vec<WagerEvent>, cursor: i64) -> Vec<WagerEvent> {
    events.retain(|e| e.placed_at.map_or(true, |t| t > cursor));
    events.sort_by_key(|e| e.placed_at.unwrap_or(i64::MIN));
    events
}

#[async_trait]
impl WagerFeed for HttpWagerFeed {
    #[instrument(skip(self))]
    async fn fetch_since(&self, cursor: i64) -> Result<Vec<WagerEvent>, FeedError> {
        self.retry
            .run("wager_backlog", || async move { self.fetch_once(cursor).await })
            .await
    }

    fn subscribe(self: Arc<Self>, cursor: i64, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut cursor = cursor;
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(url = %self.base_url, cursor, "Polling wager relay");

            loop {
                ticker.tick().await;

                let events = match self.fetch_once(cursor).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "Wager poll failed");
                        continue;
                    }
                };
                if !events.is_empty() {
                    debug!(count = events.len(), "Polled wagers");
                }

                for event in events {
                    if let Some(t) = event.placed_at {
                        cursor = cursor.max(t);
                    }
                    if tx.send(FeedEvent::Wager(event)).await.is_err() {
                        info!("Channel closed, stopping wager poller");
                        return;
                    }
                }
            }
        })
    }

    fn name(&self) -> &str {
        "http-relay"
    }
}
