//! Payment rails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{PaymentInstruction, PaymentRail};
use crate::error::PayoutError;

/// Logs payouts instead of paying them.
#[derive(Debug, Default)]
pub struct DryRunRail {
    count: AtomicU64,
    total: AtomicU64,
}

impl DryRunRail {
    /// Create a dry-run rail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Payouts simulated so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Total amount simulated so far.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentRail for DryRunRail {
    async fn pay(&self, instruction: &PaymentInstruction) -> Result<(), PayoutError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(instruction.amount, Ordering::SeqCst);
        info!(
            key = %instruction.idempotency_key,
            destination = %instruction.destination,
            amount = instruction.amount,
            "[DRY RUN] Would pay"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

/// POSTs each instruction as JSON to an external payment service.
///
/// The service is expected to deduplicate on `idempotency_key`.
#[derive(Debug, Clone)]
pub struct WebhookRail {
    client: reqwest::Client,
    url: String,
}

impl WebhookRail {
    /// Create a webhook rail.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PayoutError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PaymentRail for WebhookRail {
    async fn pay(&self, instruction: &PaymentInstruction) -> Result<(), PayoutError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &instruction.idempotency_key)
            .json(instruction)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PayoutError::Rail {
                reason: format!("webhook returned {status}: {body}"),
            });
        }

        debug!(key = %instruction.idempotency_key, "Webhook accepted payout");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
