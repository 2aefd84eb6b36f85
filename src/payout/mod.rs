//! Payout dispatch.
//!
//! Settlement decides who is owed how much; this module decides nothing and
//! only delivers. The [`PayoutDispatcher`] consumes settlement results from
//! an unbounded channel, resolves each winner's payment target and hands a
//! [`PaymentInstruction`] to a [`PaymentRail`]. Failures are logged and
//! reported, never fed back into settlement.

pub mod directory;
pub mod rail;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::PayoutError;
use crate::metrics;
use crate::settlement::SettlementResult;

pub use directory::DirectoryLookup;
pub use rail::{DryRunRail, WebhookRail};

/// Resolves a bettor handle to a payment target.
#[async_trait]
pub trait DestinationLookup: Send + Sync {
    /// Payment target for `bettor`, or `None` when it cannot be paid.
    async fn lookup(&self, bettor: &str) -> Result<Option<String>, PayoutError>;
}

/// Executes a single payment.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Pay one instruction.
    async fn pay(&self, instruction: &PaymentInstruction) -> Result<(), PayoutError>;

    /// Rail name for logging.
    fn name(&self) -> &str;
}

/// One payment handed to the rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInstruction {
    /// Round that produced the payout.
    pub round: u64,
    /// Winning wager.
    pub wager_id: String,
    /// Payment target.
    pub destination: String,
    /// Amount in satoshis.
    pub amount: u64,
    /// Stable key so the rail can drop repeated deliveries.
    pub idempotency_key: String,
}

impl PaymentInstruction {
    /// Build an instruction; the idempotency key is `<round>:<wager_id>`.
    pub fn new(round: u64, wager_id: &str, destination: String, amount: u64) -> Self {
        Self {
            round,
            wager_id: wager_id.to_string(),
            destination,
            amount,
            idempotency_key: format!("{round}:{wager_id}"),
        }
    }
}

/// Outcome of dispatching one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Round marker.
    pub round: u64,
    /// Wager ids paid.
    pub paid: Vec<String>,
    /// Wager ids skipped for lack of a destination.
    pub missing_destination: Vec<String>,
    /// Wager ids whose lookup or payment failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Delivers settlement results to the payment rail.
#[derive(Clone)]
pub struct PayoutDispatcher {
    lookup: Arc<dyn DestinationLookup>,
    rail: Arc<dyn PaymentRail>,
}

impl PayoutDispatcher {
    /// Create a dispatcher.
    pub fn new(lookup: Arc<dyn DestinationLookup>, rail: Arc<dyn PaymentRail>) -> Self {
        Self { lookup, rail }
    }

    /// Pay every winner of one round.
    #[instrument(skip_all, fields(round = result.round_marker, rail = self.rail.name()))]
    pub async fn dispatch(&self, result: &SettlementResult) -> DispatchReport {
        let mut report = DispatchReport {
            round: result.round_marker,
            ..Default::default()
        };

        for payout in result.payouts.iter().filter(|p| p.amount > 0) {
            let destination = match self.lookup.lookup(&payout.bettor).await {
                Ok(Some(destination)) => destination,
                Ok(None) => {
                    let miss = PayoutError::LookupMiss {
                        bettor: payout.bettor.clone(),
                    };
                    warn!(
                        wager_id = %payout.wager_id,
                        amount = payout.amount,
                        reason = %miss,
                        "Payout skipped"
                    );
                    metrics::inc_payout_lookup_misses();
                    report.missing_destination.push(payout.wager_id.clone());
                    continue;
                }
                Err(e) => {
                    warn!(wager_id = %payout.wager_id, error = %e, "Destination lookup failed");
                    metrics::inc_payouts_failed();
                    report.failed.push((payout.wager_id.clone(), e.to_string()));
                    continue;
                }
            };

            let instruction = PaymentInstruction::new(
                result.round_marker,
                &payout.wager_id,
                destination,
                payout.amount,
            );
            match self.rail.pay(&instruction).await {
                Ok(()) => {
                    metrics::inc_payouts_dispatched();
                    report.paid.push(payout.wager_id.clone());
                }
                Err(e) => {
                    error!(
                        key = %instruction.idempotency_key,
                        amount = instruction.amount,
                        error = %e,
                        "Payout failed"
                    );
                    metrics::inc_payouts_failed();
                    report.failed.push((payout.wager_id.clone(), e.to_string()));
                }
            }
        }

        info!(
            paid = report.paid.len(),
            missing = report.missing_destination.len(),
            failed = report.failed.len(),
            "Round dispatched"
        );
        report
    }

    /// Dispatch results from `rx` until the channel closes.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<SettlementResult>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                self.dispatch(&result).await;
            }
            info!("Payout dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::{Payout, RoundStatus};
    use crate::wager::Side;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingRail {
        paid: Mutex<Vec<PaymentInstruction>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl PaymentRail for RecordingRail {
        async fn pay(&self, instruction: &PaymentInstruction) -> Result<(), PayoutError> {
            if self.fail_for.as_deref() == Some(instruction.wager_id.as_str()) {
                return Err(PayoutError::Rail {
                    reason: "declined".into(),
                });
            }
            self.paid.lock().unwrap().push(instruction.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn result(payouts: Vec<(&str, &str, u64)>) -> SettlementResult {
        SettlementResult {
            round_marker: 9,
            occurred_at: 100,
            status: RoundStatus::Settled,
            outcome: Some(Side::A),
            pot: 0,
            fee: 0,
            payout_pool: 0,
            dust: 0,
            eligible: payouts.len(),
            carried_over: 0,
            payouts: payouts
                .into_iter()
                .map(|(id, bettor, amount)| Payout {
                    wager_id: id.into(),
                    bettor: bettor.into(),
                    amount,
                })
                .collect(),
        }
    }

    fn directory() -> Arc<DirectoryLookup> {
        let entries: HashMap<String, String> = [
            ("alice".to_string(), "alice@getalby.com".to_string()),
            ("carol".to_string(), "carol@walletofsatoshi.com".to_string()),
        ]
        .into_iter()
        .collect();
        Arc::new(DirectoryLookup::from_entries(entries))
    }

    #[tokio::test]
    async fn lookup_miss_is_reported_not_fatal() {
        let rail = Arc::new(RecordingRail {
            paid: Mutex::new(Vec::new()),
            fail_for: None,
        });
        let dispatcher = PayoutDispatcher::new(directory(), rail.clone());

        let report = dispatcher
            .dispatch(&result(vec![("1", "alice", 500), ("2", "bob", 300)]))
            .await;

        assert_eq!(report.paid, vec!["1".to_string()]);
        assert_eq!(report.missing_destination, vec!["2".to_string()]);
        let paid = rail.paid.lock().unwrap();
        assert_eq!(paid[0].destination, "alice@getalby.com");
        assert_eq!(paid[0].idempotency_key, "9:1");
    }

    #[tokio::test]
    async fn rail_failure_does_not_stop_other_payouts() {
        let rail = Arc::new(RecordingRail {
            paid: Mutex::new(Vec::new()),
            fail_for: Some("1".into()),
        });
        let dispatcher = PayoutDispatcher::new(directory(), rail.clone());

        let report = dispatcher
            .dispatch(&result(vec![("1", "alice", 500), ("3", "carol", 200)]))
            .await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.paid, vec!["3".to_string()]);
    }

    #[tokio::test]
    async fn spawned_dispatcher_drains_channel() {
        let rail = Arc::new(RecordingRail {
            paid: Mutex::new(Vec::new()),
            fail_for: None,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PayoutDispatcher::new(directory(), rail.clone()).spawn(rx);

        tx.send(result(vec![("1", "alice", 10)])).unwrap();
        tx.send(result(vec![("3", "carol", 20)])).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(rail.paid.lock().unwrap().len(), 2);
    }
}
