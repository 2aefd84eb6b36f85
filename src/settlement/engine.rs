//! The single serialized ledger writer.
//!
//! Every mutation (wager intake and round settlement) goes through one
//! async mutex around the [`Ledger`], so read-decide-persist sequences
//! never interleave and round N+1 cannot start before round N has been
//! persisted. Live feeds and recovery are producers; [`SettlementEngine::run`]
//! is the consumer.

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::round::{settle_round, RoundStatus, SettlementResult};
use crate::error::{EngineError, LedgerError, SettlementError};
use crate::feed::{FeedEvent, RetryPolicy};
use crate::ledger::{Ledger, LedgerState};
use crate::metrics;
use crate::oracle::OracleEvent;
use crate::wager::{record_wager, AmountDecoder, IntakeOutcome, WagerEvent};

/// Number of settled rounds kept for presentation.
pub const HISTORY_LIMIT: usize = 50;

/// Owns the ledger and serializes every mutation of it.
pub struct SettlementEngine {
    ledger: Mutex<Ledger>,
    fee_rate: Decimal,
    decoder: Box<dyn AmountDecoder>,
    history: RwLock<VecDeque<SettlementResult>>,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("fee_rate", &self.fee_rate)
            .field("decoder", &self.decoder.name())
            .finish_non_exhaustive()
    }
}

impl SettlementEngine {
    /// Create an engine around an opened ledger.
    pub fn new(ledger: Ledger, fee_rate: Decimal, decoder: Box<dyn AmountDecoder>) -> Self {
        metrics::set_open_wagers(ledger.state().open_wagers.len());
        Self {
            ledger: Mutex::new(ledger),
            fee_rate,
            decoder,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// House fee rate.
    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    /// Name of the amount decoder in use.
    pub fn decoder_name(&self) -> &str {
        self.decoder.name()
    }

    /// Offer a wager event to intake.
    pub async fn record_wager(&self, event: &WagerEvent) -> Result<IntakeOutcome, LedgerError> {
        let mut ledger = self.ledger.lock().await;
        let outcome = record_wager(&mut ledger, event, self.decoder.as_ref())?;
        metrics::set_open_wagers(ledger.state().open_wagers.len());
        Ok(outcome)
    }

    /// Settle one round and remember it for presentation.
    pub async fn settle_round(&self, event: &OracleEvent) -> Result<SettlementResult, SettlementError> {
        let result = {
            let mut ledger = self.ledger.lock().await;
            let result = settle_round(&mut ledger, event, self.fee_rate)?;
            metrics::set_open_wagers(ledger.state().open_wagers.len());
            result
        };

        if result.status != RoundStatus::AlreadySettled {
            let mut history = self.history.write().await;
            history.push_front(result.clone());
            history.truncate(HISTORY_LIMIT);
        }
        Ok(result)
    }

    /// Anchor the round cursor at `head` if no round was ever settled.
    ///
    /// Returns whether the cursor moved.
    pub async fn anchor_rounds(&self, head: u64) -> Result<bool, LedgerError> {
        let mut ledger = self.ledger.lock().await;
        if ledger.last_resolved_round() != 0 {
            return Ok(false);
        }
        let moved = ledger.advance_round(head)?;
        if moved {
            info!(head, "Fresh ledger anchored at oracle head");
        }
        Ok(moved)
    }

    /// Copy of the current ledger snapshot.
    pub async fn snapshot(&self) -> LedgerState {
        self.ledger.lock().await.state().clone()
    }

    /// Marker of the last settled round.
    pub async fn last_resolved_round(&self) -> u64 {
        self.ledger.lock().await.last_resolved_round()
    }

    /// Current wager cursor.
    pub async fn last_wager_cursor(&self) -> i64 {
        self.ledger.lock().await.last_wager_cursor()
    }

    /// Payout decision of the most recently settled round, as persisted.
    pub async fn last_settlement(&self) -> Option<SettlementResult> {
        self.ledger.lock().await.state().last_settlement.clone()
    }

    /// Recently settled rounds, newest first.
    pub async fn history(&self) -> Vec<SettlementResult> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Consume live feed events until every producer has gone away.
    ///
    /// Results with payouts are forwarded to `payouts` without waiting on
    /// the dispatcher. Persistence failures are retried from the same event
    /// with `retry`'s backoff; when retries run out the loop stops with the
    /// error and the event is left for recovery on the next start. Rounds
    /// with a malformed oracle value are skipped.
    #[instrument(skip_all)]
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<FeedEvent>,
        payouts: mpsc::UnboundedSender<SettlementResult>,
        retry: RetryPolicy,
    ) -> Result<(), EngineError> {
        info!("Settlement loop started");

        while let Some(event) = events.recv().await {
            match event {
                FeedEvent::Wager(wager) => {
                    let mut attempt = 0u32;
                    while let Err(e) = self.record_wager(&wager).await {
                        if !backoff(&retry, &mut attempt, "wager intake", &e).await {
                            return Err(e.into());
                        }
                    }
                }
                FeedEvent::Round(round) => {
                    let mut attempt = 0u32;
                    loop {
                        match self.settle_round(&round).await {
                            Ok(result) => {
                                if result.has_payouts() && payouts.send(result).is_err() {
                                    warn!(round = round.round_marker, "Payout dispatcher is gone");
                                }
                                break;
                            }
                            Err(SettlementError::InvalidOracle(e)) => {
                                warn!(round = round.round_marker, error = %e, "Round skipped");
                                break;
                            }
                            Err(e) => {
                                if !backoff(&retry, &mut attempt, "settlement", &e).await {
                                    return Err(e.into());
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("All feeds closed, settlement loop stopped");
        Ok(())
    }
}

/// Sleep before the next attempt, or return `false` when attempts are used up.
async fn backoff(
    retry: &RetryPolicy,
    attempt: &mut u32,
    what: &str,
    error: &(dyn Display + Sync),
) -> bool {
    *attempt += 1;
    if *attempt >= retry.max_attempts {
        error!(operation = what, attempts = *attempt, error = %error, "Persistence retries exhausted");
        return false;
    }
    let delay = retry.next_delay(*attempt - 1);
    warn!(
        operation = what,
        attempt = *attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "Persistence failed, retrying"
    );
    tokio::time::sleep(delay).await;
    debug!(operation = what, "Retrying");
    true
}
