//! Settlement of a single round against the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, instrument};

use super::calculator::{calculate_round, Payout};
use crate::error::SettlementError;
use crate::ledger::Ledger;
use crate::metrics;
use crate::oracle::{resolve, OracleEvent};
use crate::wager::{Side, Wager};

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoundStatus {
    /// Winners were paid from the pool.
    Settled,
    /// Eligible wagers existed but none backed the outcome; pot retained.
    NoWinners,
    /// Nothing was eligible; only the round cursor moved.
    NoEligibleWagers,
    /// Round marker was already settled; nothing happened.
    AlreadySettled,
}

/// Outcome of settling one round, handed to the payout dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    /// Round marker.
    pub round_marker: u64,
    /// Oracle reference time used for eligibility.
    pub occurred_at: i64,
    /// How the round ended.
    pub status: RoundStatus,
    /// Winning side, when the round was resolved.
    pub outcome: Option<Side>,
    /// Sum of eligible stakes.
    pub pot: u64,
    /// House fee.
    pub fee: u64,
    /// Pot minus fee.
    pub payout_pool: u64,
    /// Truncation remainder kept by the house.
    pub dust: u64,
    /// Number of wagers folded into this round.
    pub eligible: usize,
    /// Number of open wagers carried to a later round.
    pub carried_over: usize,
    /// Amounts owed to winners.
    pub payouts: Vec<Payout>,
}

impl SettlementResult {
    fn empty(event: &OracleEvent, status: RoundStatus, outcome: Option<Side>, carried_over: usize) -> Self {
        Self {
            round_marker: event.round_marker,
            occurred_at: event.occurred_at,
            status,
            outcome,
            pot: 0,
            fee: 0,
            payout_pool: 0,
            dust: 0,
            eligible: 0,
            carried_over,
            payouts: Vec::new(),
        }
    }

    /// Sum of all payouts.
    pub fn total_paid(&self) -> u64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    /// Whether anything is owed to anyone.
    pub fn has_payouts(&self) -> bool {
        !self.payouts.is_empty()
    }
}

/// Settle one round.
///
/// Re-delivery of an already settled marker is a no-op. Otherwise the
/// outcome is resolved first (a malformed value changes nothing), eligible
/// wagers are folded out of the open set, and the cursor advance, wager
/// removal and payout decision are committed as one snapshot before the
/// result is returned. If that commit fails the round is not settled.
#[instrument(skip(ledger, event), fields(round = event.round_marker))]
pub fn settle_round(
    ledger: &mut Ledger,
    event: &OracleEvent,
    fee_rate: Decimal,
) -> Result<SettlementResult, SettlementError> {
    let _timer = metrics::timer_settlement();

    if event.round_marker <= ledger.last_resolved_round() {
        debug!(
            last_resolved = ledger.last_resolved_round(),
            "Round already settled, ignoring"
        );
        metrics::inc_rounds(RoundStatus::AlreadySettled);
        return Ok(SettlementResult::empty(event, RoundStatus::AlreadySettled, None, 0));
    }

    let outcome = resolve(&event.value)?;

    let (eligible, carried): (Vec<&Wager>, Vec<&Wager>) = ledger
        .state()
        .open_wagers
        .values()
        .partition(|w| w.placed_at < event.occurred_at);

    if eligible.is_empty() {
        let carried_over = carried.len();
        ledger.advance_round(event.round_marker)?;
        info!(carried_over, "No eligible wagers, round cursor advanced");
        metrics::inc_rounds(RoundStatus::NoEligibleWagers);
        return Ok(SettlementResult::empty(
            event,
            RoundStatus::NoEligibleWagers,
            Some(outcome),
            carried_over,
        ));
    }

    let (totals, payouts) = calculate_round(&eligible, outcome, fee_rate);
    let status = if payouts.is_empty() {
        RoundStatus::NoWinners
    } else {
        RoundStatus::Settled
    };

    let eligible_ids: Vec<String> = eligible.iter().map(|w| w.id.clone()).collect();
    let result = SettlementResult {
        round_marker: event.round_marker,
        occurred_at: event.occurred_at,
        status,
        outcome: Some(outcome),
        pot: totals.pot,
        fee: totals.fee,
        payout_pool: totals.payout_pool,
        dust: totals.dust,
        eligible: eligible_ids.len(),
        carried_over: carried.len(),
        payouts,
    };

    ledger.fold_round(event.round_marker, &eligible_ids, Some(result.clone()))?;

    info!(
        outcome = %outcome,
        face = outcome.coin_face(),
        pot = result.pot,
        fee = result.fee,
        payout_pool = result.payout_pool,
        winners = result.payouts.len(),
        dust = result.dust,
        carried_over = result.carried_over,
        "Round settled"
    );
    metrics::inc_rounds(status);
    metrics::inc_payouts_computed(result.payouts.len() as u64);

    Ok(result)
}
