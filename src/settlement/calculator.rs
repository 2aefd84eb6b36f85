//! Pot, fee and pro-rata payout calculations.
//!
//! All amounts are integer satoshis. Every share is truncated toward zero
//! and the rounding remainder (dust) stays with the house; it is never
//! redistributed.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::wager::{Side, Wager};

/// Amount owed to one winning wager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Winning wager.
    pub wager_id: String,
    /// Bettor to pay.
    pub bettor: String,
    /// Amount owed.
    pub amount: u64,
}

/// Totals for one round's eligible wagers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundTotals {
    /// Sum of all eligible stakes.
    pub pot: u64,
    /// House fee, `floor(pot * fee_rate)`.
    pub fee: u64,
    /// Distributable amount, `pot - fee`.
    pub payout_pool: u64,
    /// Sum of winning stakes.
    pub winning_stake: u64,
    /// Sum of computed payouts.
    pub paid: u64,
    /// Truncation remainder, `payout_pool - paid` when there are winners.
    pub dust: u64,
}

impl RoundTotals {
    /// Everything the house keeps this round.
    pub fn retained(&self) -> u64 {
        self.pot - self.paid
    }
}

/// House fee for a pot, truncated toward zero and never above the pot.
pub fn house_fee(pot: u64, fee_rate: Decimal) -> u64 {
    if fee_rate <= Decimal::ZERO {
        return 0;
    }
    (Decimal::from(pot) * fee_rate)
        .floor()
        .to_u64()
        .unwrap_or(pot)
        .min(pot)
}

/// Split `payout_pool` across winners in proportion to their stakes.
///
/// Each share is `floor(amount * payout_pool / winning_stake)`, computed
/// exactly in 128-bit integers.
pub fn pro_rata_payouts(winners: &[&Wager], payout_pool: u64) -> Vec<Payout> {
    let winning_stake: u128 = winners.iter().map(|w| w.amount as u128).sum();
    if winning_stake == 0 {
        return Vec::new();
    }

    winners
        .iter()
        .map(|w| Payout {
            wager_id: w.id.clone(),
            bettor: w.bettor.clone(),
            amount: (w.amount as u128 * payout_pool as u128 / winning_stake) as u64,
        })
        .collect()
}

/// Sum of stakes, saturating at `u64::MAX`.
///
/// Stakes are capped at intake, so saturation needs thousands of maximal
/// wagers in one round; if it happens the pool shrinks, it never wraps.
pub fn total_stake<'a>(wagers: impl IntoIterator<Item = &'a Wager>) -> u64 {
    wagers
        .into_iter()
        .fold(0u64, |acc, w| acc.saturating_add(w.amount))
}

/// Compute totals and payouts for an eligible set under a resolved outcome.
pub fn calculate_round(
    eligible: &[&Wager],
    outcome: Side,
    fee_rate: Decimal,
) -> (RoundTotals, Vec<Payout>) {
    let pot = total_stake(eligible.iter().copied());
    let fee = house_fee(pot, fee_rate);
    let payout_pool = pot - fee;

    let winners: Vec<&Wager> = eligible
        .iter()
        .copied()
        .filter(|w| w.side == outcome)
        .collect();
    let winning_stake = total_stake(winners.iter().copied());

    let payouts = pro_rata_payouts(&winners, payout_pool);
    let paid: u64 = payouts.iter().map(|p| p.amount).sum();
    let dust = if payouts.is_empty() { 0 } else { payout_pool - paid };

    (
        RoundTotals {
            pot,
            fee,
            payout_pool,
            winning_stake,
            paid,
            dust,
        },
        payouts,
    )
}
