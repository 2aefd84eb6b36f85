//! Round settlement.
//!
//! This module handles:
//! - Pot, fee and pro-rata payout math
//! - Settling one round against the ledger
//! - The serialized engine that owns the ledger and consumes live feeds

pub mod calculator;
pub mod engine;
pub mod round;

pub use calculator::{
    calculate_round, house_fee, pro_rata_payouts, total_stake, Payout, RoundTotals,
};
pub use engine::{SettlementEngine, HISTORY_LIMIT};
pub use round::{settle_round, RoundStatus, SettlementResult};
