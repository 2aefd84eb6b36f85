//! Oracle events and outcome resolution.

pub mod resolver;

use serde::{Deserialize, Serialize};

pub use resolver::{resolve, ORACLE_VALUE_RADIX};

/// Outcome-determining event for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleEvent {
    /// Strictly increasing round identifier (block height).
    pub round_marker: u64,
    /// Raw datum the outcome is derived from (block hash).
    pub value: String,
    /// Reference time (unix seconds); wagers placed strictly before it are eligible.
    pub occurred_at: i64,
}

impl OracleEvent {
    /// Create a new oracle event.
    pub fn new(round_marker: u64, value: impl Into<String>, occurred_at: i64) -> Self {
        Self {
            round_marker,
            value: value.into(),
            occurred_at,
        }
    }
}
