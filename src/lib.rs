//! Pari-mutuel settlement engine for Bitcoin block parity wagers.
//!
//! Bettors stake on one of two sides before a block is mined. Each new
//! block closes a round: the terminal hex digit of its hash picks the
//! winning side, a house fee is taken from the pot, and the rest is split
//! pro rata among the winning stakes.
//!
//! # Rules
//!
//! ```text
//! block hash ...a3e   terminal digit e = 14, even  -> side A (TAILS)
//! block hash ...a3f   terminal digit f = 15, odd   -> side B (HEADS)
//!
//! pot = 4000  fee = floor(4000 * 1%) = 40  pool = 3960
//! winner stakes 1000 of 1000 on side A     -> paid 3960
//! ```
//!
//! Only wagers placed strictly before the block timestamp are eligible;
//! later ones roll into the next round. Rounding dust is kept, never
//! redistributed.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`wager`]: Wager types, amount decoding and intake
//! - [`oracle`]: Oracle events and outcome resolution
//! - [`ledger`]: Durable ledger and snapshot stores
//! - [`settlement`]: Payout math, round settlement and the serialized engine
//! - [`recovery`]: Startup catch-up of missed events
//! - [`feed`]: Wager and oracle feeds
//! - [`payout`]: Payout dispatch to a payment rail
//! - [`api`]: HTTP API
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod metrics;
pub mod oracle;
pub mod payout;
pub mod recovery;
pub mod settlement;
pub mod utils;
pub mod wager;

pub use config::Config;
pub use error::{EngineError, Result};
