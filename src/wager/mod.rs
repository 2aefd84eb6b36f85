//! Wagers and wager intake.
//!
//! This module handles:
//! - Wager types and the two-sided outcome domain
//! - Pluggable amount decoding
//! - Validation, deduplication and recording of incoming wager events

pub mod amount;
pub mod intake;
pub mod types;

pub use amount::{decoder_from_name, AmountDecoder, DeclaredAmount, InvoiceAmount};
pub use intake::record_wager;
pub use types::{IntakeOutcome, Side, Wager, WagerEvent, MAX_STAKE};
