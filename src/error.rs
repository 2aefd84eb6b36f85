//! Unified error types for the settlement engine.

use thiserror::Error;

/// Unified error type for the settlement engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Ledger persistence error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Round settlement error.
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
}

/// Malformed wager input. Rejected events are never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A mandatory field is absent or blank.
    #[error("missing field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// Amount is zero or negative.
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The offending amount.
        amount: i64,
    },

    /// Amount exceeds the largest accepted stake.
    #[error("amount {amount} exceeds the maximum stake {max}")]
    AmountTooLarge {
        /// The offending amount.
        amount: i64,
        /// Largest accepted stake.
        max: i64,
    },

    /// Side is not one of the two wagerable sides.
    #[error("unknown side: {side:?}")]
    UnknownSide {
        /// Side as received.
        side: String,
    },

    /// The configured amount decoder could not extract an amount.
    #[error("amount could not be decoded: {0}")]
    UndecodableAmount(String),
}

/// Oracle value errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The value has no usable terminal digit.
    #[error("invalid oracle value {value:?}: {reason}")]
    InvalidOracleValue {
        /// Value as received.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Ledger persistence failures.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Reading or writing the snapshot failed.
    #[error("ledger io failed for {path}: {source}")]
    Io {
        /// Snapshot path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be serialized.
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Snapshot on disk is not a valid ledger.
    #[error("corrupt ledger snapshot at {path}: {reason}")]
    Corrupt {
        /// Snapshot path.
        path: String,
        /// Parse failure.
        reason: String,
    },

    /// Store refused the write.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// Transient failures fetching from an external feed.
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream returned a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A single attempt exceeded its deadline.
    #[error("{operation} timed out after {timeout_s}s")]
    Timeout {
        /// Operation label.
        operation: String,
        /// Per-attempt timeout.
        timeout_s: u64,
    },

    /// Upstream payload could not be decoded.
    #[error("failed to decode feed payload: {0}")]
    Decode(String),

    /// Every attempt failed.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Operation label.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Requested item does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Round settlement failures.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Oracle value could not be resolved; nothing was changed.
    #[error(transparent)]
    InvalidOracle(#[from] OracleError),

    /// The round could not be persisted and is not settled.
    #[error("round not persisted: {0}")]
    Persistence(#[from] LedgerError),
}

/// Startup recovery failures. Cursors only reflect fully folded work.
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Backlog fetch failed after retries.
    #[error("backlog fetch failed: {0}")]
    Fetch(#[from] FeedError),

    /// A replayed round could not be persisted.
    #[error("replayed round failed: {0}")]
    Settlement(#[from] SettlementError),

    /// A replayed wager could not be persisted.
    #[error("replayed wager failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Payout dispatch failures. None of these affect settlement.
#[derive(Error, Debug)]
pub enum PayoutError {
    /// No payment target is known for the bettor.
    #[error("no payout destination for bettor {bettor}")]
    LookupMiss {
        /// Bettor handle.
        bettor: String,
    },

    /// Destination lookup failed.
    #[error("destination lookup failed: {0}")]
    Lookup(String),

    /// The payment rail refused or failed the payment.
    #[error("payment rail error: {reason}")]
    Rail {
        /// Failure reason.
        reason: String,
    },

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;
