//! Wager-related types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ValidationError;

/// One of the two wagerable sides of a round.
///
/// Historical rounds call side A `TAILS` (even terminal digit) and side B
/// `HEADS` (odd terminal digit); both spellings are accepted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Side A (TAILS).
    #[strum(to_string = "A", serialize = "TAILS")]
    A,
    /// Side B (HEADS).
    #[strum(to_string = "B", serialize = "HEADS")]
    B,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Historical display name of the side.
    pub fn coin_face(&self) -> &'static str {
        match self {
            Side::A => "TAILS",
            Side::B => "HEADS",
        }
    }

    /// Parse a side as bettors write it: case-insensitive, whitespace ignored.
    pub fn parse_loose(raw: &str) -> Result<Self, ValidationError> {
        raw.trim()
            .to_uppercase()
            .parse()
            .map_err(|_| ValidationError::UnknownSide {
                side: raw.to_string(),
            })
    }
}

/// Raw wager event as delivered by the wager feed.
///
/// Every field is optional on the wire; [`Wager::from_event`] decides
/// whether the event is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerEvent {
    /// Source-assigned unique identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Opaque bettor identity handle.
    #[serde(default)]
    pub bettor: Option<String>,
    /// Side as written by the bettor.
    #[serde(default)]
    pub side: Option<String>,
    /// Declared amount in the smallest settlement unit.
    #[serde(default)]
    pub amount: Option<i64>,
    /// Payment invoice carrying the real amount, when the feed has one.
    #[serde(default)]
    pub invoice: Option<String>,
    /// Source timestamp (unix seconds).
    #[serde(default, alias = "created_at")]
    pub placed_at: Option<i64>,
}

impl WagerEvent {
    /// Build a fully populated event.
    pub fn new(
        id: impl Into<String>,
        bettor: impl Into<String>,
        side: Side,
        amount: i64,
        placed_at: i64,
    ) -> Self {
        Self {
            id: Some(id.into()),
            bettor: Some(bettor.into()),
            side: Some(side.to_string()),
            amount: Some(amount),
            invoice: None,
            placed_at: Some(placed_at),
        }
    }
}

/// Largest accepted stake: the full 21M BTC supply in satoshis.
pub const MAX_STAKE: i64 = 2_100_000_000_000_000;

/// An accepted, immutable wager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    /// Source-assigned unique identifier.
    pub id: String,
    /// Opaque bettor identity handle.
    pub bettor: String,
    /// Side wagered on.
    pub side: Side,
    /// Stake in the smallest settlement unit.
    pub amount: u64,
    /// Source timestamp (unix seconds).
    pub placed_at: i64,
}

impl Wager {
    /// Validate a raw event into a wager using an already decoded amount.
    pub fn from_event(event: &WagerEvent, amount: Option<i64>) -> Result<Self, ValidationError> {
        let id = required(&event.id, "id")?;
        let bettor = required(&event.bettor, "bettor")?;
        let side_raw = required(&event.side, "side")?;
        let amount = amount.ok_or(ValidationError::MissingField { field: "amount" })?;
        let placed_at = event
            .placed_at
            .ok_or(ValidationError::MissingField { field: "placed_at" })?;

        if amount <= 0 {
            return Err(ValidationError::NonPositiveAmount { amount });
        }
        if amount > MAX_STAKE {
            return Err(ValidationError::AmountTooLarge {
                amount,
                max: MAX_STAKE,
            });
        }

        Ok(Self {
            id,
            bettor,
            side: Side::parse_loose(&side_raw)?,
            amount: amount as u64,
            placed_at,
        })
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ValidationError::MissingField { field }),
    }
}

/// Result of offering a wager event to intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Recorded as a new open wager.
    Accepted(Wager),
    /// Already open or already settled; nothing changed.
    Duplicate {
        /// The duplicated identifier.
        id: String,
    },
    /// Malformed; nothing was persisted.
    Rejected(ValidationError),
}

impl IntakeOutcome {
    /// Short label for logs and API responses.
    pub fn label(&self) -> &'static str {
        match self {
            IntakeOutcome::Accepted(_) => "accepted",
            IntakeOutcome::Duplicate { .. } => "duplicate",
            IntakeOutcome::Rejected(_) => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite_works() {
        assert_eq!(Side::A.opposite(), Side::B);
        assert_eq!(Side::B.opposite(), Side::A);
    }

    #[test]
    fn side_parses_coin_faces() {
        assert_eq!(Side::parse_loose("tails").unwrap(), Side::A);
        assert_eq!(Side::parse_loose(" Heads \n").unwrap(), Side::B);
        assert_eq!(Side::parse_loose("a").unwrap(), Side::A);
        assert!(matches!(
            Side::parse_loose("edge"),
            Err(ValidationError::UnknownSide { .. })
        ));
    }

    #[test]
    fn wager_from_complete_event() {
        let event = WagerEvent::new("w1", "alice", Side::B, 500, 42);
        let wager = Wager::from_event(&event, event.amount).unwrap();

        assert_eq!(wager.id, "w1");
        assert_eq!(wager.side, Side::B);
        assert_eq!(wager.amount, 500);
        assert_eq!(wager.placed_at, 42);
    }

    #[test]
    fn wager_rejects_missing_and_blank_fields() {
        let mut event = WagerEvent::new("w1", "alice", Side::A, 500, 42);
        event.bettor = Some("   ".to_string());
        assert_eq!(
            Wager::from_event(&event, event.amount),
            Err(ValidationError::MissingField { field: "bettor" })
        );

        let mut event = WagerEvent::new("w1", "alice", Side::A, 500, 42);
        event.placed_at = None;
        assert_eq!(
            Wager::from_event(&event, event.amount),
            Err(ValidationError::MissingField { field: "placed_at" })
        );
    }

    #[test]
    fn wager_rejects_non_positive_amount() {
        let event = WagerEvent::new("w1", "alice", Side::A, 0, 42);
        assert_eq!(
            Wager::from_event(&event, Some(0)),
            Err(ValidationError::NonPositiveAmount { amount: 0 })
        );
        assert_eq!(
            Wager::from_event(&event, Some(-5)),
            Err(ValidationError::NonPositiveAmount { amount: -5 })
        );
    }

    #[test]
    fn wager_rejects_stake_above_supply() {
        let event = WagerEvent::new("w1", "alice", Side::A, i64::MAX, 42);
        assert_eq!(
            Wager::from_event(&event, event.amount),
            Err(ValidationError::AmountTooLarge {
                amount: i64::MAX,
                max: MAX_STAKE,
            })
        );
        assert!(Wager::from_event(&event, Some(MAX_STAKE)).is_ok());
    }

    #[test]
    fn wager_event_accepts_created_at_alias() {
        let event: WagerEvent =
            serde_json::from_str(r#"{"id":"x","bettor":"b","side":"HEADS","amount":1,"created_at":9}"#)
                .unwrap();
        assert_eq!(event.placed_at, Some(9));
    }
}
