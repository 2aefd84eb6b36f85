//! Wager intake: validate, deduplicate, record.

use tracing::{debug, info, instrument, warn};

use super::amount::AmountDecoder;
use super::types::{IntakeOutcome, Wager, WagerEvent};
use crate::error::{LedgerError, ValidationError};
use crate::ledger::Ledger;
use crate::metrics;

/// Offer a raw wager event to the ledger.
///
/// Duplicates (already open, recently settled, or placed at or before the
/// settled horizon) are a no-op so feeds can be replayed freely. Only a
/// failed ledger write is an error; malformed events come back as
/// [`IntakeOutcome::Rejected`]. Never settles anything.
#[instrument(skip_all, fields(wager_id = event.id.as_deref().unwrap_or("-")))]
pub fn record_wager(
    ledger: &mut Ledger,
    event: &WagerEvent,
    decoder: &dyn AmountDecoder,
) -> Result<IntakeOutcome, LedgerError> {
    if let Some(id) = event.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        if ledger.has_seen(id, event.placed_at) {
            debug!("Duplicate wager ignored");
            metrics::inc_wagers_duplicate();
            return Ok(IntakeOutcome::Duplicate { id: id.to_string() });
        }
    }

    let validated = Wager::from_event(event, decoder.decode(event)).map_err(|reason| match reason {
        ValidationError::MissingField { field: "amount" } if decoder.name() != "declared" => {
            ValidationError::UndecodableAmount(format!("{} decoder found no amount", decoder.name()))
        }
        other => other,
    });

    let wager = match validated {
        Ok(wager) => wager,
        Err(reason) => {
            warn!(reason = %reason, "Wager rejected");
            metrics::inc_wagers_rejected();
            return Ok(IntakeOutcome::Rejected(reason));
        }
    };

    ledger.record(wager.clone())?;

    info!(
        bettor = %wager.bettor,
        side = %wager.side,
        amount = wager.amount,
        placed_at = wager.placed_at,
        "Wager recorded"
    );
    metrics::inc_wagers_accepted();
    Ok(IntakeOutcome::Accepted(wager))
}
