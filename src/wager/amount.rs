//! Pluggable wager amount decoding.
//!
//! Wager feeds do not agree on where the staked amount lives: some declare
//! it directly, others only carry the payment invoice that funded the
//! wager. Intake asks an [`AmountDecoder`] instead of hardcoding either.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::WagerEvent;

/// Extracts the staked amount (in satoshis) from a raw wager event.
pub trait AmountDecoder: Send + Sync {
    /// Decoded amount, or `None` when the event carries no usable amount.
    fn decode(&self, event: &WagerEvent) -> Option<i64>;

    /// Decoder name for logging.
    fn name(&self) -> &str;
}

/// Uses the amount declared on the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredAmount;

impl AmountDecoder for DeclaredAmount {
    fn decode(&self, event: &WagerEvent) -> Option<i64> {
        event.amount
    }

    fn name(&self) -> &str {
        "declared"
    }
}

/// Reads the amount from the human-readable part of a BOLT11 invoice.
///
/// Only whole-satoshi amounts are accepted; invoices without an amount or
/// with sub-satoshi precision decode to `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceAmount;

static INVOICE_HRP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ln(?:bcrt|bc|tbs|tb|sb)(\d+)([munp]?)1").expect("valid regex")
});

impl InvoiceAmount {
    /// Decode a BOLT11 invoice string into satoshis.
    pub fn decode_invoice(invoice: &str) -> Option<i64> {
        let invoice = invoice.trim().to_lowercase();
        let invoice = invoice.strip_prefix("lightning:").unwrap_or(&invoice);
        let caps = INVOICE_HRP.captures(invoice)?;

        let value: u128 = caps.get(1)?.as_str().parse().ok()?;
        // Millisatoshis per unit of each multiplier, scaled by 10 so pico fits.
        let deci_msat_per_unit: u128 = match caps.get(2).map(|m| m.as_str()) {
            Some("m") => 1_000_000_000,
            Some("u") => 1_000_000,
            Some("n") => 1_000,
            Some("p") => 1,
            _ => 1_000_000_000_000,
        };

        let deci_msat = value.checked_mul(deci_msat_per_unit)?;
        if deci_msat % 10_000 != 0 {
            return None;
        }
        i64::try_from(deci_msat / 10_000).ok()
    }
}

impl AmountDecoder for InvoiceAmount {
    fn decode(&self, event: &WagerEvent) -> Option<i64> {
        Self::decode_invoice(event.invoice.as_deref()?)
    }

    fn name(&self) -> &str {
        "invoice"
    }
}

/// Build a decoder from its configuration name.
pub fn decoder_from_name(name: &str) -> Option<Box<dyn AmountDecoder>> {
    match name.trim().to_lowercase().as_str() {
        "declared" => Some(Box::new(DeclaredAmount)),
        "invoice" => Some(Box::new(InvoiceAmount)),
        _ => None,
    }
}
