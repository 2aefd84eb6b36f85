//! Outcome resolver.
//!
//! The terminal digit of the oracle value, read in base 16, decides the
//! round: even wins side A, odd wins side B. Historical rounds were settled
//! with exactly this mapping, so it must never change.

use crate::error::OracleError;
use crate::wager::Side;

/// Base the terminal digit of an oracle value is read in.
pub const ORACLE_VALUE_RADIX: u32 = 16;

/// Map an oracle value to the winning side.
pub fn resolve(value: &str) -> Result<Side, OracleError> {
    let last = value
        .trim()
        .chars()
        .last()
        .ok_or_else(|| OracleError::InvalidOracleValue {
            value: value.to_string(),
            reason: "empty value".to_string(),
        })?;

    let digit = last
        .to_digit(ORACLE_VALUE_RADIX)
        .ok_or_else(|| OracleError::InvalidOracleValue {
            value: value.to_string(),
            reason: format!("terminal character {last:?} is not a base-{ORACLE_VALUE_RADIX} digit"),
        })?;

    Ok(if digit % 2 == 0 { Side::A } else { Side::B })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_digits_resolve_to_side_a() {
        for value in ["0", "2", "4", "6", "8", "a", "c", "e", "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a5f0"] {
            assert_eq!(resolve(value).unwrap(), Side::A, "value {value}");
        }
    }

    #[test]
    fn odd_digits_resolve_to_side_b() {
        for value in ["1", "3", "5", "7", "9", "b", "d", "f", "0000abc1"] {
            assert_eq!(resolve(value).unwrap(), Side::B, "value {value}");
        }
    }

    #[test]
    fn case_insensitive_and_trimmed() {
        assert_eq!(resolve("...E").unwrap(), Side::A);
        assert_eq!(resolve("...F\n").unwrap(), Side::B);
    }

    #[test]
    fn resolution_is_deterministic() {
        let value = "000000000000000000011d6e4f2b3c9e";
        let first = resolve(value).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(value).unwrap(), first);
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(resolve(""), Err(OracleError::InvalidOracleValue { .. })));
        assert!(matches!(resolve("   "), Err(OracleError::InvalidOracleValue { .. })));
        assert!(matches!(resolve("abcg"), Err(OracleError::InvalidOracleValue { .. })));
        assert!(matches!(resolve("12-"), Err(OracleError::InvalidOracleValue { .. })));
    }
}
