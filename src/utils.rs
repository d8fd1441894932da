//! Miscellaneous helper utilities.

use crate::errors::{Result, SwapError};
use bigdecimal::BigDecimal;
use ethers::types::{U256, U512};
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive};
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Smallest-unit integer to a human decimal, e.g. `1_500_000` with 6 decimals → `1.5`.
pub fn format_units(amount: U256, decimals: u8) -> BigDecimal {
    let mut bytes = [0u8; 32];
    amount.to_big_endian(&mut bytes);
    let int = BigInt::from_bytes_be(Sign::Plus, &bytes);
    BigDecimal::new(int, i64::from(decimals)).normalized()
}

/// Human decimal to smallest units, truncating anything below one unit.
pub fn parse_units(amount: &BigDecimal, decimals: u8) -> Result<U256> {
    if amount.is_negative() {
        return Err(SwapError::Amount(amount.to_string()));
    }
    let unit = BigDecimal::new(BigInt::from(1), -i64::from(decimals));
    let scaled = (amount.clone() * unit).with_scale(0);
    let (int, _) = scaled.into_bigint_and_exponent();
    U256::from_dec_str(&int.to_string()).map_err(|_| SwapError::Amount(amount.to_string()))
}

/// Convenience for config strings like `"0.1"`.
pub fn parse_units_str(amount: &str, decimals: u8) -> Result<U256> {
    let value =
        BigDecimal::from_str(amount.trim()).map_err(|_| SwapError::Amount(amount.to_string()))?;
    parse_units(&value, decimals)
}

/// Lossy float view of a token amount, for USD scoring only.
pub fn units_to_f64(amount: U256, decimals: u8) -> f64 {
    format_units(amount, decimals).to_f64().unwrap_or(0.0)
}

/// `amount * bps / 10_000` without overflow.
pub fn apply_bps(amount: U256, bps: u32) -> U256 {
    let scaled = amount.full_mul(U256::from(bps)) / U512::from(10_000u64);
    U256::try_from(scaled).unwrap_or(U256::MAX)
}

/// Re-express `amount` from one decimal precision in another (1:1 value).
pub fn rescale(amount: U256, from_decimals: u8, to_decimals: u8) -> U256 {
    if to_decimals >= from_decimals {
        let factor = U256::exp10(usize::from(to_decimals - from_decimals));
        amount.saturating_mul(factor)
    } else {
        amount / U256::exp10(usize::from(from_decimals - to_decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse_units() {
        let v = U256::from(1_500_000u64);
        assert_eq!(format_units(v, 6).to_string(), "1.5");
        assert_eq!(parse_units_str("1.5", 6).unwrap(), v);
        assert_eq!(parse_units_str("0.1", 6).unwrap(), U256::from(100_000u64));
    }

    #[test]
    fn parse_units_truncates_dust() {
        assert_eq!(parse_units_str("1.0000009", 6).unwrap(), U256::from(1_000_000u64));
    }

    #[test]
    fn parse_units_rejects_garbage() {
        assert!(parse_units_str("-1", 6).is_err());
        assert!(parse_units_str("abc", 6).is_err());
    }

    #[test]
    fn bps_and_rescale() {
        assert_eq!(apply_bps(U256::from(10_000u64), 9_900), U256::from(9_900u64));
        assert_eq!(apply_bps(U256::MAX, 10_000), U256::MAX);
        assert_eq!(
            rescale(U256::from(1_000_000u64), 6, 18),
            U256::exp10(18)
        );
        assert_eq!(rescale(U256::exp10(18), 18, 6), U256::from(1_000_000u64));
    }

    #[test]
    fn float_view() {
        assert!((units_to_f64(U256::from(2_500_000u64), 6) - 2.5).abs() < 1e-12);
    }
}
