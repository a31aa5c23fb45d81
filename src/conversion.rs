//! C10: Conversion engine (spec §4.10). Pure arithmetic over `Amount`; no close
//! analog in the pack, so this mirrors `amount.rs`'s own style (checked, no floats)
//! rather than being grounded in a specific teacher file.

use crate::amount::{Amount, AmountError};
use crate::error::BankError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Zero,
    Nearest,
    Up,
}

#[derive(Debug, Clone)]
pub struct ConversionSide {
    pub ratio_num: u64,
    pub ratio_den: u64,
    pub fee: Amount,
    pub tiny_amount: Amount,
    pub rounding_mode: RoundingMode,
    pub min_amount: Amount,
}

#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub cashin: ConversionSide,
    pub cashout: ConversionSide,
}

impl ConversionConfig {
    /// Loads the rate table from the environment, following `config.rs`'s own
    /// `env::var` idiom. Returns `None` (rather than an error) when no rate table
    /// is installed, which is a supported operating mode — conversion endpoints
    /// answer `NOT_IMPLEMENTED` in that case (spec §4.10).
    pub fn load_from_env(regional_currency: &str, fiat_currency: &str) -> Option<Self> {
        let cashin = ConversionSide::load_from_env("CASHIN", fiat_currency)?;
        let cashout = ConversionSide::load_from_env("CASHOUT", regional_currency)?;
        Some(Self { cashin, cashout })
    }
}

impl ConversionSide {
    fn load_from_env(prefix: &str, fee_currency: &str) -> Option<Self> {
        use std::env;

        let ratio_num: u64 = env::var(format!("{prefix}_RATIO_NUM")).ok()?.parse().ok()?;
        let ratio_den: u64 = env::var(format!("{prefix}_RATIO_DEN")).ok()?.parse().ok()?;
        let fee_frac: u32 = env::var(format!("{prefix}_FEE_FRAC")).ok()?.parse().ok()?;
        let tiny_frac: u32 = env::var(format!("{prefix}_TINY_FRAC")).ok()?.parse().ok()?;
        let min_value: u64 = env::var(format!("{prefix}_MIN_VALUE"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let rounding_mode = match env::var(format!("{prefix}_ROUNDING_MODE")).ok()?.as_str() {
            "zero" => RoundingMode::Zero,
            "nearest" => RoundingMode::Nearest,
            "up" => RoundingMode::Up,
            _ => return None,
        };

        Some(Self {
            ratio_num,
            ratio_den,
            fee: Amount::new(0, fee_frac, fee_currency).ok()?,
            tiny_amount: Amount::new(0, tiny_frac, fee_currency).ok()?,
            rounding_mode,
            min_amount: Amount::new(min_value, 0, fee_currency).ok()?,
        })
    }
}

/// Raw fixed-point units at 10^-8 precision, used internally so rounding can operate
/// on plain integers instead of walking `Amount`'s carry logic.
fn to_units(amount: &Amount) -> u128 {
    amount.value as u128 * crate::amount::FRACTION_BASE as u128 + amount.frac as u128
}

fn from_units(units: u128, currency: &str) -> Result<Amount, AmountError> {
    let value = (units / crate::amount::FRACTION_BASE as u128) as u64;
    let frac = (units % crate::amount::FRACTION_BASE as u128) as u32;
    Amount::new(value, frac, currency)
}

/// Rounds `units` down to the nearest multiple of `tiny_units` per `mode`. `Zero`
/// truncates, `Up` rounds away from zero, `Nearest` resolves an exact midpoint with
/// banker's rounding (round-half-to-even on the quotient) per the Open Questions
/// decision recorded in DESIGN.md.
fn round_to_tiny(units: u128, tiny_units: u128, mode: RoundingMode) -> u128 {
    if tiny_units == 0 {
        return units;
    }
    let quotient = units / tiny_units;
    let remainder = units % tiny_units;
    if remainder == 0 {
        return units;
    }
    match mode {
        RoundingMode::Zero => quotient * tiny_units,
        RoundingMode::Up => (quotient + 1) * tiny_units,
        RoundingMode::Nearest => round_nearest(quotient, remainder, tiny_units),
    }
}

fn round_nearest(quotient: u128, remainder: u128, tiny_units: u128) -> u128 {
    let twice = remainder * 2;
    if twice < tiny_units {
        quotient * tiny_units
    } else if twice > tiny_units {
        (quotient + 1) * tiny_units
    } else if quotient % 2 == 0 {
        quotient * tiny_units
    } else {
        (quotient + 1) * tiny_units
    }
}

/// `credit = round((debit * ratio), tiny, mode) - fee`.
fn forward(
    debit: &Amount,
    side: &ConversionSide,
    credit_currency: &str,
) -> Result<Amount, BankError> {
    if *debit < side.min_amount {
        return Err(BankError::BadConversion);
    }
    let debit_units = to_units(debit);
    let scaled = debit_units
        .checked_mul(side.ratio_num as u128)
        .ok_or(AmountError::Overflow)?
        / side.ratio_den as u128;

    let tiny_units = to_units(&side.tiny_amount);
    let rounded = round_to_tiny(scaled, tiny_units, side.rounding_mode);

    let fee_units = to_units(&side.fee);
    let net = rounded
        .checked_sub(fee_units)
        .ok_or(BankError::BadConversion)?;

    from_units(net, credit_currency).map_err(BankError::from)
}

/// Inverse query: given the desired credit, finds the `(debit, credit)` pair the
/// forward computation would produce. Since rounding is not generally invertible in
/// closed form, this does a bounded linear search over tiny-amount multiples near
/// the naive inverse, which is exact for any rate table with a sane `tiny_amount`
/// granularity (spec requires only that inverse queries reproduce a forward pair,
/// not that they invert an arbitrary real number).
fn inverse(
    credit: &Amount,
    side: &ConversionSide,
    debit_currency: &str,
    credit_currency: &str,
) -> Result<(Amount, Amount), BankError> {
    let credit_units = to_units(credit);
    let fee_units = to_units(&side.fee);
    let target_rounded = credit_units
        .checked_add(fee_units)
        .ok_or(BankError::BadConversion)?;

    let naive_debit_units = target_rounded
        .checked_mul(side.ratio_den as u128)
        .ok_or(BankError::BadConversion)?
        / side.ratio_num as u128;

    let tiny_units = to_units(&side.tiny_amount).max(1);
    const SEARCH_RADIUS: i128 = 64;
    for step in -SEARCH_RADIUS..=SEARCH_RADIUS {
        let candidate_units = (naive_debit_units as i128 + step * tiny_units as i128).max(0) as u128;
        let candidate_debit = from_units(candidate_units, debit_currency).map_err(BankError::from)?;
        if let Ok(candidate_credit) = forward(&candidate_debit, side, credit_currency) {
            if candidate_credit == *credit {
                return Ok((candidate_debit, candidate_credit));
            }
        }
    }
    Err(BankError::BadConversion)
}

/// Forward cashout: regional currency debit -> fiat currency credit.
pub fn convert_cashout(
    config: &ConversionConfig,
    debit: &Amount,
    fiat_currency: &str,
) -> Result<Amount, BankError> {
    forward(debit, &config.cashout, fiat_currency)
}

/// Forward cashin: fiat currency debit -> regional currency credit.
pub fn convert_cashin(
    config: &ConversionConfig,
    debit: &Amount,
    regional_currency: &str,
) -> Result<Amount, BankError> {
    forward(debit, &config.cashin, regional_currency)
}

pub fn inverse_cashout(
    config: &ConversionConfig,
    credit: &Amount,
    regional_currency: &str,
    fiat_currency: &str,
) -> Result<(Amount, Amount), BankError> {
    inverse(credit, &config.cashout, regional_currency, fiat_currency)
}

pub fn inverse_cashin(
    config: &ConversionConfig,
    credit: &Amount,
    fiat_currency: &str,
    regional_currency: &str,
) -> Result<(Amount, Amount), BankError> {
    inverse(credit, &config.cashin, fiat_currency, regional_currency)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(ratio_num: u64, ratio_den: u64, fee: u64, tiny: u64, mode: RoundingMode) -> ConversionSide {
        ConversionSide {
            ratio_num,
            ratio_den,
            fee: Amount::new(0, fee as u32, "EUR").unwrap(),
            tiny_amount: Amount::new(0, tiny as u32, "EUR").unwrap(),
            rounding_mode: mode,
            min_amount: Amount::zero("EUR"),
        }
    }

    #[test]
    fn forward_cashout_applies_ratio_and_fee() {
        let s = side(1, 1, 1_000_000, 1_000_000, RoundingMode::Zero);
        let debit = Amount::new(1, 0, "EUR").unwrap();
        let credit = forward(&debit, &s, "EUR").unwrap();
        assert_eq!(credit, Amount::new(0, 99_000_000, "EUR").unwrap());
    }

    #[test]
    fn forward_rejects_below_min_amount() {
        let mut s = side(1, 1, 0, 1, RoundingMode::Zero);
        s.min_amount = Amount::new(1, 0, "EUR").unwrap();
        let debit = Amount::new(0, 50_000_000, "EUR").unwrap();
        assert!(forward(&debit, &s, "EUR").is_err());
    }

    #[test]
    fn nearest_rounding_resolves_tie_to_even() {
        let tiny = 1_000_000u128;
        assert_eq!(round_nearest(2, 500_000, tiny), 2 * tiny);
        assert_eq!(round_nearest(3, 500_000, tiny), 4 * tiny);
    }

    #[test]
    fn zero_rounding_truncates() {
        assert_eq!(round_to_tiny(2_500_000, 1_000_000, RoundingMode::Zero), 2_000_000);
    }

    #[test]
    fn up_rounding_rounds_away_from_zero() {
        assert_eq!(round_to_tiny(2_000_001, 1_000_000, RoundingMode::Up), 3_000_000);
    }

    #[test]
    fn inverse_reproduces_forward_pair() {
        let s = side(1, 2, 500_000, 1_000_000, RoundingMode::Zero);
        let debit = Amount::new(2, 0, "EUR").unwrap();
        let credit = forward(&debit, &s, "EUR").unwrap();
        let (found_debit, found_credit) = inverse(&credit, &s, "EUR", "EUR").unwrap();
        assert_eq!(found_credit, credit);
        assert_eq!(found_debit, debit);
    }
}
