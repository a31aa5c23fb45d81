//! Fixed-point monetary value: `(value, frac, currency)` with an eight-digit
//! fractional unit (10^-8). See spec §3/§4.1.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the integer part, matching the spec invariant `value <= 2^52`.
pub const MAX_VALUE: u64 = 1u64 << 52;

/// Fractional unit denominator: eight decimal digits.
pub const FRACTION_BASE: u32 = 100_000_000;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum AmountError {
    #[error("amount value {0} exceeds the maximum representable value")]
    ValueOverflow(u64),
    #[error("amount fraction {0} is out of range [0, 10^8)")]
    FractionOutOfRange(u32),
    #[error("malformed amount string: {0}")]
    Malformed(String),
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
    #[error("amount arithmetic overflow")]
    Overflow,
    #[error("amount arithmetic underflow")]
    Underflow,
}

/// Caps how many fractional digits a parsed string is allowed to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FracDigits {
    Eight,
    Two,
}

impl FracDigits {
    fn digits(self) -> usize {
        match self {
            FracDigits::Eight => 8,
            FracDigits::Two => 2,
        }
    }
}

/// A fixed-point monetary value tagged with its currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: u64,
    pub frac: u32,
    pub currency: String,
}

impl Amount {
    pub fn new(value: u64, frac: u32, currency: impl Into<String>) -> Result<Self, AmountError> {
        if value > MAX_VALUE {
            return Err(AmountError::ValueOverflow(value));
        }
        if frac >= FRACTION_BASE {
            return Err(AmountError::FractionOutOfRange(frac));
        }
        Ok(Self {
            value,
            frac,
            currency: currency.into(),
        })
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self {
            value: 0,
            frac: 0,
            currency: currency.into(),
        }
    }

    /// Parses `"CUR:V[.F]"`. `F` is left-padded to eight digits; `max_frac_digits`
    /// rejects strings carrying more precision than allowed (e.g. `FracDigits::Two`
    /// treats `"0.1"` as ten cents and rejects `"0.123"`).
    pub fn parse(s: &str, max_frac_digits: FracDigits) -> Result<Self, AmountError> {
        let (currency, rest) = s
            .split_once(':')
            .ok_or_else(|| AmountError::Malformed(s.to_string()))?;
        if currency.is_empty() {
            return Err(AmountError::Malformed(s.to_string()));
        }

        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };

        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if frac_part.len() > max_frac_digits.digits() {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if frac_part.len() > 8 {
            return Err(AmountError::Malformed(s.to_string()));
        }

        let value: u64 = int_part
            .parse()
            .map_err(|_| AmountError::Malformed(s.to_string()))?;

        let mut padded = frac_part.to_string();
        while padded.len() < 8 {
            padded.push('0');
        }
        let frac: u32 = padded
            .parse()
            .map_err(|_| AmountError::Malformed(s.to_string()))?;

        Amount::new(value, frac, currency)
    }

    /// Formats back to `"CUR:V.F"` canonical wire form (always eight fractional
    /// digits, matching the parsing invariant).
    pub fn to_wire_string(&self) -> String {
        format!("{}:{}.{:08}", self.currency, self.value, self.frac)
    }

    fn assert_same_currency(&self, other: &Amount) -> Result<(), AmountError> {
        if self.currency != other.currency {
            return Err(AmountError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.assert_same_currency(other)?;
        let mut frac = self.frac + other.frac;
        let mut carry = 0u64;
        if frac >= FRACTION_BASE {
            frac -= FRACTION_BASE;
            carry = 1;
        }
        let value = self
            .value
            .checked_add(other.value)
            .and_then(|v| v.checked_add(carry))
            .ok_or(AmountError::Overflow)?;
        if value > MAX_VALUE {
            return Err(AmountError::Overflow);
        }
        Ok(Amount {
            value,
            frac,
            currency: self.currency.clone(),
        })
    }

    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.assert_same_currency(other)?;
        if self < other {
            return Err(AmountError::Underflow);
        }
        let (value, frac) = if self.frac >= other.frac {
            (self.value - other.value, self.frac - other.frac)
        } else {
            (
                self.value - other.value - 1,
                self.frac + FRACTION_BASE - other.frac,
            )
        };
        Ok(Amount {
            value,
            frac,
            currency: self.currency.clone(),
        })
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0 && self.frac == 0
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        Some((self.value, self.frac).cmp(&(other.value, other.frac)))
    }
}

/// A currency-tagged signed balance, used by the debit-cap check (§3 "Balance state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

/// `is_balance_enough` from §8 seed scenarios: true iff the signed balance after
/// subtracting `due` would not fall below `-max_debit`.
pub fn is_balance_enough(
    balance: &Amount,
    due: &Amount,
    has_debt: bool,
    max_debit: &Amount,
) -> Result<bool, AmountError> {
    // Signed balance today, expressed as (sign, magnitude).
    let (sign, magnitude) = if has_debt {
        (Sign::Negative, balance.clone())
    } else {
        (Sign::Positive, balance.clone())
    };

    // Compute signed balance after debiting `due`.
    let (new_sign, new_magnitude) = match sign {
        Sign::Positive => {
            if &magnitude >= due {
                (Sign::Positive, magnitude.checked_sub(due)?)
            } else {
                (Sign::Negative, due.checked_sub(&magnitude)?)
            }
        }
        Sign::Negative => (Sign::Negative, magnitude.checked_add(due)?),
    };

    Ok(match new_sign {
        Sign::Positive => true,
        Sign::Negative => new_magnitude <= *max_debit,
    })
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seed_scenarios() {
        assert_eq!(
            Amount::parse("EUR:1", FracDigits::Eight).unwrap(),
            Amount::new(1, 0, "EUR").unwrap()
        );
        assert_eq!(
            Amount::parse("EUR:1.00", FracDigits::Eight).unwrap(),
            Amount::new(1, 0, "EUR").unwrap()
        );
        assert_eq!(
            Amount::parse("EUR:1.01", FracDigits::Eight).unwrap(),
            Amount::new(1, 1_000_000, "EUR").unwrap()
        );
        assert_eq!(
            Amount::parse("EUR:0.00000001", FracDigits::Eight).unwrap(),
            Amount::new(0, 1, "EUR").unwrap()
        );
        assert_eq!(
            Amount::parse("EUR:0.1", FracDigits::Two).unwrap(),
            Amount::new(0, 10_000_000, "EUR").unwrap()
        );
    }

    #[test]
    fn rejects_too_many_frac_digits() {
        assert!(Amount::parse("EUR:0.123", FracDigits::Two).is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Amount::parse("EUR", FracDigits::Eight).is_err());
        assert!(Amount::parse(":1.0", FracDigits::Eight).is_err());
        assert!(Amount::parse("EUR:1.0a", FracDigits::Eight).is_err());
    }

    #[test]
    fn checked_add_carries() {
        let a = Amount::new(1, 90_000_000, "EUR").unwrap();
        let b = Amount::new(0, 20_000_000, "EUR").unwrap();
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum, Amount::new(2, 10_000_000, "EUR").unwrap());
    }

    #[test]
    fn checked_sub_borrows() {
        let a = Amount::new(2, 10_000_000, "EUR").unwrap();
        let b = Amount::new(0, 20_000_000, "EUR").unwrap();
        let diff = a.checked_sub(&b).unwrap();
        assert_eq!(diff, Amount::new(1, 90_000_000, "EUR").unwrap());
    }

    #[test]
    fn currency_mismatch_is_an_error() {
        let a = Amount::new(1, 0, "EUR").unwrap();
        let b = Amount::new(1, 0, "USD").unwrap();
        assert!(a.checked_add(&b).is_err());
    }

    #[test]
    fn balance_enough_seed_scenarios() {
        let eur = |v: u64, f: u32| Amount::new(v, f, "EUR").unwrap();
        assert!(is_balance_enough(&eur(10, 0), &eur(8, 0), false, &eur(100, 0)).unwrap());
        assert!(is_balance_enough(&eur(10, 0), &eur(80, 0), false, &eur(100, 0)).unwrap());
        assert!(!is_balance_enough(&eur(10, 0), &eur(80, 0), true, &eur(50, 0)).unwrap());
        assert!(!is_balance_enough(&eur(0, 0), &eur(0, 2), false, &eur(0, 1)).unwrap());
    }

    #[test]
    fn value_overflow_rejected() {
        assert!(Amount::new(MAX_VALUE + 1, 0, "EUR").is_err());
    }
}
