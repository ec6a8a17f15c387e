//! Amount arithmetic with commodity support

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::commodity::{Commodity, CommodityPool, CommodityRef};

/// Result type for amount operations
pub type AmountResult<T> = Result<T, AmountError>;

/// Errors that can occur during amount arithmetic
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    /// Two amounts of different commodities met in an operation that
    /// requires a single commodity
    #[error("Commodity mismatch: '{left}' vs '{right}'")]
    CommodityMismatch {
        /// Left-hand commodity symbol
        left: String,
        /// Right-hand commodity symbol
        right: String,
    },
    /// Division by a zero amount
    #[error("Division by zero")]
    DivisionByZero,
    /// Malformed amount string
    #[error("Invalid amount: {0}")]
    Parse(String),
}

/// A commodity-tagged quantity: the atom of double-entry arithmetic.
///
/// An amount without a commodity behaves as a bare number; it combines
/// freely with any commoditized amount, adopting the other's commodity.
#[derive(Debug, Clone)]
pub struct Amount {
    quantity: Decimal,
    commodity: Option<CommodityRef>,
}

impl Amount {
    /// A commodity-less zero.
    pub fn zero() -> Self {
        Amount { quantity: Decimal::ZERO, commodity: None }
    }

    /// Create an amount from a quantity and optional commodity.
    pub fn new(quantity: Decimal, commodity: Option<CommodityRef>) -> Self {
        Amount { quantity, commodity }
    }

    /// A commodity-less integer amount.
    pub fn from_i64(value: i64) -> Self {
        Amount { quantity: Decimal::from(value), commodity: None }
    }

    /// Parse an amount of the form `"-12.34 USD"`, `"USD 12.34"` or a bare
    /// number, creating a free-standing commodity for the symbol.
    pub fn parse(input: &str) -> AmountResult<Self> {
        Self::parse_parts(input, None)
    }

    /// Parse an amount, interning its commodity in `pool`.
    pub fn parse_in(input: &str, pool: &mut CommodityPool) -> AmountResult<Self> {
        Self::parse_parts(input, Some(pool))
    }

    fn parse_parts(input: &str, pool: Option<&mut CommodityPool>) -> AmountResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Parse("empty string".to_string()));
        }

        let is_symbol_char =
            |c: char| !c.is_ascii_digit() && !c.is_whitespace() && !matches!(c, '-' | '+' | '.');

        // Either "SYM 123" or "123 SYM"; the symbol may abut the number.
        let (number, symbol) = if trimmed.chars().next().map(is_symbol_char).unwrap_or(false) {
            let split = trimmed.find(|c: char| !is_symbol_char(c)).unwrap_or(trimmed.len());
            (trimmed[split..].trim(), &trimmed[..split])
        } else {
            let split = trimmed
                .find(|c: char| is_symbol_char(c))
                .unwrap_or(trimmed.len());
            (trimmed[..split].trim(), trimmed[split..].trim_start())
        };

        let quantity: Decimal = number
            .parse()
            .map_err(|_| AmountError::Parse(format!("'{}' is not a number", number)))?;

        let commodity = if symbol.is_empty() {
            None
        } else {
            let precision = quantity.scale();
            Some(match pool {
                Some(pool) => pool.find_or_create(symbol, precision),
                None => Commodity::new(symbol, precision),
            })
        };

        Ok(Amount { quantity, commodity })
    }

    /// The numeric quantity.
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// The commodity, if any.
    pub fn commodity(&self) -> Option<&CommodityRef> {
        self.commodity.as_ref()
    }

    /// Whether this amount carries a commodity.
    pub fn has_commodity(&self) -> bool {
        self.commodity.is_some()
    }

    /// The commodity symbol, or `""` for a bare number.
    pub fn symbol(&self) -> &str {
        self.commodity.as_ref().map(|c| c.symbol()).unwrap_or("")
    }

    /// True when the quantity is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Sign of the quantity: -1, 0 or 1.
    pub fn sign(&self) -> i32 {
        if self.quantity.is_zero() {
            0
        } else if self.quantity.is_sign_negative() {
            -1
        } else {
            1
        }
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Amount { quantity: self.quantity.abs(), commodity: self.commodity.clone() }
    }

    /// Negated copy.
    pub fn negated(&self) -> Self {
        Amount { quantity: -self.quantity, commodity: self.commodity.clone() }
    }

    /// Negate in place.
    pub fn in_place_negate(&mut self) {
        self.quantity = -self.quantity;
    }

    /// Decimal places used when rendering: the commodity's precision, or
    /// the quantity's own scale for bare numbers.
    pub fn display_precision(&self) -> u32 {
        match &self.commodity {
            Some(c) => c.precision(),
            None => self.quantity.scale(),
        }
    }

    /// Rounded to the display precision (half away from zero).
    pub fn truncated(&self) -> Self {
        let precision = self.display_precision();
        Amount {
            quantity: self
                .quantity
                .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero),
            commodity: self.commodity.clone(),
        }
    }

    /// Copy with the commodity removed, for cross-commodity aggregation.
    pub fn stripped(&self) -> Self {
        Amount { quantity: self.quantity, commodity: None }
    }

    fn check_commodity(&self, other: &Amount) -> AmountResult<()> {
        match (&self.commodity, &other.commodity) {
            (Some(a), Some(b)) if a.symbol() != b.symbol() => {
                Err(AmountError::CommodityMismatch {
                    left: a.symbol().to_string(),
                    right: b.symbol().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn merged_commodity(&self, other: &Amount) -> Option<CommodityRef> {
        self.commodity.clone().or_else(|| other.commodity.clone())
    }

    /// Add another amount in place. Commodities must agree (a bare number
    /// adopts the other side's commodity).
    pub fn add_amount(&mut self, other: &Amount) -> AmountResult<()> {
        self.check_commodity(other)?;
        self.commodity = self.merged_commodity(other);
        self.quantity += other.quantity;
        Ok(())
    }

    /// Subtract another amount in place.
    pub fn sub_amount(&mut self, other: &Amount) -> AmountResult<()> {
        self.check_commodity(other)?;
        self.commodity = self.merged_commodity(other);
        self.quantity -= other.quantity;
        Ok(())
    }

    /// Checked addition.
    pub fn checked_add(&self, other: &Amount) -> AmountResult<Amount> {
        let mut result = self.clone();
        result.add_amount(other)?;
        Ok(result)
    }

    /// Checked subtraction.
    pub fn checked_sub(&self, other: &Amount) -> AmountResult<Amount> {
        let mut result = self.clone();
        result.sub_amount(other)?;
        Ok(result)
    }

    /// Multiply by another amount. The product keeps the left commodity
    /// (or the right one when the left is bare).
    pub fn multiply(&self, other: &Amount) -> Amount {
        Amount {
            quantity: self.quantity * other.quantity,
            commodity: self.merged_commodity(other),
        }
    }

    /// Divide by another amount. Dividing by an amount of the same
    /// commodity yields a bare ratio; a bare divisor scales in place.
    pub fn divide(&self, other: &Amount) -> AmountResult<Amount> {
        if other.quantity.is_zero() {
            return Err(AmountError::DivisionByZero);
        }
        match &other.commodity {
            None => Ok(Amount {
                quantity: self.quantity / other.quantity,
                commodity: self.commodity.clone(),
            }),
            Some(_) => {
                self.check_commodity(other)?;
                Ok(Amount { quantity: self.quantity / other.quantity, commodity: None })
            }
        }
    }

    /// Compare against another amount of the same commodity.
    pub fn compare(&self, other: &Amount) -> AmountResult<Ordering> {
        self.check_commodity(other)?;
        Ok(self.quantity.cmp(&other.quantity))
    }

    /// Market value at `date`: the latest recorded price at or before the
    /// date, scaled by this quantity. `None` if the commodity has no price
    /// then.
    pub fn value_at(&self, date: chrono::NaiveDate) -> Option<Amount> {
        let commodity = self.commodity.as_ref()?;
        let price = commodity.value_at(date)?;
        Some(Amount {
            quantity: self.quantity * price.quantity(),
            commodity: price.commodity().cloned(),
        })
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::zero()
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.symbol() == other.symbol() && self.quantity == other.quantity
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.display_precision() as usize;
        match &self.commodity {
            Some(c) => write!(f, "{:.*} {}", precision, self.quantity, c.symbol()),
            None => write!(f, "{:.*}", precision, self.quantity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_number_then_symbol() {
        let a = Amount::parse("10.50 USD").unwrap();
        assert_eq!(a.quantity(), Decimal::from_str("10.50").unwrap());
        assert_eq!(a.symbol(), "USD");
        assert_eq!(a.display_precision(), 2);
    }

    #[test]
    fn test_parse_symbol_then_number() {
        let a = Amount::parse("$ -4.25").unwrap();
        assert_eq!(a.symbol(), "$");
        assert_eq!(a.sign(), -1);
    }

    #[test]
    fn test_parse_bare_number() {
        let a = Amount::parse("42").unwrap();
        assert!(!a.has_commodity());
        assert_eq!(a.quantity(), Decimal::from(42));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("USD").is_err());
    }

    #[test]
    fn test_add_same_commodity() {
        let a = Amount::parse("10.00 USD").unwrap();
        let b = Amount::parse("2.50 USD").unwrap();
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.quantity(), Decimal::from_str("12.50").unwrap());
        assert_eq!(sum.symbol(), "USD");
    }

    #[test]
    fn test_add_mismatched_commodities_fails() {
        let a = Amount::parse("10.00 USD").unwrap();
        let b = Amount::parse("2.50 EUR").unwrap();
        assert!(matches!(
            a.checked_add(&b),
            Err(AmountError::CommodityMismatch { .. })
        ));
    }

    #[test]
    fn test_bare_number_adopts_commodity() {
        let a = Amount::from_i64(3);
        let b = Amount::parse("2.00 USD").unwrap();
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.symbol(), "USD");
        assert_eq!(sum.quantity(), Decimal::from(5));
    }

    #[test]
    fn test_divide_same_commodity_strips() {
        let a = Amount::parse("10.00 USD").unwrap();
        let b = Amount::parse("4.00 USD").unwrap();
        let q = a.divide(&b).unwrap();
        assert!(!q.has_commodity());
        assert_eq!(q.quantity(), Decimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_divide_by_zero() {
        let a = Amount::parse("10.00 USD").unwrap();
        assert!(matches!(a.divide(&Amount::zero()), Err(AmountError::DivisionByZero)));
    }

    #[test]
    fn test_display_uses_commodity_precision() {
        let a = Amount::parse("10.5 USD").unwrap();
        let b = Amount::parse("0.25 USD").unwrap();
        // Parsing 0.25 widened the shared-symbol precision only for the
        // free-standing commodity of `b`; `a` has its own.
        assert_eq!(a.to_string(), "10.5 USD");
        assert_eq!(b.to_string(), "0.25 USD");
    }

    #[test]
    fn test_truncated_rounds_half_away_from_zero() {
        let mut pool = CommodityPool::new();
        let a = Amount::parse_in("10.00 USD", &mut pool).unwrap();
        let third = a.divide(&Amount::from_i64(3)).unwrap();
        assert_eq!(third.truncated().to_string(), "3.33 USD");
    }

    #[test]
    fn test_negate_and_abs() {
        let a = Amount::parse("-7.00 USD").unwrap();
        assert_eq!(a.abs().sign(), 1);
        assert_eq!(a.negated().sign(), 1);
        let mut b = a.clone();
        b.in_place_negate();
        assert_eq!(b.sign(), 1);
    }
}
