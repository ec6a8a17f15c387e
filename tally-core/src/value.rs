//! The polymorphic value kind produced by expression evaluation
//!
//! Arithmetic is dispatched pairwise over the tags with a coercion matrix:
//! integers widen to amounts, an amount combined with a balance yields a
//! balance, and adding amounts of mismatched commodities promotes the
//! result to a balance. Division by zero, cross-type coercion failures and
//! comparisons between incompatible kinds are errors.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use tally_math::{Amount, AmountError, Balance, BalanceError};

/// Result type for value arithmetic
pub type ValueResult<T = Value> = Result<T, ValueError>;

/// Errors from value arithmetic and comparison
#[derive(Debug, Clone, PartialEq)]
pub enum ValueError {
    /// The two operand kinds cannot be combined by this operation
    TypeMismatch {
        /// Operation name for the message
        operation: &'static str,
        /// Left operand kind
        left: &'static str,
        /// Right operand kind
        right: &'static str,
    },
    /// Division by a zero value
    DivisionByZero,
    /// Underlying amount arithmetic failure
    Amount(AmountError),
    /// Underlying balance conversion failure
    Balance(BalanceError),
    /// Malformed mask pattern
    BadMask(String),
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::TypeMismatch { operation, left, right } => {
                write!(f, "Cannot {} {} and {}", operation, left, right)
            }
            ValueError::DivisionByZero => write!(f, "Division by zero"),
            ValueError::Amount(err) => write!(f, "{}", err),
            ValueError::Balance(err) => write!(f, "{}", err),
            ValueError::BadMask(msg) => write!(f, "Invalid mask: {}", msg),
        }
    }
}

impl Error for ValueError {}

impl From<AmountError> for ValueError {
    fn from(err: AmountError) -> Self {
        match err {
            AmountError::DivisionByZero => ValueError::DivisionByZero,
            other => ValueError::Amount(other),
        }
    }
}

impl From<BalanceError> for ValueError {
    fn from(err: BalanceError) -> Self {
        ValueError::Balance(err)
    }
}

/// A compiled pattern literal, compared by its source text.
#[derive(Debug, Clone)]
pub struct Mask {
    pattern: String,
    regex: Regex,
}

impl Mask {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> ValueResult<Mask> {
        let regex = Regex::new(pattern).map_err(|e| ValueError::BadMask(e.to_string()))?;
        Ok(Mask { pattern: pattern.to_string(), regex })
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Test a string against the pattern.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Mask {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// A tagged union over every kind an expression can produce.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absence of a value; arithmetic identity
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Machine integer
    Int(i64),
    /// Scalar in one commodity
    Amount(Amount),
    /// Sum over several commodities
    Balance(Balance),
    /// Calendar date
    Date(NaiveDate),
    /// Date and time
    DateTime(NaiveDateTime),
    /// Text
    Str(String),
    /// Sequence of values
    Seq(Vec<Value>),
    /// Compiled pattern
    Mask(Mask),
}

impl Value {
    /// The kind name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Amount(_) => "amount",
            Value::Balance(_) => "balance",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Mask(_) => "mask",
        }
    }

    /// Truth of a value: null is false, a zero amount or balance is false,
    /// anything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Amount(a) => !a.is_zero(),
            Value::Balance(b) => !b.is_zero(),
            Value::Date(_) | Value::DateTime(_) => true,
            Value::Str(s) => !s.is_empty(),
            Value::Seq(seq) => !seq.is_empty(),
            Value::Mask(_) => true,
        }
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_error(operation: &'static str, left: &Value, right: &Value) -> ValueError {
        ValueError::TypeMismatch {
            operation,
            left: left.type_name(),
            right: right.type_name(),
        }
    }

    /// Addition with coercion. Mismatched commodities promote to a
    /// balance; null is the identity.
    pub fn add(&self, other: &Value) -> ValueResult {
        use Value::*;
        match (self, other) {
            (Null, v) => Ok(v.clone()),
            (v, Null) => Ok(v.clone()),
            (Int(a), Int(b)) => Ok(Int(a + b)),
            (Int(a), Amount(b)) => Self::add_amounts(&tally_math::Amount::from_i64(*a), b),
            (Amount(a), Int(b)) => Self::add_amounts(a, &tally_math::Amount::from_i64(*b)),
            (Amount(a), Amount(b)) => Self::add_amounts(a, b),
            (Amount(a), Balance(b)) => {
                let mut balance = b.clone();
                balance.add_amount(a);
                Ok(Balance(balance).simplified())
            }
            (Balance(a), Amount(b)) => {
                let mut balance = a.clone();
                balance.add_amount(b);
                Ok(Balance(balance).simplified())
            }
            (Balance(a), Int(b)) => {
                let mut balance = a.clone();
                balance.add_amount(&tally_math::Amount::from_i64(*b));
                Ok(Balance(balance).simplified())
            }
            (Balance(a), Balance(b)) => {
                let mut balance = a.clone();
                balance.add_balance(b);
                Ok(Balance(balance).simplified())
            }
            (Str(a), Str(b)) => Ok(Str(format!("{}{}", a, b))),
            (Seq(a), Seq(b)) => {
                let mut seq = a.clone();
                seq.extend(b.iter().cloned());
                Ok(Seq(seq))
            }
            (a, b) => Err(Self::type_error("add", a, b)),
        }
    }

    fn add_amounts(a: &Amount, b: &Amount) -> ValueResult {
        match a.checked_add(b) {
            Ok(sum) => Ok(Value::Amount(sum)),
            Err(AmountError::CommodityMismatch { .. }) => {
                let mut balance = Balance::from_amount(a.clone());
                balance.add_amount(b);
                Ok(Value::Balance(balance))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Subtraction with the same coercions as addition.
    pub fn sub(&self, other: &Value) -> ValueResult {
        match other.negated() {
            Ok(negated) => self.add(&negated),
            Err(_) => Err(Self::type_error("subtract", self, other)),
        }
    }

    /// Multiplication: integers and amounts scale amounts and balances.
    pub fn mul(&self, other: &Value) -> ValueResult {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => Ok(Null),
            (Int(a), Int(b)) => Ok(Int(a * b)),
            (Int(a), Amount(b)) => Ok(Amount(tally_math::Amount::from_i64(*a).multiply(b))),
            (Amount(a), Int(b)) => Ok(Amount(a.multiply(&tally_math::Amount::from_i64(*b)))),
            (Amount(a), Amount(b)) => Ok(Amount(a.multiply(b))),
            (Balance(a), Int(_)) | (Balance(a), Amount(_)) => {
                let scalar = match other {
                    Int(n) => tally_math::Amount::from_i64(*n),
                    Amount(x) if !x.has_commodity() => x.clone(),
                    _ => return Err(Self::type_error("multiply", self, other)),
                };
                let mut result = tally_math::Balance::new();
                for amount in a.amounts() {
                    result.add_amount(&amount.multiply(&scalar));
                }
                Ok(Balance(result))
            }
            (a, b) => Err(Self::type_error("multiply", a, b)),
        }
    }

    /// Division; requires a compatible denominator and errors on zero.
    pub fn div(&self, other: &Value) -> ValueResult {
        use Value::*;
        match (self, other) {
            (_, b) if !b.is_truthy() && matches!(b, Int(_) | Amount(_) | Balance(_)) => {
                Err(ValueError::DivisionByZero)
            }
            (Null, _) => Ok(Null),
            (Int(a), Int(b)) => Ok(Int(a / b)),
            (Int(a), Amount(b)) => {
                Ok(Amount(tally_math::Amount::from_i64(*a).divide(b)?))
            }
            (Amount(a), Int(b)) => {
                Ok(Amount(a.divide(&tally_math::Amount::from_i64(*b))?))
            }
            (Amount(a), Amount(b)) => Ok(Amount(a.divide(b)?)),
            (Balance(a), Int(_)) | (Balance(a), Amount(_)) => {
                let scalar = match other {
                    Int(n) => tally_math::Amount::from_i64(*n),
                    Amount(x) if !x.has_commodity() => x.clone(),
                    _ => return Err(Self::type_error("divide", self, other)),
                };
                let mut result = tally_math::Balance::new();
                for amount in a.amounts() {
                    result.add_amount(&amount.divide(&scalar)?);
                }
                Ok(Balance(result))
            }
            (a, b) => Err(Self::type_error("divide", a, b)),
        }
    }

    /// Arithmetic negation.
    pub fn negated(&self) -> ValueResult {
        use Value::*;
        match self {
            Null => Ok(Null),
            Int(i) => Ok(Int(-i)),
            Amount(a) => Ok(Amount(a.negated())),
            Balance(b) => Ok(Balance(b.negated())),
            other => Err(ValueError::TypeMismatch {
                operation: "negate",
                left: other.type_name(),
                right: "nothing",
            }),
        }
    }

    /// Absolute value.
    pub fn abs(&self) -> ValueResult {
        use Value::*;
        match self {
            Null => Ok(Null),
            Int(i) => Ok(Int(i.abs())),
            Amount(a) => Ok(Amount(a.abs())),
            Balance(b) => {
                let mut result = tally_math::Balance::new();
                for amount in b.amounts() {
                    result.add_amount(&amount.abs());
                }
                Ok(Balance(result))
            }
            other => Err(ValueError::TypeMismatch {
                operation: "take the absolute value of",
                left: other.type_name(),
                right: "nothing",
            }),
        }
    }

    /// Amounts and balances rounded to their display precision; other
    /// kinds pass through unchanged.
    pub fn truncated(&self) -> Value {
        match self {
            Value::Amount(a) => Value::Amount(a.truncated()),
            Value::Balance(b) => Value::Balance(b.truncated()),
            other => other.clone(),
        }
    }

    /// Remove commodities for cross-commodity aggregation.
    pub fn stripped(&self) -> ValueResult {
        use Value::*;
        match self {
            Null => Ok(Null),
            Int(i) => Ok(Int(*i)),
            Amount(a) => Ok(Amount(a.stripped())),
            Balance(b) => Ok(Amount(b.stripped())),
            other => Err(ValueError::TypeMismatch {
                operation: "strip the commodity from",
                left: other.type_name(),
                right: "nothing",
            }),
        }
    }

    /// Collapse degenerate shapes: an empty balance becomes integer zero,
    /// a one-commodity balance becomes its amount, a one-element sequence
    /// becomes its element.
    pub fn simplified(self) -> Value {
        match self {
            Value::Balance(b) if b.is_empty() => Value::Int(0),
            Value::Balance(b) => match b.single_amount() {
                Some(amount) => Value::Amount(amount.clone()),
                None => Value::Balance(b),
            },
            Value::Seq(mut seq) if seq.len() == 1 => seq.remove(0),
            other => other,
        }
    }

    /// Cast to a single amount, if the shape permits.
    pub fn to_amount(&self) -> ValueResult<Amount> {
        match self {
            Value::Null => Ok(Amount::zero()),
            Value::Bool(b) => Ok(Amount::from_i64(i64::from(*b))),
            Value::Int(i) => Ok(Amount::from_i64(*i)),
            Value::Amount(a) => Ok(a.clone()),
            Value::Balance(b) if b.is_empty() => Ok(Amount::zero()),
            Value::Balance(b) => Ok(b.to_amount()?),
            other => Err(ValueError::TypeMismatch {
                operation: "cast to an amount",
                left: other.type_name(),
                right: "nothing",
            }),
        }
    }

    /// Market value at `date`; amounts without a price pass unchanged.
    pub fn value_at(&self, date: NaiveDate) -> Value {
        match self {
            Value::Amount(a) => Value::Amount(a.value_at(date).unwrap_or_else(|| a.clone())),
            Value::Balance(b) => Value::Balance(b.value_at(date)).simplified(),
            other => other.clone(),
        }
    }

    /// Ordering between compatible kinds; anything else is an error.
    pub fn compare(&self, other: &Value) -> ValueResult<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ok(Ordering::Equal),
            (Bool(a), Bool(b)) => Ok(a.cmp(b)),
            (Int(a), Int(b)) => Ok(a.cmp(b)),
            (Int(a), Amount(b)) => Ok(tally_math::Amount::from_i64(*a).compare(b)?),
            (Amount(a), Int(b)) => Ok(a.compare(&tally_math::Amount::from_i64(*b))?),
            (Amount(a), Amount(b)) => Ok(a.compare(b)?),
            (Balance(a), Balance(b)) => {
                // Balances only order when both collapse to one commodity.
                match (a.single_amount(), b.single_amount()) {
                    (Some(x), Some(y)) => Ok(x.compare(y)?),
                    _ => Err(Self::type_error("compare", self, other)),
                }
            }
            (Balance(a), Amount(b)) => match a.single_amount() {
                Some(x) => Ok(x.compare(b)?),
                None => Err(Self::type_error("compare", self, other)),
            },
            (Amount(a), Balance(b)) => match b.single_amount() {
                Some(y) => Ok(a.compare(y)?),
                None => Err(Self::type_error("compare", self, other)),
            },
            (Date(a), Date(b)) => Ok(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Ok(a.cmp(b)),
            (Str(a), Str(b)) => Ok(a.cmp(b)),
            (a, b) => Err(Self::type_error("compare", a, b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Amount(a) => write!(f, "{}", a),
            Value::Balance(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::Str(s) => write!(f, "{}", s),
            Value::Seq(seq) => {
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Value::Mask(m) => write!(f, "/{}/", m.pattern()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(s: &str) -> Value {
        Value::Amount(Amount::parse(&format!("{} USD", s)).unwrap())
    }

    fn eur(s: &str) -> Value {
        Value::Amount(Amount::parse(&format!("{} EUR", s)).unwrap())
    }

    #[test]
    fn test_integer_widens_to_amount() {
        let sum = Value::Int(3).add(&usd("2.00")).unwrap();
        match sum {
            Value::Amount(a) => {
                assert_eq!(a.symbol(), "USD");
                assert_eq!(a.to_string(), "5.00 USD");
            }
            other => panic!("expected amount, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_commodities_promote_to_balance() {
        let sum = usd("10.00").add(&eur("5.00")).unwrap();
        match sum {
            Value::Balance(b) => assert_eq!(b.commodity_count(), 2),
            other => panic!("expected balance, got {:?}", other),
        }
    }

    #[test]
    fn test_balance_minus_amount_can_simplify() {
        let balance = usd("10.00").add(&eur("5.00")).unwrap();
        let back = balance.sub(&eur("5.00")).unwrap();
        // The EUR bucket is zero but still present, so this stays a balance.
        match back {
            Value::Balance(b) => {
                assert_eq!(b.commodity_count(), 2);
                assert!(!b.is_zero());
            }
            other => panic!("expected balance, got {:?}", other),
        }
    }

    #[test]
    fn test_null_is_additive_identity() {
        assert_eq!(Value::Null.add(&usd("1.00")).unwrap(), usd("1.00"));
        assert_eq!(usd("1.00").add(&Value::Null).unwrap(), usd("1.00"));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(usd("1.00").div(&Value::Int(0)), Err(ValueError::DivisionByZero));
    }

    #[test]
    fn test_incompatible_comparison_errors() {
        assert!(Value::Str("x".into()).compare(&Value::Int(1)).is_err());
        assert!(usd("1.00").compare(&eur("1.00")).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!usd("0.00").is_truthy());
        assert!(!Value::Balance(Balance::new()).is_truthy());
        assert!(usd("0.01").is_truthy());
        assert!(Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).is_truthy());
    }

    #[test]
    fn test_stripped_balance_sums() {
        let balance = usd("10.00").add(&eur("5.00")).unwrap();
        match balance.stripped().unwrap() {
            Value::Amount(a) => {
                assert!(!a.has_commodity());
                assert_eq!(a.quantity(), rust_decimal::Decimal::from(15));
            }
            other => panic!("expected amount, got {:?}", other),
        }
    }

    #[test]
    fn test_simplified_single_commodity_balance() {
        let mut b = Balance::new();
        b.add_amount(&Amount::parse("3.00 USD").unwrap());
        assert_eq!(Value::Balance(b).simplified(), usd("3.00"));
    }

    #[test]
    fn test_mask_matching() {
        let mask = Mask::new("Groc").unwrap();
        assert!(mask.is_match("Grocer"));
        assert!(!mask.is_match("Butcher"));
        assert!(Mask::new("[unclosed").is_err());
    }
}
