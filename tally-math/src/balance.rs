//! Multi-commodity balance management

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::amount::Amount;

/// Result type for balance operations
pub type BalanceResult<T> = Result<T, BalanceError>;

/// Errors that can occur when collapsing balances
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalanceError {
    /// Cannot convert an empty balance to an amount
    #[error("Cannot convert an empty balance to an amount")]
    EmptyToAmount,
    /// Cannot convert a multi-commodity balance to an amount
    #[error("Cannot convert a balance of {0} commodities to a single amount")]
    MultipleCommodities(usize),
}

/// A sum of amounts in possibly several commodities, keyed by symbol.
///
/// Adding two amounts whose commodities differ yields a balance; a balance
/// holding a single commodity can be simplified back to an amount.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Balance {
    amounts: BTreeMap<String, Amount>,
}

impl Balance {
    /// An empty (zero) balance.
    pub fn new() -> Self {
        Self::default()
    }

    /// A balance holding a single amount.
    pub fn from_amount(amount: Amount) -> Self {
        let mut balance = Balance::new();
        balance.add_amount(&amount);
        balance
    }

    /// Add an amount into the matching commodity bucket.
    pub fn add_amount(&mut self, amount: &Amount) {
        let entry = self
            .amounts
            .entry(amount.symbol().to_string())
            .or_insert_with(|| Amount::new(rust_decimal::Decimal::ZERO, amount.commodity().cloned()));
        // Same symbol by construction, so this cannot mismatch.
        let _ = entry.add_amount(amount);
    }

    /// Subtract an amount from the matching commodity bucket.
    pub fn sub_amount(&mut self, amount: &Amount) {
        self.add_amount(&amount.negated());
    }

    /// Add another balance bucket-wise.
    pub fn add_balance(&mut self, other: &Balance) {
        for amount in other.amounts() {
            self.add_amount(amount);
        }
    }

    /// Subtract another balance bucket-wise.
    pub fn sub_balance(&mut self, other: &Balance) {
        for amount in other.amounts() {
            self.sub_amount(amount);
        }
    }

    /// Negated copy.
    pub fn negated(&self) -> Balance {
        Balance {
            amounts: self
                .amounts
                .iter()
                .map(|(symbol, amount)| (symbol.clone(), amount.negated()))
                .collect(),
        }
    }

    /// True when every bucket is zero (or the balance is empty).
    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(|a| a.is_zero())
    }

    /// True when no bucket exists at all.
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Iterate the bucket amounts in symbol order.
    pub fn amounts(&self) -> impl Iterator<Item = &Amount> {
        self.amounts.values()
    }

    /// Number of distinct commodities.
    pub fn commodity_count(&self) -> usize {
        self.amounts.len()
    }

    /// The single amount, when only one commodity is present.
    pub fn single_amount(&self) -> Option<&Amount> {
        if self.amounts.len() == 1 {
            self.amounts.values().next()
        } else {
            None
        }
    }

    /// Collapse to a single amount; only a one-commodity balance can.
    pub fn to_amount(&self) -> BalanceResult<Amount> {
        match self.amounts.len() {
            0 => Err(BalanceError::EmptyToAmount),
            1 => Ok(self.amounts.values().next().cloned().unwrap_or_default()),
            n => Err(BalanceError::MultipleCommodities(n)),
        }
    }

    /// Every bucket rounded to its display precision.
    pub fn truncated(&self) -> Balance {
        Balance {
            amounts: self
                .amounts
                .iter()
                .map(|(symbol, amount)| (symbol.clone(), amount.truncated()))
                .collect(),
        }
    }

    /// Collapse to a single commodity-less amount by summing quantities,
    /// for aggregation across commodities.
    pub fn stripped(&self) -> Amount {
        let mut total = Amount::zero();
        for amount in self.amounts.values() {
            // Stripped amounts are commodity-less, so addition cannot fail.
            let _ = total.add_amount(&amount.stripped());
        }
        total
    }

    /// Market value at `date`: each bucket repriced where a price exists,
    /// carried unchanged where none does.
    pub fn value_at(&self, date: NaiveDate) -> Balance {
        let mut result = Balance::new();
        for amount in self.amounts.values() {
            match amount.value_at(date) {
                Some(valued) => result.add_amount(&valued),
                None => result.add_amount(amount),
            }
        }
        result
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amounts.is_empty() {
            return write!(f, "0");
        }
        for (i, amount) in self.amounts.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", amount)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_commodities_form_balance() {
        let mut balance = Balance::new();
        balance.add_amount(&Amount::parse("10.00 USD").unwrap());
        balance.add_amount(&Amount::parse("5.00 EUR").unwrap());
        assert_eq!(balance.commodity_count(), 2);
        assert!(!balance.is_zero());
        assert_eq!(balance.to_string(), "5.00 EUR, 10.00 USD");
    }

    #[test]
    fn test_same_commodity_accumulates() {
        let mut balance = Balance::new();
        balance.add_amount(&Amount::parse("10.00 USD").unwrap());
        balance.sub_amount(&Amount::parse("10.00 USD").unwrap());
        assert!(balance.is_zero());
        assert_eq!(balance.commodity_count(), 1);
    }

    #[test]
    fn test_single_amount() {
        let mut balance = Balance::new();
        balance.add_amount(&Amount::parse("3.00 USD").unwrap());
        assert_eq!(balance.single_amount().unwrap().symbol(), "USD");
        balance.add_amount(&Amount::parse("1.00 EUR").unwrap());
        assert!(balance.single_amount().is_none());
    }

    #[test]
    fn test_stripped_sums_quantities() {
        let mut balance = Balance::new();
        balance.add_amount(&Amount::parse("10.00 USD").unwrap());
        balance.add_amount(&Amount::parse("5.00 EUR").unwrap());
        let total = balance.stripped();
        assert!(!total.has_commodity());
        assert_eq!(total.quantity(), rust_decimal::Decimal::from(15));
    }

    #[test]
    fn test_empty_balance_displays_zero() {
        assert_eq!(Balance::new().to_string(), "0");
    }

    #[test]
    fn test_to_amount_needs_one_commodity() {
        let mut balance = Balance::new();
        assert_eq!(balance.to_amount(), Err(BalanceError::EmptyToAmount));

        balance.add_amount(&Amount::parse("3.00 USD").unwrap());
        assert_eq!(balance.to_amount().unwrap().symbol(), "USD");

        balance.add_amount(&Amount::parse("1.00 EUR").unwrap());
        assert_eq!(balance.to_amount(), Err(BalanceError::MultipleCommodities(2)));
    }
}
