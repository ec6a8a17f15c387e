//! Commodity definitions, the commodity pool, and price history

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use chrono::NaiveDate;

use crate::amount::Amount;

/// Shared commodity reference. The reporting core is single-threaded by
/// design, so commodities are reference-counted rather than atomically
/// shared.
pub type CommodityRef = Rc<Commodity>;

/// A unit of measure attached to an amount: a currency, a share, etc.
///
/// Carries the display precision inferred from parsed amounts and the
/// price history consulted by market valuation (`value_at`).
pub struct Commodity {
    symbol: String,
    precision: Cell<u32>,
    history: RefCell<BTreeMap<NaiveDate, Amount>>,
}

impl Commodity {
    /// Create a new commodity with the given symbol and display precision.
    pub fn new(symbol: impl Into<String>, precision: u32) -> CommodityRef {
        Rc::new(Commodity {
            symbol: symbol.into(),
            precision: Cell::new(precision),
            history: RefCell::new(BTreeMap::new()),
        })
    }

    /// The commodity's symbol, e.g. `"USD"`.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Display precision in decimal places.
    pub fn precision(&self) -> u32 {
        self.precision.get()
    }

    /// Widen the display precision. Parsing an amount with more decimal
    /// places than previously seen raises the commodity's precision; it
    /// never shrinks.
    pub fn widen_precision(&self, precision: u32) {
        if precision > self.precision.get() {
            self.precision.set(precision);
        }
    }

    /// Record a price for this commodity, expressed in another commodity.
    pub fn add_price(&self, date: NaiveDate, price: Amount) {
        self.history.borrow_mut().insert(date, price);
    }

    /// The most recent price at or before `date`, if any.
    pub fn value_at(&self, date: NaiveDate) -> Option<Amount> {
        self.history.borrow().range(..=date).next_back().map(|(_, price)| price.clone())
    }

    /// Whether any price has been recorded for this commodity.
    pub fn has_prices(&self) -> bool {
        !self.history.borrow().is_empty()
    }
}

impl PartialEq for Commodity {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl Eq for Commodity {}

impl fmt::Debug for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commodity")
            .field("symbol", &self.symbol)
            .field("precision", &self.precision.get())
            .finish()
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Registry of commodities keyed by symbol.
///
/// The journal owns one pool; amounts parsed against the pool share a
/// single `Commodity` per symbol so precision widening and price lookups
/// are seen everywhere.
#[derive(Debug, Default)]
pub struct CommodityPool {
    commodities: HashMap<String, CommodityRef>,
}

impl CommodityPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a commodity by symbol.
    pub fn find(&self, symbol: &str) -> Option<CommodityRef> {
        self.commodities.get(symbol).cloned()
    }

    /// Look up a commodity, creating it with the given precision if absent.
    /// An existing commodity has its precision widened to `precision`.
    pub fn find_or_create(&mut self, symbol: &str, precision: u32) -> CommodityRef {
        if let Some(commodity) = self.commodities.get(symbol) {
            commodity.widen_precision(precision);
            return commodity.clone();
        }
        let commodity = Commodity::new(symbol, precision);
        self.commodities.insert(symbol.to_string(), commodity.clone());
        commodity
    }

    /// Number of registered commodities.
    pub fn len(&self) -> usize {
        self.commodities.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.commodities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_pool_dedup() {
        let mut pool = CommodityPool::new();
        let a = pool.find_or_create("USD", 2);
        let b = pool.find_or_create("USD", 2);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_precision_widens() {
        let mut pool = CommodityPool::new();
        let usd = pool.find_or_create("USD", 2);
        pool.find_or_create("USD", 4);
        assert_eq!(usd.precision(), 4);
        pool.find_or_create("USD", 1);
        assert_eq!(usd.precision(), 4);
    }

    #[test]
    fn test_price_lookup_latest_at_or_before() {
        let mut pool = CommodityPool::new();
        let eur = pool.find_or_create("EUR", 2);
        let usd = pool.find_or_create("USD", 2);
        eur.add_price(
            date(2024, 1, 1),
            Amount::new(Decimal::from_str("1.10").unwrap(), Some(usd.clone())),
        );
        eur.add_price(
            date(2024, 6, 1),
            Amount::new(Decimal::from_str("1.20").unwrap(), Some(usd.clone())),
        );

        assert!(eur.value_at(date(2023, 12, 31)).is_none());
        let p = eur.value_at(date(2024, 3, 15)).unwrap();
        assert_eq!(p.quantity(), Decimal::from_str("1.10").unwrap());
        let p = eur.value_at(date(2024, 6, 1)).unwrap();
        assert_eq!(p.quantity(), Decimal::from_str("1.20").unwrap());
    }
}
