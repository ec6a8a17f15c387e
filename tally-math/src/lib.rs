//! Commodity arithmetic for the tally reporting engine
//!
//! This crate provides the numeric and temporal foundation of the reporting
//! core: amounts tagged with a commodity, multi-commodity balances, the
//! commodity pool with its price history, and the date-interval primitives
//! used for period subtotalling.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod amount;
pub mod balance;
pub mod commodity;
pub mod datetime;

pub use amount::{Amount, AmountError, AmountResult};
pub use balance::{Balance, BalanceError, BalanceResult};
pub use commodity::{Commodity, CommodityPool, CommodityRef};
pub use datetime::{
    format_date, parse_date, DateError, DateInterval, DateResult, IntervalDuration,
};

// Re-export for convenience
pub use rust_decimal::Decimal;
