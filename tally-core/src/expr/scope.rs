//! Scopes: the name-resolution chain behind expression evaluation
//!
//! A lookup walks inner to outer: positional call arguments, then the
//! bound item's fields, then user-defined symbols, then the builtins.
//! [`ReportScope`] carries the process-wide evaluation defaults; it is
//! configured when the pipeline is built and read-only afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;

use crate::account::AccountId;
use crate::expr::op::Op;
use crate::expr::{CalcError, CalcResult, Expr};
use crate::journal::Journal;
use crate::posting::PostId;
use crate::value::Value;

// Generation stamps are drawn from one process-wide counter so tables
// never share a stamp once either has been redefined.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Static named bindings: user-defined value-expression aliases.
///
/// Every mutation advances the table's generation; identifier nodes that
/// cached a resolution against an older generation re-resolve on their
/// next evaluation.
#[derive(Debug, Clone, Default)]
pub struct SymbolScope {
    aliases: HashMap<String, Expr>,
    generation: u64,
}

impl SymbolScope {
    /// An empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name to an expression, invalidating cached resolutions.
    pub fn define(&mut self, name: impl Into<String>, expr: Expr) {
        self.aliases.insert(name.into(), expr);
        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
    }

    /// Resolve a name.
    pub fn lookup(&self, name: &str) -> Option<&Expr> {
        self.aliases.get(name)
    }

    /// The stamp identifier caches are validated against.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The item an expression is currently evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRef {
    /// No item bound; projections yield neutral values
    None,
    /// A posting
    Post(PostId),
    /// An account
    Account(AccountId),
}

/// Process-wide evaluation defaults, configured at pipeline construction.
#[derive(Debug, Clone)]
pub struct ReportScope {
    /// Expression giving a posting's reported amount
    pub amount_expr: Expr,
    /// Expression giving the running total
    pub total_expr: Expr,
    /// Expression giving the amount as displayed
    pub display_amount_expr: Expr,
    /// Expression giving the total as displayed
    pub display_total_expr: Expr,
    /// Date format for item dates
    pub date_format: String,
    /// Date format for derived output such as subtotal payees
    pub output_date_format: String,
    /// The report's notion of "today"
    pub current_date: NaiveDate,
    /// Default display precision
    pub precision: u32,
    /// User-defined value-expression aliases
    pub symbols: SymbolScope,
}

impl ReportScope {
    /// Defaults: amounts report themselves, totals report the running
    /// total, and display mirrors calculation.
    pub fn new(current_date: NaiveDate) -> Self {
        ReportScope {
            amount_expr: Expr::from_op(Op::Amount, "a"),
            total_expr: Expr::from_op(Op::Total, "O"),
            display_amount_expr: Expr::from_op(Op::AmountExpr, "t"),
            display_total_expr: Expr::from_op(Op::TotalExpr, "T"),
            date_format: "%Y-%m-%d".to_string(),
            output_date_format: "%Y-%m-%d".to_string(),
            current_date,
            precision: 2,
            symbols: SymbolScope::new(),
        }
    }
}

/// Wraps a posting or account as the evaluation subject. Field accesses
/// resolve against the item; everything else delegates outward.
#[derive(Clone, Copy)]
pub struct BindScope<'a> {
    /// Report defaults
    pub report: &'a ReportScope,
    /// The journal the item lives in
    pub journal: &'a Journal,
    /// The bound item
    pub item: ItemRef,
}

impl<'a> BindScope<'a> {
    /// A scope with no bound item.
    pub fn new(report: &'a ReportScope, journal: &'a Journal) -> Self {
        BindScope { report, journal, item: ItemRef::None }
    }

    /// A scope bound to an item.
    pub fn bind(report: &'a ReportScope, journal: &'a Journal, item: ItemRef) -> Self {
        BindScope { report, journal, item }
    }

    /// The same scope rebound to a different item.
    pub fn with_item(&self, item: ItemRef) -> BindScope<'a> {
        BindScope { report: self.report, journal: self.journal, item }
    }

    /// The bound item's date: a posting's reporting date, otherwise the
    /// report's current date.
    pub fn item_date(&self) -> NaiveDate {
        match self.item {
            ItemRef::Post(post) => self.journal.post_date(post),
            _ => self.report.current_date,
        }
    }
}

/// Positional arguments made visible to a function body.
pub struct CallScope<'a, 'b> {
    /// The surrounding bound scope
    pub scope: &'b BindScope<'a>,
    args: &'b [Value],
}

impl<'a, 'b> CallScope<'a, 'b> {
    /// Wrap evaluated arguments around a scope.
    pub fn new(scope: &'b BindScope<'a>, args: &'b [Value]) -> Self {
        CallScope { scope, args }
    }

    /// The nth argument, or an error naming the function.
    pub fn arg(&self, function: &str, n: usize) -> CalcResult<&Value> {
        self.args.get(n).ok_or_else(|| CalcError::InvalidCall {
            function: function.to_string(),
            msg: format!("missing argument {}", n + 1),
        })
    }

    /// The nth argument, if present.
    pub fn opt_arg(&self, n: usize) -> Option<&Value> {
        self.args.get(n)
    }

    /// Number of arguments.
    pub fn size(&self) -> usize {
        self.args.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CalcError;
    use chrono::NaiveDate;

    #[test]
    fn test_symbol_scope_lookup() {
        let mut symbols = SymbolScope::new();
        assert!(symbols.lookup("half").is_none());
        symbols.define("half", Expr::from_op(Op::Amount, "a"));
        assert!(symbols.lookup("half").is_some());
    }

    #[test]
    fn test_call_scope_args() {
        let journal = Journal::new();
        let report = ReportScope::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let scope = BindScope::new(&report, &journal);

        let args = vec![Value::Int(1), Value::Int(2)];
        let call = CallScope::new(&scope, &args);
        assert_eq!(call.size(), 2);
        assert_eq!(call.arg("f", 0).unwrap(), &Value::Int(1));
        assert!(matches!(call.arg("f", 5), Err(CalcError::InvalidCall { .. })));
        assert!(call.opt_arg(5).is_none());
    }

    #[test]
    fn test_item_date_falls_back_to_current() {
        let journal = Journal::new();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let report = ReportScope::new(today);
        let scope = BindScope::new(&report, &journal);
        assert_eq!(scope.item_date(), today);
    }
}
