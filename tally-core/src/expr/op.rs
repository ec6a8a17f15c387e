//! Expression operator tree and its evaluation

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::expr::scope::{BindScope, ItemRef, ReportScope};
use crate::expr::{functions, CalcError, CalcResult, LookupError};
use crate::posting::PostXFlags;
use crate::value::{Mask, Value};

/// Binary operators, including the `?`/`:` pair that forms ternaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&`, short-circuit
    And,
    /// `|`, short-circuit
    Or,
    /// `?`; its right child is always a `Colon` node
    Query,
    /// `:`; holds the two branches of a ternary
    Colon,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Query => "?",
            BinaryOp::Colon => ":",
        };
        write!(f, "{}", symbol)
    }
}

/// What an identifier resolved to: an item field, or the operator tree
/// of a user-defined symbol.
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    /// A field of the bound item
    Field(ItemField),
    /// The compiled body of a symbol-table entry
    Alias(Rc<Op>),
}

/// Lazily cached resolution of a free identifier. The binding pass (or
/// the first successful lookup) fills it; the cache carries the symbol
/// generation it resolved under, so a scope change invalidates it.
#[derive(Debug, Clone, Default)]
pub struct IdentBinding {
    slot: RefCell<Option<(u64, Resolved)>>,
}

impl IdentBinding {
    fn cached(&self, generation: u64) -> Option<Resolved> {
        match &*self.slot.borrow() {
            Some((stamp, resolved)) if *stamp == generation => Some(resolved.clone()),
            _ => None,
        }
    }

    fn store(&self, generation: u64, resolved: Resolved) {
        *self.slot.borrow_mut() = Some((generation, resolved));
    }
}

impl PartialEq for IdentBinding {
    // The cache is transparent to structural equality.
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// One node of an expression tree: a literal, an identifier, an item
/// projection, or an operator applied to up to two children.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Literal value
    Value(Value),
    /// Free identifier, resolved against the scope chain through a
    /// cached binding
    Ident(String, IdentBinding),

    /// The item's amount
    Amount,
    /// The item's cost (falling back to the amount)
    Cost,
    /// Running total at the item
    Total,
    /// Running cost-basis total at the item
    CostTotal,
    /// The item's reporting date
    Date,
    /// Whether the item is cleared
    Cleared,
    /// Whether the posting is real (not virtual)
    Real,
    /// Whether the posting was written by hand (not generated)
    Actual,
    /// Running index of the item
    Index,
    /// Visit count of the item
    Count,
    /// Account depth of the item
    Depth,
    /// The report's amount expression, applied to the item
    AmountExpr,
    /// The report's total expression, applied to the item
    TotalExpr,
    /// The report's current date
    Now,

    /// Payee pattern test
    PayeeMask(Mask),
    /// Full account-name pattern test
    AccountMask(Mask),
    /// Account leaf-name pattern test
    ShortAccountMask(Mask),

    /// Re-evaluate in the parent account's scope
    Parent(Box<Op>),
    /// Arithmetic negation
    Neg(Box<Op>),
    /// Absolute value
    Abs(Box<Op>),
    /// Strip commodities
    Strip(Box<Op>),
    /// Logical not
    Not(Box<Op>),
    /// Divide by the item's running count
    Mean(Box<Op>),
    /// Price-historical valuation
    ValueAt {
        /// What to value
        expr: Box<Op>,
        /// When to value it; the item's date when absent
        moment: Option<Box<Op>>,
    },

    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left child
        left: Box<Op>,
        /// Right child
        right: Box<Op>,
    },
    /// Function call, resolved against the symbol scope
    Call {
        /// Callee name
        name: String,
        /// Argument expressions
        args: Vec<Op>,
    },
}

impl Op {
    /// Build a binary node.
    pub fn binary(op: BinaryOp, left: Op, right: Op) -> Op {
        Op::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    /// Build an identifier node with an empty binding cache.
    pub fn ident(name: impl Into<String>) -> Op {
        Op::Ident(name.into(), IdentBinding::default())
    }

    /// Resolve every free identifier in the tree, caching each
    /// resolution in its node, and fail on the first name nothing binds.
    pub(crate) fn check_bindings(&self, report: &ReportScope) -> Result<(), LookupError> {
        match self {
            Op::Ident(name, binding) => {
                let generation = report.symbols.generation();
                if let Some(field) = ItemField::parse(name) {
                    binding.store(generation, Resolved::Field(field));
                    Ok(())
                } else if let Some(alias) = report.symbols.lookup(name) {
                    binding.store(generation, Resolved::Alias(alias.op_rc()));
                    Ok(())
                } else {
                    Err(LookupError { name: name.clone() })
                }
            }
            Op::Call { name, args } => {
                if !functions::is_builtin(name) && report.symbols.lookup(name).is_none() {
                    return Err(LookupError { name: name.clone() });
                }
                for arg in args {
                    arg.check_bindings(report)?;
                }
                Ok(())
            }
            Op::Parent(inner)
            | Op::Neg(inner)
            | Op::Abs(inner)
            | Op::Strip(inner)
            | Op::Not(inner)
            | Op::Mean(inner) => inner.check_bindings(report),
            Op::ValueAt { expr, moment } => {
                expr.check_bindings(report)?;
                if let Some(moment) = moment {
                    moment.check_bindings(report)?;
                }
                Ok(())
            }
            Op::Binary { left, right, .. } => {
                left.check_bindings(report)?;
                right.check_bindings(report)
            }
            _ => Ok(()),
        }
    }

    /// Evaluate this node against a bound item.
    pub fn calc(&self, scope: &BindScope<'_>) -> CalcResult {
        match self {
            Op::Value(value) => Ok(value.clone()),
            Op::Ident(name, binding) => calc_ident(name, binding, scope),

            Op::Amount => Ok(item_amount(scope)),
            Op::Cost => Ok(item_cost(scope)),
            Op::Total => Ok(item_total(scope)),
            Op::CostTotal => Ok(item_cost_total(scope)),
            Op::Date => Ok(Value::Date(scope.item_date())),
            Op::Cleared => Ok(Value::Bool(item_cleared(scope))),
            Op::Real => Ok(Value::Bool(item_real(scope))),
            Op::Actual => Ok(Value::Bool(item_actual(scope))),
            Op::Index => Ok(Value::Int(item_index(scope) as i64)),
            Op::Count => Ok(Value::Int(item_count(scope) as i64)),
            Op::Depth => Ok(Value::Int(item_depth(scope) as i64)),
            Op::AmountExpr => scope.report.amount_expr.calc(scope),
            Op::TotalExpr => scope.report.total_expr.calc(scope),
            Op::Now => Ok(Value::Date(scope.report.current_date)),

            Op::PayeeMask(mask) => Ok(Value::Bool(match scope.item {
                ItemRef::Post(post) => mask.is_match(scope.journal.post_payee(post)),
                _ => false,
            })),
            Op::AccountMask(mask) => Ok(Value::Bool(
                item_account(scope)
                    .map(|id| mask.is_match(scope.journal.account(id).fullname()))
                    .unwrap_or(false),
            )),
            Op::ShortAccountMask(mask) => Ok(Value::Bool(
                item_account(scope)
                    .map(|id| mask.is_match(scope.journal.account(id).partial_name()))
                    .unwrap_or(false),
            )),

            Op::Parent(inner) => match item_account(scope)
                .and_then(|id| scope.journal.account(id).parent)
            {
                Some(parent) => inner.calc(&scope.with_item(ItemRef::Account(parent))),
                None => Ok(Value::Null),
            },
            Op::Neg(inner) => Ok(inner.calc(scope)?.negated()?),
            Op::Abs(inner) => Ok(inner.calc(scope)?.abs()?),
            Op::Strip(inner) => Ok(inner.calc(scope)?.stripped()?),
            Op::Not(inner) => Ok(Value::Bool(!inner.calc(scope)?.is_truthy())),
            Op::Mean(inner) => {
                let count = item_count(scope);
                if count == 0 {
                    return Ok(Value::Int(0));
                }
                Ok(inner.calc(scope)?.div(&Value::Int(count as i64))?)
            }
            Op::ValueAt { expr, moment } => {
                let value = expr.calc(scope)?;
                let date = match moment {
                    Some(moment) => match moment.calc(scope)? {
                        Value::Date(date) => date,
                        Value::DateTime(dt) => dt.date(),
                        other => {
                            return Err(CalcError::InvalidCall {
                                function: "value".to_string(),
                                msg: format!("expected a date, got {}", other.type_name()),
                            })
                        }
                    },
                    None => scope.item_date(),
                };
                Ok(value.value_at(date))
            }

            Op::Binary { op, left, right } => calc_binary(*op, left, right, scope),
            Op::Call { name, args } => calc_call(name, args, scope),
        }
    }
}

fn calc_binary(op: BinaryOp, left: &Op, right: &Op, scope: &BindScope<'_>) -> CalcResult {
    match op {
        BinaryOp::And => {
            let lhs = left.calc(scope)?;
            if lhs.is_truthy() {
                right.calc(scope)
            } else {
                Ok(Value::Bool(false))
            }
        }
        BinaryOp::Or => {
            let lhs = left.calc(scope)?;
            if lhs.is_truthy() {
                Ok(lhs)
            } else {
                right.calc(scope)
            }
        }
        BinaryOp::Query => {
            let (if_true, if_false) = match right {
                Op::Binary { op: BinaryOp::Colon, left, right } => (left, right),
                _ => {
                    return Err(CalcError::InvalidCall {
                        function: "?".to_string(),
                        msg: "conditional without a ':' branch".to_string(),
                    })
                }
            };
            if left.calc(scope)?.is_truthy() {
                if_true.calc(scope)
            } else {
                if_false.calc(scope)
            }
        }
        BinaryOp::Colon => Err(CalcError::InvalidCall {
            function: ":".to_string(),
            msg: "':' outside a conditional".to_string(),
        }),
        BinaryOp::Add => Ok(left.calc(scope)?.add(&right.calc(scope)?)?),
        BinaryOp::Sub => Ok(left.calc(scope)?.sub(&right.calc(scope)?)?),
        BinaryOp::Mul => Ok(left.calc(scope)?.mul(&right.calc(scope)?)?),
        BinaryOp::Div => Ok(left.calc(scope)?.div(&right.calc(scope)?)?),
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let lhs = left.calc(scope)?;
            let rhs = right.calc(scope)?;
            let ordering = lhs.compare(&rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Eq => ordering == std::cmp::Ordering::Equal,
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::Le => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }))
        }
    }
}

/// A bound-item field an identifier can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemField {
    Amount,
    Total,
    Cost,
    CostTotal,
    Date,
    Cleared,
    Real,
    Actual,
    Index,
    Count,
    Depth,
    Today,
    Payee,
    Account,
    AccountBase,
    Note,
    Code,
}

impl ItemField {
    fn parse(name: &str) -> Option<ItemField> {
        Some(match name {
            "amount" => ItemField::Amount,
            "total" => ItemField::Total,
            "cost" => ItemField::Cost,
            "cost_total" => ItemField::CostTotal,
            "date" => ItemField::Date,
            "cleared" => ItemField::Cleared,
            "real" => ItemField::Real,
            "actual" => ItemField::Actual,
            "index" => ItemField::Index,
            "count" => ItemField::Count,
            "depth" => ItemField::Depth,
            "today" | "now" => ItemField::Today,
            "payee" => ItemField::Payee,
            "account" => ItemField::Account,
            "account_base" => ItemField::AccountBase,
            "note" => ItemField::Note,
            "code" => ItemField::Code,
            _ => return None,
        })
    }

    fn calc(self, scope: &BindScope<'_>) -> CalcResult {
        match self {
            ItemField::Amount => Ok(item_amount(scope)),
            ItemField::Total => Ok(item_total(scope)),
            ItemField::Cost => Ok(item_cost(scope)),
            ItemField::CostTotal => Ok(item_cost_total(scope)),
            ItemField::Date => Ok(Value::Date(scope.item_date())),
            ItemField::Cleared => Ok(Value::Bool(item_cleared(scope))),
            ItemField::Real => Ok(Value::Bool(item_real(scope))),
            ItemField::Actual => Ok(Value::Bool(item_actual(scope))),
            ItemField::Index => Ok(Value::Int(item_index(scope) as i64)),
            ItemField::Count => Ok(Value::Int(item_count(scope) as i64)),
            ItemField::Depth => Ok(Value::Int(item_depth(scope) as i64)),
            ItemField::Today => Ok(Value::Date(scope.report.current_date)),
            ItemField::Payee => Ok(match scope.item {
                ItemRef::Post(post) => Value::Str(scope.journal.post_payee(post).to_string()),
                _ => Value::Null,
            }),
            ItemField::Account => Ok(match item_account(scope) {
                Some(id) => Value::Str(scope.journal.account(id).fullname().to_string()),
                None => Value::Null,
            }),
            ItemField::AccountBase => Ok(match item_account(scope) {
                Some(id) => Value::Str(scope.journal.account(id).partial_name().to_string()),
                None => Value::Null,
            }),
            ItemField::Note => Ok(match scope.item {
                ItemRef::Post(post) => {
                    let posting = scope.journal.post(post);
                    match &posting.note {
                        Some(note) => Value::Str(note.to_string()),
                        None => match &scope.journal.xact(posting.xact).note {
                            Some(note) => Value::Str(note.clone()),
                            None => Value::Null,
                        },
                    }
                }
                ItemRef::Account(id) => match &scope.journal.account(id).note {
                    Some(note) => Value::Str(note.clone()),
                    None => Value::Null,
                },
                ItemRef::None => Value::Null,
            }),
            ItemField::Code => Ok(match scope.item {
                ItemRef::Post(post) => {
                    match &scope.journal.xact(scope.journal.post(post).xact).code {
                        Some(code) => Value::Str(code.clone()),
                        None => Value::Null,
                    }
                }
                _ => Value::Null,
            }),
        }
    }
}

fn calc_ident(name: &str, binding: &IdentBinding, scope: &BindScope<'_>) -> CalcResult {
    let generation = scope.report.symbols.generation();
    if let Some(resolved) = binding.cached(generation) {
        return match resolved {
            Resolved::Field(field) => field.calc(scope),
            Resolved::Alias(op) => op.calc(scope),
        };
    }

    if let Some(field) = ItemField::parse(name) {
        binding.store(generation, Resolved::Field(field));
        return field.calc(scope);
    }
    match scope.report.symbols.lookup(name) {
        Some(alias) => {
            let op = alias.op_rc();
            binding.store(generation, Resolved::Alias(Rc::clone(&op)));
            op.calc(scope)
        }
        None => Err(LookupError { name: name.to_string() }.into()),
    }
}

fn calc_call(name: &str, args: &[Op], scope: &BindScope<'_>) -> CalcResult {
    if let Some(alias) = scope.report.symbols.lookup(name) {
        if !args.is_empty() {
            return Err(CalcError::InvalidCall {
                function: name.to_string(),
                msg: "user-defined names take no arguments".to_string(),
            });
        }
        return alias.calc(scope);
    }
    if !functions::is_builtin(name) {
        return Err(LookupError { name: name.to_string() }.into());
    }
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(arg.calc(scope)?);
    }
    functions::call(name, scope, &values)
}

fn item_account(scope: &BindScope<'_>) -> Option<crate::account::AccountId> {
    match scope.item {
        ItemRef::Post(post) => Some(scope.journal.post(post).reported_account()),
        ItemRef::Account(id) => Some(id),
        ItemRef::None => None,
    }
}

fn item_amount(scope: &BindScope<'_>) -> Value {
    match scope.item {
        ItemRef::Post(post) => {
            let posting = scope.journal.post(post);
            if posting.has_xflags(PostXFlags::COMPOUND) {
                if let Some(xdata) = &posting.xdata {
                    if let Some(compound) = &xdata.compound_value {
                        return compound.clone();
                    }
                }
            }
            Value::Amount(posting.amount.clone())
        }
        ItemRef::Account(id) => match &scope.journal.account(id).xdata {
            Some(xdata) => xdata.value.clone(),
            None => Value::Int(0),
        },
        ItemRef::None => Value::Int(0),
    }
}

fn item_cost(scope: &BindScope<'_>) -> Value {
    match scope.item {
        ItemRef::Post(post) => Value::Amount(scope.journal.post(post).cost_or_amount().clone()),
        ItemRef::Account(id) => match &scope.journal.account(id).xdata {
            Some(xdata) => xdata.value.clone(),
            None => Value::Int(0),
        },
        ItemRef::None => Value::Int(0),
    }
}

fn item_total(scope: &BindScope<'_>) -> Value {
    match scope.item {
        ItemRef::Post(post) => scope
            .journal
            .post(post)
            .xdata
            .as_ref()
            .and_then(|x| x.total.clone())
            .unwrap_or(Value::Int(0)),
        ItemRef::Account(id) => match &scope.journal.account(id).xdata {
            Some(xdata) => xdata.total.clone(),
            None => Value::Int(0),
        },
        ItemRef::None => Value::Int(0),
    }
}

fn item_cost_total(scope: &BindScope<'_>) -> Value {
    match scope.item {
        ItemRef::Post(post) => scope
            .journal
            .post(post)
            .xdata
            .as_ref()
            .and_then(|x| x.cost_total.clone())
            .unwrap_or(Value::Int(0)),
        ItemRef::Account(id) => match &scope.journal.account(id).xdata {
            Some(xdata) => xdata.total.clone(),
            None => Value::Int(0),
        },
        ItemRef::None => Value::Int(0),
    }
}

fn item_cleared(scope: &BindScope<'_>) -> bool {
    match scope.item {
        ItemRef::Post(post) => {
            scope.journal.post_state(post) == crate::transaction::State::Cleared
        }
        _ => false,
    }
}

fn item_real(scope: &BindScope<'_>) -> bool {
    match scope.item {
        ItemRef::Post(post) => !scope.journal.post(post).is_virtual(),
        _ => true,
    }
}

fn item_actual(scope: &BindScope<'_>) -> bool {
    match scope.item {
        ItemRef::Post(post) => !scope.journal.post(post).is_generated(),
        _ => true,
    }
}

fn item_index(scope: &BindScope<'_>) -> usize {
    match scope.item {
        ItemRef::Post(post) => {
            scope.journal.post(post).xdata.as_ref().map(|x| x.count).unwrap_or(0)
        }
        ItemRef::Account(id) => {
            scope.journal.account(id).xdata.as_ref().map(|x| x.count).unwrap_or(0)
        }
        ItemRef::None => 0,
    }
}

fn item_count(scope: &BindScope<'_>) -> usize {
    match scope.item {
        ItemRef::Post(post) => {
            scope.journal.post(post).xdata.as_ref().map(|x| x.count).unwrap_or(0)
        }
        ItemRef::Account(id) => {
            scope.journal.account(id).xdata.as_ref().map(|x| x.total_count).unwrap_or(0)
        }
        ItemRef::None => 0,
    }
}

fn item_depth(scope: &BindScope<'_>) -> usize {
    item_account(scope).map(|id| scope.journal.account(id).depth).unwrap_or(0)
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Value(v) => write!(f, "{}", v),
            Op::Ident(name, _) => write!(f, "{}", name),
            Op::Amount => write!(f, "amount"),
            Op::Cost => write!(f, "cost"),
            Op::Total => write!(f, "total"),
            Op::CostTotal => write!(f, "cost_total"),
            Op::Date => write!(f, "date"),
            Op::Cleared => write!(f, "cleared"),
            Op::Real => write!(f, "real"),
            Op::Actual => write!(f, "actual"),
            Op::Index => write!(f, "index"),
            Op::Count => write!(f, "count"),
            Op::Depth => write!(f, "depth"),
            Op::AmountExpr => write!(f, "amount_expr"),
            Op::TotalExpr => write!(f, "total_expr"),
            Op::Now => write!(f, "now"),
            Op::PayeeMask(m) => write!(f, "/{}/", m.pattern()),
            Op::AccountMask(m) => write!(f, "//{}/", m.pattern()),
            Op::ShortAccountMask(m) => write!(f, "///{}/", m.pattern()),
            Op::Parent(inner) => write!(f, "^{}", inner),
            Op::Neg(inner) => write!(f, "(-{})", inner),
            Op::Abs(inner) => write!(f, "abs({})", inner),
            Op::Strip(inner) => write!(f, "strip({})", inner),
            Op::Not(inner) => write!(f, "(!{})", inner),
            Op::Mean(inner) => write!(f, "mean({})", inner),
            Op::ValueAt { expr, moment } => match moment {
                Some(moment) => write!(f, "value({}, {})", expr, moment),
                None => write!(f, "value({})", expr),
            },
            Op::Binary { op: BinaryOp::Query, left, right } => match right.as_ref() {
                Op::Binary { op: BinaryOp::Colon, left: t, right: e } => {
                    write!(f, "({} ? {} : {})", left, t, e)
                }
                other => write!(f, "({} ? {})", left, other),
            },
            Op::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Op::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::journal::Journal;
    use crate::posting::{PostId, Posting};
    use crate::transaction::Xact;
    use chrono::NaiveDate;
    use tally_math::Amount;

    fn fixture() -> (Journal, PostId) {
        let mut journal = Journal::new();
        let food = journal.find_account("Expenses:Food", true).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let xact = journal.add_xact(Xact::new(date, "Grocer"));
        let amount = Amount::parse_in("10.00 USD", &mut journal.commodities).unwrap();
        let post = journal.add_post(xact, Posting::new(food, amount));
        (journal, post)
    }

    fn eval(journal: &Journal, post: PostId, source: &str) -> CalcResult {
        let report = ReportScope::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let scope = BindScope::bind(&report, journal, ItemRef::Post(post));
        Expr::parse(source).unwrap().calc(&scope)
    }

    #[test]
    fn test_amount_projection() {
        let (journal, post) = fixture();
        assert_eq!(eval(&journal, post, "a").unwrap().to_string(), "10.00 USD");
        assert_eq!(eval(&journal, post, "amount").unwrap().to_string(), "10.00 USD");
    }

    #[test]
    fn test_arithmetic_with_amount_literal() {
        let (journal, post) = fixture();
        assert_eq!(
            eval(&journal, post, "a + {2.00 USD}").unwrap().to_string(),
            "12.00 USD"
        );
        assert_eq!(eval(&journal, post, "-a").unwrap().to_string(), "-10.00 USD");
    }

    #[test]
    fn test_comparison_against_literal() {
        let (journal, post) = fixture();
        assert_eq!(eval(&journal, post, "a > {5.00 USD}").unwrap(), Value::Bool(true));
        assert_eq!(eval(&journal, post, "a = {10.00 USD}").unwrap(), Value::Bool(true));
        assert_eq!(eval(&journal, post, "a <= {5.00 USD}").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_ternary_picks_branch() {
        let (journal, post) = fixture();
        // The fixture posting is uncleared.
        assert_eq!(eval(&journal, post, "X ? 1 : 2").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_short_circuit_never_evaluates_dead_branch() {
        let (journal, post) = fixture();
        // The right-hand division by zero must not run.
        assert_eq!(eval(&journal, post, "0 & (1 / 0)").unwrap(), Value::Bool(false));
        assert_eq!(eval(&journal, post, "1 | (1 / 0)").unwrap(), Value::Int(1));
        assert!(eval(&journal, post, "1 & (1 / 0)").is_err());
    }

    #[test]
    fn test_masks_against_item() {
        let (journal, post) = fixture();
        assert_eq!(eval(&journal, post, "/Groc/").unwrap(), Value::Bool(true));
        assert_eq!(eval(&journal, post, "//Food/").unwrap(), Value::Bool(true));
        assert_eq!(eval(&journal, post, "///Expenses/").unwrap(), Value::Bool(false));
        assert_eq!(eval(&journal, post, "///Food/").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_depth_and_date() {
        let (journal, post) = fixture();
        assert_eq!(eval(&journal, post, "l").unwrap(), Value::Int(2));
        assert_eq!(
            eval(&journal, post, "d").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
    }

    #[test]
    fn test_unknown_identifier_is_lookup_error() {
        let (journal, post) = fixture();
        assert!(matches!(
            eval(&journal, post, "mystery"),
            Err(CalcError::Lookup(_))
        ));
    }

    #[test]
    fn test_user_alias_resolves() {
        let (journal, post) = fixture();
        let mut report = ReportScope::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        report.symbols.define("double", Expr::parse("a + a").unwrap());
        let scope = BindScope::bind(&report, &journal, ItemRef::Post(post));
        let value = Expr::parse("double").unwrap().calc(&scope).unwrap();
        assert_eq!(value.to_string(), "20.00 USD");
    }

    #[test]
    fn test_compile_caches_and_redefinition_invalidates() {
        let (journal, post) = fixture();
        let mut report = ReportScope::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        report.symbols.define("pick", Expr::parse("a").unwrap());

        let expr = Expr::parse("pick").unwrap();
        expr.compile(&report).unwrap();
        let scope = BindScope::bind(&report, &journal, ItemRef::Post(post));
        assert_eq!(expr.calc(&scope).unwrap().to_string(), "10.00 USD");

        // Redefining the symbol advances the table's generation; the
        // cached binding in the identifier node must not survive.
        report.symbols.define("pick", Expr::parse("a + a").unwrap());
        let scope = BindScope::bind(&report, &journal, ItemRef::Post(post));
        assert_eq!(expr.calc(&scope).unwrap().to_string(), "20.00 USD");
    }

    #[test]
    fn test_field_lookup_caches_on_first_use() {
        let (journal, post) = fixture();
        let report = ReportScope::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let scope = BindScope::bind(&report, &journal, ItemRef::Post(post));

        let expr = Expr::parse("amount").unwrap();
        // First evaluation resolves and caches; the second serves the
        // cached field binding.
        assert_eq!(expr.calc(&scope).unwrap().to_string(), "10.00 USD");
        assert_eq!(expr.calc(&scope).unwrap().to_string(), "10.00 USD");
    }
}
