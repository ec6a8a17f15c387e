//! Value-expression language
//!
//! A small expression language evaluated against the item a report is
//! currently processing. An expression is parsed into a tree of operator
//! nodes, bound against a chain of scopes, and computed to a [`Value`].
//!
//! The surface covers arithmetic, comparison and short-circuit logic,
//! ternaries, amount (`{…}`) and date (`[…]`) literals, payee and account
//! masks (`/…/`, `//…/`, `///…/`), function calls, and the one-letter
//! shortcut forms inherited from the report formats (`a` amount, `t`
//! amount-expression, `T` total-expression, `O` total, …).

use std::error::Error;
use std::fmt;
use std::rc::Rc;

pub mod functions;
pub mod op;
pub mod parser;
pub mod predicate;
pub mod scope;

pub use op::{BinaryOp, Op};
pub use predicate::Predicate;
pub use scope::{BindScope, CallScope, ItemRef, ReportScope, SymbolScope};

use crate::value::{Value, ValueError};
use tally_math::AmountError;

/// Result type for expression evaluation
pub type CalcResult<T = Value> = Result<T, CalcError>;

/// A positioned syntax error in an expression, format string or period.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// What went wrong
    pub msg: String,
    /// 1-based column of the offending character
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error at column {}: {}", self.column, self.msg)
    }
}

impl Error for ParseError {}

/// An identifier that no scope in the chain could resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupError {
    /// The unresolved name
    pub name: String,
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown identifier '{}'", self.name)
    }
}

impl Error for LookupError {}

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CalcError {
    /// Arithmetic or coercion failure
    Value(ValueError),
    /// Unresolved identifier
    Lookup(LookupError),
    /// A function was called with unusable arguments
    InvalidCall {
        /// Function name
        function: String,
        /// What was wrong with the call
        msg: String,
    },
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalcError::Value(err) => write!(f, "{}", err),
            CalcError::Lookup(err) => write!(f, "{}", err),
            CalcError::InvalidCall { function, msg } => {
                write!(f, "Invalid call to {}: {}", function, msg)
            }
        }
    }
}

impl Error for CalcError {}

impl From<ValueError> for CalcError {
    fn from(err: ValueError) -> Self {
        CalcError::Value(err)
    }
}

impl From<AmountError> for CalcError {
    fn from(err: AmountError) -> Self {
        CalcError::Value(err.into())
    }
}

impl From<LookupError> for CalcError {
    fn from(err: LookupError) -> Self {
        CalcError::Lookup(err)
    }
}

/// A parsed expression: the operator tree plus its source text.
#[derive(Debug, Clone)]
pub struct Expr {
    op: Rc<Op>,
    text: Option<String>,
}

impl Expr {
    /// Wrap an already-built operator tree.
    pub fn from_op(op: Op, text: impl Into<String>) -> Self {
        Expr { op: Rc::new(op), text: Some(text.into()) }
    }

    /// Parse a complete expression; trailing non-whitespace is an error.
    pub fn parse(input: &str) -> Result<Expr, ParseError> {
        let (op, _) = parser::parse(input, false)?;
        Ok(Expr { op: Rc::new(op), text: Some(input.to_string()) })
    }

    /// Parse as much of `input` as belongs to the expression language,
    /// returning the expression and the number of characters consumed.
    pub fn parse_partial(input: &str) -> Result<(Expr, usize), ParseError> {
        let (op, consumed) = parser::parse(input, true)?;
        let text: String = input.chars().take(consumed).collect();
        Ok((Expr { op: Rc::new(op), text: Some(text) }, consumed))
    }

    /// The root operator node.
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Shared handle to the root node, used when a symbol-table entry is
    /// cached inside an identifier's binding.
    pub(crate) fn op_rc(&self) -> Rc<Op> {
        Rc::clone(&self.op)
    }

    /// The source text, if the expression came from one.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Resolve every free identifier against the report scope, caching
    /// each resolution in its node, and fail on the first name nothing
    /// can bind. Redefining a symbol afterwards invalidates the caches.
    pub fn compile(&self, report: &ReportScope) -> Result<(), LookupError> {
        self.op.check_bindings(report)
    }

    /// Evaluate against a bound item.
    pub fn calc(&self, scope: &BindScope<'_>) -> CalcResult {
        self.op.calc(scope)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "{}", self.op),
        }
    }
}
