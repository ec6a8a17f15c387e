//! Boolean wrapper around an expression, used by the filter stages

use crate::expr::scope::BindScope;
use crate::expr::{CalcResult, Expr, ParseError};

/// An expression used as a yes/no test on a bound item.
#[derive(Debug, Clone)]
pub struct Predicate {
    expr: Expr,
}

impl Predicate {
    /// Wrap an existing expression.
    pub fn new(expr: Expr) -> Self {
        Predicate { expr }
    }

    /// Parse a predicate from source text.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        Ok(Predicate { expr: Expr::parse(input)? })
    }

    /// The underlying expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate to a truth value.
    pub fn calc(&self, scope: &BindScope<'_>) -> CalcResult<bool> {
        Ok(self.expr.calc(scope)?.is_truthy())
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)
    }
}
