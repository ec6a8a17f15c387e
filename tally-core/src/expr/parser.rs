//! Recursive-descent parser for value expressions
//!
//! The parser reads a character stream and reports errors with the
//! 1-based column of the offending character. In partial mode it stops at
//! the first character that cannot belong to the expression and leaves
//! the position there, which is how the format engine embeds expressions
//! inside larger strings.

use tally_math::{Amount, DateInterval};

use crate::expr::op::{BinaryOp, Op};
use crate::expr::ParseError;
use crate::value::{Mask, Value};

/// Parse an expression. Returns the root node and the number of
/// characters consumed. In single mode (`partial == false`) trailing
/// non-whitespace is an error.
pub fn parse(input: &str, partial: bool) -> Result<(Op, usize), ParseError> {
    let mut parser = Parser::new(input);
    let op = parser.parse_ternary()?;
    if !partial {
        let (pos, next) = parser.peek_nonws();
        if let Some(c) = next {
            return Err(ParseError {
                msg: format!("unexpected character '{}'", c),
                column: pos + 1,
            });
        }
    }
    Ok((op, parser.pos))
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Parser { chars: input.chars().collect(), pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while self.peek().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.pos += 1;
        }
    }

    /// Position and character of the next non-whitespace input, without
    /// consuming anything. Operator loops commit only on a match so that
    /// partial parsing never gobbles trailing whitespace.
    fn peek_nonws(&self) -> (usize, Option<char>) {
        let mut pos = self.pos;
        while let Some(&c) = self.chars.get(pos) {
            if !c.is_whitespace() {
                return (pos, Some(c));
            }
            pos += 1;
        }
        (pos, None)
    }

    fn err(&self, msg: impl Into<String>) -> ParseError {
        ParseError { msg: msg.into(), column: self.pos + 1 }
    }

    fn err_at(&self, pos: usize, msg: impl Into<String>) -> ParseError {
        ParseError { msg: msg.into(), column: pos + 1 }
    }

    // ternary → or → and → not → comparison → additive → multiplicative
    //         → unary → primary

    fn parse_ternary(&mut self) -> Result<Op, ParseError> {
        let condition = self.parse_or()?;
        let (pos, next) = self.peek_nonws();
        if next != Some('?') {
            return Ok(condition);
        }
        self.pos = pos + 1;
        let if_true = self.parse_or()?;
        let (pos, next) = self.peek_nonws();
        if next != Some(':') {
            return Err(self.err_at(pos, "expected ':' in conditional expression"));
        }
        self.pos = pos + 1;
        let if_false = self.parse_ternary()?;
        Ok(Op::binary(
            BinaryOp::Query,
            condition,
            Op::binary(BinaryOp::Colon, if_true, if_false),
        ))
    }

    fn parse_or(&mut self) -> Result<Op, ParseError> {
        let mut node = self.parse_and()?;
        loop {
            let (pos, next) = self.peek_nonws();
            if next != Some('|') {
                return Ok(node);
            }
            self.pos = pos + 1;
            if self.peek() == Some('|') {
                self.pos += 1;
            }
            let rhs = self.parse_and()?;
            node = Op::binary(BinaryOp::Or, node, rhs);
        }
    }

    fn parse_and(&mut self) -> Result<Op, ParseError> {
        let mut node = self.parse_not()?;
        loop {
            let (pos, next) = self.peek_nonws();
            if next != Some('&') {
                return Ok(node);
            }
            self.pos = pos + 1;
            if self.peek() == Some('&') {
                self.pos += 1;
            }
            let rhs = self.parse_not()?;
            node = Op::binary(BinaryOp::And, node, rhs);
        }
    }

    fn parse_not(&mut self) -> Result<Op, ParseError> {
        let (pos, next) = self.peek_nonws();
        if next == Some('!') {
            self.pos = pos + 1;
            let operand = self.parse_not()?;
            return Ok(Op::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Op, ParseError> {
        let node = self.parse_additive()?;
        let (pos, next) = self.peek_nonws();
        let op = match next {
            Some('=') => {
                self.pos = pos + 1;
                if self.peek() == Some('=') {
                    self.pos += 1;
                }
                BinaryOp::Eq
            }
            Some('<') => {
                self.pos = pos + 1;
                if self.peek() == Some('=') {
                    self.pos += 1;
                    BinaryOp::Le
                } else {
                    BinaryOp::Lt
                }
            }
            Some('>') => {
                self.pos = pos + 1;
                if self.peek() == Some('=') {
                    self.pos += 1;
                    BinaryOp::Ge
                } else {
                    BinaryOp::Gt
                }
            }
            _ => return Ok(node),
        };
        let rhs = self.parse_additive()?;
        Ok(Op::binary(op, node, rhs))
    }

    fn parse_additive(&mut self) -> Result<Op, ParseError> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let (pos, next) = self.peek_nonws();
            let op = match next {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(node),
            };
            self.pos = pos + 1;
            let rhs = self.parse_multiplicative()?;
            node = Op::binary(op, node, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Op, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let (pos, next) = self.peek_nonws();
            let op = match next {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => return Ok(node),
            };
            self.pos = pos + 1;
            let rhs = self.parse_unary()?;
            node = Op::binary(op, node, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Op, ParseError> {
        let (pos, next) = self.peek_nonws();
        if next == Some('-') {
            self.pos = pos + 1;
            let operand = self.parse_unary()?;
            return Ok(Op::Neg(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Op, ParseError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.err("unexpected end of expression")),
            Some(c) if c.is_ascii_digit() => self.parse_integer(),
            Some('{') => self.parse_amount_literal(),
            Some('[') => self.parse_date_literal(),
            Some('/') => self.parse_mask(),
            Some('(') => {
                self.pos += 1;
                let node = self.parse_ternary()?;
                let (pos, next) = self.peek_nonws();
                if next != Some(')') {
                    return Err(self.err_at(pos, "expected ')'"));
                }
                self.pos = pos + 1;
                Ok(node)
            }
            Some('^') => {
                self.pos += 1;
                let inner = self.parse_primary()?;
                Ok(Op::Parent(Box::new(inner)))
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_identifier(),
            Some(c) => Err(self.err(format!("unexpected character '{}'", c))),
        }
    }

    fn parse_integer(&mut self) -> Result<Op, ParseError> {
        let start = self.pos;
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| self.err_at(start, format!("invalid integer '{}'", digits)))?;
        Ok(Op::Value(Value::Int(value)))
    }

    fn parse_amount_literal(&mut self) -> Result<Op, ParseError> {
        let start = self.pos;
        self.pos += 1; // '{'
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err_at(start, "missing '}' in amount literal")),
                Some('}') => break,
                Some(c) => text.push(c),
            }
        }
        let amount = Amount::parse(&text)
            .map_err(|e| self.err_at(start, format!("bad amount literal: {}", e)))?;
        Ok(Op::Value(Value::Amount(amount)))
    }

    fn parse_date_literal(&mut self) -> Result<Op, ParseError> {
        let start = self.pos;
        self.pos += 1; // '['
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err_at(start, "missing ']' in date literal")),
                Some(']') => break,
                Some(c) => text.push(c),
            }
        }
        let interval = DateInterval::parse(&text)
            .map_err(|e| self.err_at(start, format!("bad date literal: {}", e)))?;
        match interval.start {
            Some(date) => Ok(Op::Value(Value::Date(date))),
            None => Err(self.err_at(start, "date literal has no start date")),
        }
    }

    /// `/re/` matches the payee, `//re/` the full account name, `///re/`
    /// the short account name.
    fn parse_mask(&mut self) -> Result<Op, ParseError> {
        let start = self.pos;
        self.pos += 1; // first '/'
        let mut extra_slashes = 0;
        while extra_slashes < 2 && self.peek() == Some('/') {
            extra_slashes += 1;
            self.pos += 1;
        }
        let mut pattern = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err_at(start, "unterminated mask")),
                Some('/') => break,
                Some(c) => pattern.push(c),
            }
        }
        let mask = Mask::new(&pattern)
            .map_err(|e| self.err_at(start, format!("bad mask: {}", e)))?;
        Ok(match extra_slashes {
            0 => Op::PayeeMask(mask),
            1 => Op::AccountMask(mask),
            _ => Op::ShortAccountMask(mask),
        })
    }

    fn parse_identifier(&mut self) -> Result<Op, ParseError> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }

        if name.chars().count() == 1 {
            if let Some(node) = self.parse_shortcut(name.chars().next().unwrap_or(' '))? {
                return Ok(node);
            }
        }

        if self.peek() == Some('(') {
            let args = self.parse_argument_list()?;
            return Ok(Op::Call { name, args });
        }
        Ok(Op::ident(name))
    }

    /// The one-letter shortcut forms. Each desugars to a named operation;
    /// the compound ones (`v V g G`) expand to small trees.
    fn parse_shortcut(&mut self, c: char) -> Result<Option<Op>, ParseError> {
        let node = match c {
            'a' => Op::Amount,
            'b' => Op::Cost,
            'd' => Op::Date,
            'X' => Op::Cleared,
            'R' => Op::Real,
            'L' => Op::Actual,
            'n' => Op::Index,
            'N' => Op::Count,
            'l' => Op::Depth,
            'O' => Op::Total,
            'B' => Op::CostTotal,
            't' => Op::AmountExpr,
            'T' => Op::TotalExpr,
            'm' => Op::Now,
            'U' => Op::Abs(Box::new(self.parse_primary()?)),
            'S' => Op::Strip(Box::new(self.parse_primary()?)),
            'A' => Op::Mean(Box::new(self.parse_primary()?)),
            'P' => self.parse_value_at()?,
            'v' => Op::ValueAt { expr: Box::new(Op::Amount), moment: Some(Box::new(Op::Date)) },
            'V' => Op::ValueAt { expr: Box::new(Op::Total), moment: Some(Box::new(Op::Date)) },
            'g' => Op::binary(
                BinaryOp::Sub,
                Op::ValueAt { expr: Box::new(Op::Amount), moment: Some(Box::new(Op::Date)) },
                Op::Cost,
            ),
            'G' => Op::binary(
                BinaryOp::Sub,
                Op::ValueAt { expr: Box::new(Op::Total), moment: Some(Box::new(Op::Date)) },
                Op::CostTotal,
            ),
            _ => return Ok(None),
        };
        Ok(Some(node))
    }

    /// `P(expr)` or `P(expr, moment)`; `P term` values a single term at
    /// the item's date.
    fn parse_value_at(&mut self) -> Result<Op, ParseError> {
        let (pos, next) = self.peek_nonws();
        if next != Some('(') {
            let expr = self.parse_primary()?;
            return Ok(Op::ValueAt { expr: Box::new(expr), moment: None });
        }
        self.pos = pos + 1;
        let expr = self.parse_ternary()?;
        let (pos, next) = self.peek_nonws();
        let moment = if next == Some(',') {
            self.pos = pos + 1;
            Some(Box::new(self.parse_ternary()?))
        } else {
            None
        };
        let (pos, next) = self.peek_nonws();
        if next != Some(')') {
            return Err(self.err_at(pos, "expected ')'"));
        }
        self.pos = pos + 1;
        Ok(Op::ValueAt { expr: Box::new(expr), moment })
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Op>, ParseError> {
        self.pos += 1; // '('
        let mut args = Vec::new();
        let (pos, next) = self.peek_nonws();
        if next == Some(')') {
            self.pos = pos + 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_ternary()?);
            let (pos, next) = self.peek_nonws();
            match next {
                Some(',') => self.pos = pos + 1,
                Some(')') => {
                    self.pos = pos + 1;
                    return Ok(args);
                }
                _ => return Err(self.err_at(pos, "expected ',' or ')' in argument list")),
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_single(input: &str) -> Op {
        parse(input, false).unwrap().0
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_single("42"), Op::Value(Value::Int(42)));
    }

    #[test]
    fn test_parse_shortcuts() {
        assert_eq!(parse_single("a"), Op::Amount);
        assert_eq!(parse_single("T"), Op::TotalExpr);
        assert_eq!(parse_single("O"), Op::Total);
        assert_eq!(parse_single("l"), Op::Depth);
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_single("amount"), Op::ident("amount"));
    }

    #[test]
    fn test_precedence_mul_over_add() {
        match parse_single("1 + 2 * 3") {
            Op::Binary { op: BinaryOp::Add, left, right } => {
                assert_eq!(*left, Op::Value(Value::Int(1)));
                assert!(matches!(*right, Op::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected addition, got {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_override_precedence() {
        match parse_single("(1 + 2) * 3") {
            Op::Binary { op: BinaryOp::Mul, left, .. } => {
                assert!(matches!(*left, Op::Binary { op: BinaryOp::Add, .. }));
            }
            other => panic!("expected multiplication, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary_shape() {
        match parse_single("a ? 1 : 2") {
            Op::Binary { op: BinaryOp::Query, left, right } => {
                assert_eq!(*left, Op::Amount);
                assert!(matches!(*right, Op::Binary { op: BinaryOp::Colon, .. }));
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary_missing_colon_is_error() {
        let err = parse("a ? 1", false).unwrap_err();
        assert!(err.msg.contains(":"));
    }

    #[test]
    fn test_amount_literal() {
        match parse_single("{10.00 USD}") {
            Op::Value(Value::Amount(a)) => assert_eq!(a.to_string(), "10.00 USD"),
            other => panic!("expected amount, got {:?}", other),
        }
    }

    #[test]
    fn test_date_literal() {
        match parse_single("[2024-04-01]") {
            Op::Value(Value::Date(d)) => assert_eq!(d.to_string(), "2024-04-01"),
            other => panic!("expected date, got {:?}", other),
        }
    }

    #[test]
    fn test_mask_forms() {
        assert!(matches!(parse_single("/Grocer/"), Op::PayeeMask(_)));
        assert!(matches!(parse_single("//Expenses/"), Op::AccountMask(_)));
        assert!(matches!(parse_single("///Food/"), Op::ShortAccountMask(_)));
    }

    #[test]
    fn test_compound_shortcuts() {
        assert!(matches!(parse_single("v"), Op::ValueAt { .. }));
        match parse_single("g") {
            Op::Binary { op: BinaryOp::Sub, left, right } => {
                assert!(matches!(*left, Op::ValueAt { .. }));
                assert_eq!(*right, Op::Cost);
            }
            other => panic!("expected subtraction, got {:?}", other),
        }
    }

    #[test]
    fn test_value_function_with_moment() {
        match parse_single("P(a, d)") {
            Op::ValueAt { expr, moment } => {
                assert_eq!(*expr, Op::Amount);
                assert_eq!(moment.as_deref(), Some(&Op::Date));
            }
            other => panic!("expected valuation, got {:?}", other),
        }
    }

    #[test]
    fn test_call_with_arguments() {
        match parse_single("justify(a, 10, 20, 1)") {
            Op::Call { name, args } => {
                assert_eq!(name, "justify");
                assert_eq!(args.len(), 4);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_logic_chain() {
        match parse_single("X & /Grocer/ | R") {
            Op::Binary { op: BinaryOp::Or, left, .. } => {
                assert!(matches!(*left, Op::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("expected or, got {:?}", other),
        }
    }

    #[test]
    fn test_single_mode_rejects_trailing() {
        let err = parse("1 + 2 junk", false).unwrap_err();
        assert_eq!(err.column, 7);
    }

    #[test]
    fn test_partial_mode_stops_cleanly() {
        let (op, consumed) = parse("payee) trailing", true).unwrap();
        assert_eq!(op, Op::ident("payee"));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_partial_mode_leaves_whitespace() {
        let (_, consumed) = parse("a  rest", true).unwrap();
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_error_column_reported() {
        let err = parse("1 + $", false).unwrap_err();
        assert_eq!(err.column, 5);
    }

    #[test]
    fn test_parent_lookup() {
        assert!(matches!(parse_single("^a"), Op::Parent(_)));
    }
}
