//! Format-string engine
//!
//! A format string interleaves literal text, backslash escapes and
//! `%[-][min[.max]]SPEC` directives, where SPEC is a single-letter
//! projection, `(expr)` for a string-rendered expression, or `{expr}` for
//! an amount rendered with justification. `{…}` subexpressions are
//! rewritten at parse time as
//! `ansify_if(justify(scrub(expr), min, max, right_aligned), colorize)`
//! so width, truncation and colour travel inside the evaluator and see
//! the item under evaluation.
//!
//! Truncation counts Unicode code points, never bytes.

use std::error::Error;
use std::fmt;

use crate::expr::op::{BinaryOp, Op};
use crate::expr::scope::BindScope;
use crate::expr::{CalcError, Expr, ParseError};
use crate::value::Value;

/// Widths at or above this bound are rejected outright.
const WIDTH_BOUND: usize = 4095;

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors from format-string parsing and rendering
#[derive(Debug, Clone, PartialEq)]
pub enum FormatError {
    /// A `%(…)` or `%{…}` ran off the end of the string
    Unterminated {
        /// 1-based column where the group started
        column: usize,
    },
    /// Unrecognized single-letter directive
    UnknownDirective(char),
    /// A width at or beyond the supported bound
    WidthBound(usize),
    /// Error in an embedded expression
    Parse(ParseError),
    /// Error evaluating an embedded expression
    Calc(CalcError),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Unterminated { column } => {
                write!(f, "Unterminated expression group at column {}", column)
            }
            FormatError::UnknownDirective(c) => write!(f, "Unknown format directive '%{}'", c),
            FormatError::WidthBound(width) => {
                write!(f, "Width {} exceeds the {} bound", width, WIDTH_BOUND)
            }
            FormatError::Parse(err) => write!(f, "{}", err),
            FormatError::Calc(err) => write!(f, "{}", err),
        }
    }
}

impl Error for FormatError {}

impl From<ParseError> for FormatError {
    fn from(err: ParseError) -> Self {
        FormatError::Parse(err)
    }
}

impl From<CalcError> for FormatError {
    fn from(err: CalcError) -> Self {
        FormatError::Calc(err)
    }
}

/// How an over-long string is shortened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElisionStyle {
    /// `..xyz`
    TruncateLeading,
    /// `ab..yz`
    TruncateMiddle,
    /// `abc..` (the default)
    TruncateTrailing,
    /// Shorten colon-separated account segments before truncating
    Abbreviate,
}

/// Shorten `input` to exactly `width` code points using the given style.
/// `account_abbrev` is the per-segment length for [`ElisionStyle::Abbreviate`].
pub fn truncate(
    input: &str,
    width: usize,
    style: ElisionStyle,
    account_abbrev: usize,
) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    if width == 0 || len <= width {
        return input.to_string();
    }
    if width <= 2 {
        return chars[..width].iter().collect();
    }

    let take = |range: std::ops::Range<usize>| -> String { chars[range].iter().collect() };

    match style {
        ElisionStyle::TruncateLeading => format!("..{}", take(len - (width - 2)..len)),
        ElisionStyle::TruncateMiddle => {
            let keep = width - 2;
            let front = keep / 2;
            let back = keep - front;
            format!("{}..{}", take(0..front), take(len - back..len))
        }
        ElisionStyle::TruncateTrailing => format!("{}..", take(0..width - 2)),
        ElisionStyle::Abbreviate => {
            if account_abbrev == 0 {
                return truncate(input, width, ElisionStyle::TruncateTrailing, 0);
            }
            let parts: Vec<&str> = input.split(':').collect();
            let mut out = String::new();
            let mut remaining = len;
            for (i, part) in parts.iter().enumerate() {
                if i + 1 == parts.len() {
                    out.push_str(part);
                    break;
                }
                let part_len = part.chars().count();
                if remaining > width && part_len > account_abbrev {
                    out.extend(part.chars().take(account_abbrev));
                    out.push(':');
                    remaining -= part_len - account_abbrev;
                } else {
                    out.push_str(part);
                    out.push(':');
                }
            }
            if remaining > width {
                // Abbreviation was not enough; truncate at the beginning so
                // the leaf account stays visible.
                truncate(&out, width, ElisionStyle::TruncateLeading, 0)
            } else {
                out
            }
        }
    }
}

#[derive(Debug, Clone)]
enum ElementKind {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
struct Element {
    kind: ElementKind,
    min_width: usize,
    max_width: usize,
    align_left: bool,
}

impl Element {
    fn literal(text: impl Into<String>) -> Self {
        Element { kind: ElementKind::Literal(text.into()), min_width: 0, max_width: 0, align_left: false }
    }
}

/// A compiled format string.
#[derive(Debug, Clone)]
pub struct Format {
    elements: Vec<Element>,
    elision: ElisionStyle,
    account_abbrev: usize,
}

impl Format {
    /// Parse a format string.
    pub fn parse(fmt: &str) -> FormatResult<Format> {
        let chars: Vec<char> = fmt.chars().collect();
        let mut elements = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '\\' => {
                    i += 1;
                    let escaped = chars.get(i).copied().unwrap_or('\\');
                    literal.push(match escaped {
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\u{b}',
                        '\\' => '\\',
                        other => other,
                    });
                    i += 1;
                }
                '%' => {
                    if !literal.is_empty() {
                        elements.push(Element::literal(std::mem::take(&mut literal)));
                    }
                    i += 1;
                    let (element, consumed) = Self::parse_directive(&chars, i)?;
                    i += consumed;
                    match element {
                        Some(element) => elements.push(element),
                        None => literal.push('%'),
                    }
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            elements.push(Element::literal(literal));
        }

        Ok(Format { elements, elision: ElisionStyle::TruncateTrailing, account_abbrev: 0 })
    }

    /// Use colon-segment abbreviation with the given per-segment length
    /// when truncating.
    pub fn with_account_abbrev(mut self, length: usize) -> Format {
        if length > 0 {
            self.elision = ElisionStyle::Abbreviate;
            self.account_abbrev = length;
        }
        self
    }

    /// Parse one directive starting just past the `%`. Returns the element
    /// (`None` for `%%`) and how many characters were consumed.
    fn parse_directive(chars: &[char], start: usize) -> FormatResult<(Option<Element>, usize)> {
        let mut i = start;
        let mut align_left = false;
        let mut min_width = 0usize;
        let mut max_width = 0usize;

        while chars.get(i) == Some(&'-') {
            align_left = true;
            i += 1;
        }
        while chars.get(i).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            min_width = min_width * 10 + (chars[i] as usize - '0' as usize);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            while chars.get(i).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                max_width = max_width * 10 + (chars[i] as usize - '0' as usize);
                i += 1;
            }
            if min_width == 0 {
                min_width = max_width;
            }
        }
        if min_width >= WIDTH_BOUND || max_width >= WIDTH_BOUND {
            return Err(FormatError::WidthBound(min_width.max(max_width)));
        }

        let spec = match chars.get(i) {
            Some(&c) => c,
            None => return Err(FormatError::Unterminated { column: start }),
        };

        match spec {
            '%' => Ok((None, i - start + 1)),
            '(' => {
                let (expr, after) = Self::parse_embedded(chars, i + 1, ')', start)?;
                let element = Element {
                    kind: ElementKind::Expr(expr),
                    min_width,
                    max_width,
                    align_left,
                };
                Ok((Some(element), after - start))
            }
            '{' => {
                let (expr, after) = Self::parse_amount_group(
                    chars,
                    i + 1,
                    min_width,
                    max_width,
                    align_left,
                    start,
                )?;
                let element = Element {
                    kind: ElementKind::Expr(expr),
                    min_width: 0,
                    max_width: 0,
                    align_left,
                };
                Ok((Some(element), after - start))
            }
            letter => {
                let op = Self::letter_directive(letter)?;
                let element = Element {
                    kind: ElementKind::Expr(Expr::from_op(op, format!("%{}", letter))),
                    min_width,
                    max_width,
                    align_left,
                };
                Ok((Some(element), i - start + 1))
            }
        }
    }

    /// Parse `(expr)`: a partial expression parse followed by the closer.
    /// Returns the expression and the index just past the closer.
    fn parse_embedded(
        chars: &[char],
        expr_start: usize,
        closer: char,
        group_start: usize,
    ) -> FormatResult<(Expr, usize)> {
        let rest: String = chars[expr_start..].iter().collect();
        let (expr, consumed) = Expr::parse_partial(&rest).map_err(|e| ParseError {
            msg: e.msg,
            column: expr_start + e.column,
        })?;
        let mut i = expr_start + consumed;
        while chars.get(i).map(|c| c.is_whitespace()).unwrap_or(false) {
            i += 1;
        }
        if chars.get(i) != Some(&closer) {
            return Err(FormatError::Unterminated { column: group_start });
        }
        Ok((expr, i + 1))
    }

    /// Parse `{expr}` or `{expr, colorize}` and wrap the tree so that
    /// justification and colour are applied during evaluation.
    fn parse_amount_group(
        chars: &[char],
        expr_start: usize,
        min_width: usize,
        max_width: usize,
        align_left: bool,
        group_start: usize,
    ) -> FormatResult<(Expr, usize)> {
        let rest: String = chars[expr_start..].iter().collect();
        let (amount_expr, consumed) = Expr::parse_partial(&rest).map_err(|e| ParseError {
            msg: e.msg,
            column: expr_start + e.column,
        })?;
        let mut i = expr_start + consumed;
        while chars.get(i).map(|c| c.is_whitespace()).unwrap_or(false) {
            i += 1;
        }

        let colorize = if chars.get(i) == Some(&',') {
            let (colorize, after) = Self::parse_embedded(chars, i + 1, '}', group_start)?;
            i = after;
            Some(colorize)
        } else {
            if chars.get(i) != Some(&'}') {
                return Err(FormatError::Unterminated { column: group_start });
            }
            i += 1;
            None
        };

        let text = amount_expr.text().unwrap_or_default().to_string();
        let scrubbed = Op::Call {
            name: "scrub".to_string(),
            args: vec![amount_expr.op().clone()],
        };
        let min_arg = if min_width > 0 { min_width as i64 } else { -1 };
        let max_arg = if max_width > 0 { max_width as i64 } else { -1 };
        let justified = Op::Call {
            name: "justify".to_string(),
            args: vec![
                scrubbed,
                Op::Value(Value::Int(min_arg)),
                Op::Value(Value::Int(max_arg)),
                Op::Value(Value::Bool(!align_left)),
            ],
        };
        let wrapped = match colorize {
            Some(colorize) => Op::Call {
                name: "ansify_if".to_string(),
                args: vec![justified, colorize.op().clone()],
            },
            None => justified,
        };
        Ok((Expr::from_op(wrapped, text), i))
    }

    /// The single-letter built-in projections.
    fn letter_directive(letter: char) -> FormatResult<Op> {
        Ok(match letter {
            'd' => Op::Call { name: "format_date".to_string(), args: vec![Op::Date] },
            'D' => Op::Date,
            'X' => Op::binary(
                BinaryOp::Query,
                Op::Cleared,
                Op::binary(
                    BinaryOp::Colon,
                    Op::Value(Value::Str("* ".to_string())),
                    Op::Value(Value::Str(String::new())),
                ),
            ),
            'C' => Op::ident("code"),
            'P' => Op::ident("payee"),
            'a' => Op::ident("account"),
            'A' => Op::ident("account_base"),
            't' => Op::AmountExpr,
            'T' => Op::TotalExpr,
            'N' | 'n' => Op::ident("note"),
            other => return Err(FormatError::UnknownDirective(other)),
        })
    }

    /// Render against a bound item, producing the finished string.
    pub fn format(&self, scope: &BindScope<'_>) -> FormatResult<String> {
        let mut out = String::new();
        for element in &self.elements {
            let rendered = match &element.kind {
                ElementKind::Literal(text) => text.clone(),
                ElementKind::Expr(expr) => expr.calc(scope)?.to_string(),
            };
            out.push_str(&self.justify_element(element, rendered));
        }
        Ok(out)
    }

    fn justify_element(&self, element: &Element, rendered: String) -> String {
        let mut text = rendered;
        if element.max_width > 0 && text.chars().count() > element.max_width {
            text = truncate(&text, element.max_width, self.elision, self.account_abbrev);
        }
        let width = text.chars().count();
        if element.min_width > width {
            let padding = " ".repeat(element.min_width - width);
            if element.align_left {
                text.push_str(&padding);
            } else {
                text = format!("{}{}", padding, text);
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_styles_hit_exact_width() {
        let input = "abcdefghij";
        assert_eq!(truncate(input, 5, ElisionStyle::TruncateTrailing, 0), "abc..");
        assert_eq!(truncate(input, 5, ElisionStyle::TruncateLeading, 0), "..hij");
        assert_eq!(truncate(input, 6, ElisionStyle::TruncateMiddle, 0), "ab..ij");
        for style in [
            ElisionStyle::TruncateTrailing,
            ElisionStyle::TruncateLeading,
            ElisionStyle::TruncateMiddle,
        ] {
            assert_eq!(truncate(input, 7, style, 0).chars().count(), 7);
        }
    }

    #[test]
    fn test_truncate_counts_code_points() {
        let input = "aéîöûüabcd";
        let out = truncate(input, 6, ElisionStyle::TruncateTrailing, 0);
        assert_eq!(out.chars().count(), 6);
        assert_eq!(out, "aéîö..");
    }

    #[test]
    fn test_truncate_short_input_unchanged() {
        assert_eq!(truncate("abc", 10, ElisionStyle::TruncateTrailing, 0), "abc");
        assert_eq!(truncate("abc", 0, ElisionStyle::TruncateTrailing, 0), "abc");
    }

    #[test]
    fn test_abbreviate_shortens_inner_segments() {
        let out = truncate(
            "Expenses:Groceries:Vegetables",
            20,
            ElisionStyle::Abbreviate,
            2,
        );
        assert_eq!(out, "Ex:Gr:Vegetables");
        assert!(out.chars().count() <= 20);
    }

    #[test]
    fn test_abbreviate_keeps_leaf_via_leading_elision() {
        let out = truncate("Expenses:Groceries:Vegetables", 8, ElisionStyle::Abbreviate, 2);
        assert_eq!(out.chars().count(), 8);
        assert!(out.starts_with(".."));
    }

    #[test]
    fn test_parse_rejects_width_bound() {
        assert!(matches!(
            Format::parse("%5000(payee)"),
            Err(FormatError::WidthBound(5000))
        ));
    }

    #[test]
    fn test_parse_unterminated_group() {
        assert!(matches!(
            Format::parse("%(payee"),
            Err(FormatError::Unterminated { .. })
        ));
        assert!(matches!(
            Format::parse("%{amount"),
            Err(FormatError::Unterminated { .. })
        ));
    }

    #[test]
    fn test_parse_unknown_directive() {
        assert!(matches!(Format::parse("%q"), Err(FormatError::UnknownDirective('q'))));
    }

    #[test]
    fn test_escapes_and_percent() {
        let format = Format::parse("a\\tb\\n100%%").unwrap();
        let mut out = String::new();
        for element in &format.elements {
            if let ElementKind::Literal(text) = &element.kind {
                out.push_str(text);
            }
        }
        assert_eq!(out, "a\tb\n100%");
    }
}
