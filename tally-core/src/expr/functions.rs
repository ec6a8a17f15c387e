//! Built-in functions available to every expression

use crate::expr::scope::{BindScope, CallScope};
use crate::expr::{CalcError, CalcResult};
use crate::format::{truncate, ElisionStyle};
use crate::value::Value;
use tally_math::format_date;

/// Whether `name` is one of the built-in functions.
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "abs"
            | "ansify_if"
            | "format_date"
            | "justify"
            | "quantity"
            | "round"
            | "scrub"
            | "strip"
            | "truncated"
            | "value"
            | "market"
    )
}

/// Dispatch a built-in call with already-evaluated arguments.
pub fn call(name: &str, scope: &BindScope<'_>, args: &[Value]) -> CalcResult {
    let call = CallScope::new(scope, args);
    match name {
        "abs" => Ok(call.arg(name, 0)?.abs()?),
        "round" | "truncated" => Ok(call.arg(name, 0)?.truncated()),
        "strip" | "quantity" => Ok(call.arg(name, 0)?.stripped()?),
        "scrub" => scrub(&call, name),
        "justify" => justify(&call, name),
        "ansify_if" => ansify_if(&call, name),
        "value" | "market" => value_at(&call, name),
        "format_date" => format_date_fn(&call, name),
        other => Err(CalcError::InvalidCall {
            function: other.to_string(),
            msg: "not a built-in function".to_string(),
        }),
    }
}

/// Strip price annotations and cost markers before rendering; degenerate
/// balances collapse to their single amount.
fn scrub(call: &CallScope<'_, '_>, name: &str) -> CalcResult {
    Ok(call.arg(name, 0)?.clone().simplified())
}

fn int_arg(call: &CallScope<'_, '_>, name: &str, n: usize) -> CalcResult<i64> {
    match call.arg(name, n)? {
        Value::Int(i) => Ok(*i),
        other => Err(CalcError::InvalidCall {
            function: name.to_string(),
            msg: format!("argument {} must be an integer, got {}", n + 1, other.type_name()),
        }),
    }
}

/// `justify(value, min_width, max_width, right_aligned)` — render a value
/// padded to `min_width` and truncated to `max_width` (either may be -1
/// for "none"), right-aligned unless told otherwise.
fn justify(call: &CallScope<'_, '_>, name: &str) -> CalcResult {
    let rendered = call.arg(name, 0)?.to_string();
    let min_width = int_arg(call, name, 1)?;
    let max_width = int_arg(call, name, 2)?;
    let right_aligned = call.opt_arg(3).map(Value::is_truthy).unwrap_or(true);

    let mut text = rendered;
    if max_width > 0 {
        text = truncate(&text, max_width as usize, ElisionStyle::TruncateTrailing, 0);
    }
    if min_width > 0 {
        let width = text.chars().count();
        if width < min_width as usize {
            let padding = " ".repeat(min_width as usize - width);
            if right_aligned {
                text = format!("{}{}", padding, text);
            } else {
                text.push_str(&padding);
            }
        }
    }
    Ok(Value::Str(text))
}

/// `ansify_if(value, color)` — wrap the rendered value in ANSI SGR codes
/// when the second argument names a colour; render plain otherwise.
fn ansify_if(call: &CallScope<'_, '_>, name: &str) -> CalcResult {
    let rendered = call.arg(name, 0)?.to_string();
    let code = match call.opt_arg(1) {
        Some(Value::Str(color)) => match color.as_str() {
            "black" => Some("30"),
            "red" => Some("31"),
            "green" => Some("32"),
            "yellow" => Some("33"),
            "blue" => Some("34"),
            "magenta" => Some("35"),
            "cyan" => Some("36"),
            "white" => Some("37"),
            "bold" => Some("1"),
            _ => None,
        },
        _ => None,
    };
    Ok(Value::Str(match code {
        Some(code) => format!("\x1b[{}m{}\x1b[0m", code, rendered),
        None => rendered,
    }))
}

/// `value(x, t)` — price-historical valuation of `x` at `t`; without `t`,
/// at the bound item's date.
fn value_at(call: &CallScope<'_, '_>, name: &str) -> CalcResult {
    let subject = call.arg(name, 0)?;
    let date = match call.opt_arg(1) {
        Some(Value::Date(date)) => *date,
        Some(Value::DateTime(dt)) => dt.date(),
        Some(other) => {
            return Err(CalcError::InvalidCall {
                function: name.to_string(),
                msg: format!("expected a date, got {}", other.type_name()),
            })
        }
        None => call.scope.item_date(),
    };
    Ok(subject.value_at(date))
}

/// `format_date(d, fmt)` — render a date; without `fmt`, with the
/// report's date format.
fn format_date_fn(call: &CallScope<'_, '_>, name: &str) -> CalcResult {
    let date = match call.arg(name, 0)? {
        Value::Date(date) => *date,
        Value::DateTime(dt) => dt.date(),
        other => {
            return Err(CalcError::InvalidCall {
                function: name.to_string(),
                msg: format!("expected a date, got {}", other.type_name()),
            })
        }
    };
    let fmt = match call.opt_arg(1) {
        Some(Value::Str(fmt)) => fmt.clone(),
        _ => call.scope.report.date_format.clone(),
    };
    Ok(Value::Str(format_date(date, &fmt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::scope::ReportScope;
    use crate::journal::Journal;
    use chrono::NaiveDate;

    fn with_scope<T>(f: impl FnOnce(&BindScope<'_>) -> T) -> T {
        let journal = Journal::new();
        let report = ReportScope::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        let scope = BindScope::new(&report, &journal);
        f(&scope)
    }

    #[test]
    fn test_justify_pads_right_by_default() {
        let value = with_scope(|scope| {
            call(
                "justify",
                scope,
                &[
                    Value::Str("abc".to_string()),
                    Value::Int(6),
                    Value::Int(-1),
                    Value::Bool(true),
                ],
            )
            .unwrap()
        });
        assert_eq!(value, Value::Str("   abc".to_string()));
    }

    #[test]
    fn test_justify_truncates_to_max() {
        let value = with_scope(|scope| {
            call(
                "justify",
                scope,
                &[
                    Value::Str("abcdefgh".to_string()),
                    Value::Int(-1),
                    Value::Int(5),
                    Value::Bool(false),
                ],
            )
            .unwrap()
        });
        assert_eq!(value, Value::Str("abc..".to_string()));
    }

    #[test]
    fn test_ansify_if_wraps_known_colors_only() {
        let red = with_scope(|scope| {
            call(
                "ansify_if",
                scope,
                &[Value::Str("hi".to_string()), Value::Str("red".to_string())],
            )
            .unwrap()
        });
        assert_eq!(red, Value::Str("\x1b[31mhi\x1b[0m".to_string()));

        let plain = with_scope(|scope| {
            call("ansify_if", scope, &[Value::Str("hi".to_string()), Value::Bool(false)]).unwrap()
        });
        assert_eq!(plain, Value::Str("hi".to_string()));
    }

    #[test]
    fn test_format_date_uses_report_default() {
        let value = with_scope(|scope| {
            call(
                "format_date",
                scope,
                &[Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())],
            )
            .unwrap()
        });
        assert_eq!(value, Value::Str("2024-03-15".to_string()));
    }

    #[test]
    fn test_value_requires_date_argument_kind() {
        let err = with_scope(|scope| {
            call("value", scope, &[Value::Int(1), Value::Str("soon".to_string())]).unwrap_err()
        });
        assert!(matches!(err, CalcError::InvalidCall { .. }));
    }
}
