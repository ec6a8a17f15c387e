//! Date parsing, formatting, and the period intervals used for grouping

use std::fmt::Write as _;

use chrono::{Datelike, Days, Months, NaiveDate};
use thiserror::Error;

/// Result type for date operations
pub type DateResult<T> = Result<T, DateError>;

/// Errors from date and period parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateError {
    /// Unparseable date string
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    /// Unparseable or unusable period expression
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Parse a date in `%Y-%m-%d` or `%Y/%m/%d` form.
pub fn parse_date(input: &str) -> DateResult<NaiveDate> {
    let input = input.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, fmt) {
            return Ok(date);
        }
    }
    Err(DateError::InvalidDate(input.to_string()))
}

/// Render a date with a chrono format string, falling back to ISO output
/// if the format is malformed.
pub fn format_date(date: NaiveDate, fmt: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", date.format(fmt)).is_err() {
        out.clear();
        let _ = write!(out, "{}", date.format("%Y-%m-%d"));
    }
    out
}

/// The length of one reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalDuration {
    /// N-day periods
    Days(u32),
    /// N-week periods, aligned to Mondays
    Weeks(u32),
    /// N-month periods, aligned to the first of the month
    Months(u32),
    /// N-quarter periods, aligned to quarter starts
    Quarters(u32),
    /// N-year periods, aligned to January 1st
    Years(u32),
}

impl IntervalDuration {
    /// The start of the next period after `date`.
    pub fn add_to(&self, date: NaiveDate) -> NaiveDate {
        match *self {
            IntervalDuration::Days(n) => date + Days::new(u64::from(n)),
            IntervalDuration::Weeks(n) => date + Days::new(u64::from(n) * 7),
            IntervalDuration::Months(n) => date + Months::new(n),
            IntervalDuration::Quarters(n) => date + Months::new(n * 3),
            IntervalDuration::Years(n) => date + Months::new(n * 12),
        }
    }

    /// The natural period boundary at or before `date`.
    pub fn align(&self, date: NaiveDate) -> NaiveDate {
        match *self {
            IntervalDuration::Days(_) => date,
            IntervalDuration::Weeks(_) => {
                date - Days::new(u64::from(date.weekday().num_days_from_monday()))
            }
            IntervalDuration::Months(_) => date.with_day(1).unwrap_or(date),
            IntervalDuration::Quarters(_) => {
                let month = ((date.month0() / 3) * 3) + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            IntervalDuration::Years(_) => {
                NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
            }
        }
    }
}

/// A half-open date range `[start, next)` with an optional repeat duration
/// and an optional overall end. The grouping filters advance the interval
/// period by period as postings stream through.
#[derive(Debug, Clone, PartialEq)]
pub struct DateInterval {
    /// Start of the current period (and of the range, before any advance)
    pub start: Option<NaiveDate>,
    /// Exclusive end of the overall range
    pub end: Option<NaiveDate>,
    /// Period length, if this interval repeats
    pub duration: Option<IntervalDuration>,
    /// Start of the period after the current one
    pub next: Option<NaiveDate>,
}

impl DateInterval {
    /// An unbounded, non-repeating interval.
    pub fn new() -> Self {
        DateInterval { start: None, end: None, duration: None, next: None }
    }

    /// A repeating interval with no fixed start; the first posting seen
    /// anchors it to a natural boundary.
    pub fn with_duration(duration: IntervalDuration) -> Self {
        DateInterval { start: None, end: None, duration: Some(duration), next: None }
    }

    /// Parse a period expression: `daily`, `weekly`, `biweekly`,
    /// `monthly`, `quarterly`, `yearly`, `every N days|weeks|months|
    /// quarters|years`, each optionally followed by `from <date>` and/or
    /// `to <date>`, or a bare date.
    pub fn parse(input: &str) -> DateResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DateError::InvalidInterval("empty period expression".to_string()));
        }

        if let Ok(date) = parse_date(input) {
            return Ok(DateInterval {
                start: Some(date),
                end: None,
                duration: None,
                next: None,
            });
        }

        let words: Vec<&str> = input.split_whitespace().collect();
        let mut interval = DateInterval::new();
        let mut i = 0;

        match words[0] {
            "daily" => {
                interval.duration = Some(IntervalDuration::Days(1));
                i = 1;
            }
            "weekly" => {
                interval.duration = Some(IntervalDuration::Weeks(1));
                i = 1;
            }
            "biweekly" => {
                interval.duration = Some(IntervalDuration::Weeks(2));
                i = 1;
            }
            "monthly" => {
                interval.duration = Some(IntervalDuration::Months(1));
                i = 1;
            }
            "quarterly" => {
                interval.duration = Some(IntervalDuration::Quarters(1));
                i = 1;
            }
            "yearly" => {
                interval.duration = Some(IntervalDuration::Years(1));
                i = 1;
            }
            "every" => {
                if words.len() < 3 {
                    return Err(DateError::InvalidInterval(input.to_string()));
                }
                let count: u32 = words[1]
                    .parse()
                    .map_err(|_| DateError::InvalidInterval(input.to_string()))?;
                interval.duration = Some(match words[2] {
                    "day" | "days" => IntervalDuration::Days(count),
                    "week" | "weeks" => IntervalDuration::Weeks(count),
                    "month" | "months" => IntervalDuration::Months(count),
                    "quarter" | "quarters" => IntervalDuration::Quarters(count),
                    "year" | "years" => IntervalDuration::Years(count),
                    other => return Err(DateError::InvalidInterval(other.to_string())),
                });
                i = 3;
            }
            _ => {}
        }

        while i < words.len() {
            match words[i] {
                "from" | "since" => {
                    if i + 1 >= words.len() {
                        return Err(DateError::InvalidInterval(input.to_string()));
                    }
                    interval.start = Some(parse_date(words[i + 1])?);
                    i += 2;
                }
                "to" | "until" => {
                    if i + 1 >= words.len() {
                        return Err(DateError::InvalidInterval(input.to_string()));
                    }
                    interval.end = Some(parse_date(words[i + 1])?);
                    i += 2;
                }
                other => return Err(DateError::InvalidInterval(other.to_string())),
            }
        }

        if interval.duration.is_none() && interval.start.is_none() && interval.end.is_none() {
            return Err(DateError::InvalidInterval(input.to_string()));
        }
        Ok(interval)
    }

    /// Position the interval on the period containing `date`, anchoring an
    /// unanchored repeating interval to the natural boundary. Returns
    /// false when the date falls outside the interval's range.
    pub fn find_period(&mut self, date: NaiveDate) -> bool {
        if let Some(end) = self.end {
            if date >= end {
                return false;
            }
        }

        let duration = match self.duration {
            None => return self.start.map_or(true, |start| date >= start),
            Some(duration) => duration,
        };

        if self.start.is_none() {
            self.start = Some(duration.align(date));
        }
        let mut start = match self.start {
            Some(start) => start,
            None => return false,
        };
        if date < start {
            return false;
        }

        let mut next = self.next.unwrap_or_else(|| duration.add_to(start));
        while next <= date {
            start = next;
            next = duration.add_to(next);
            if let Some(end) = self.end {
                if start >= end {
                    self.start = Some(start);
                    self.next = Some(next);
                    return false;
                }
            }
        }
        self.start = Some(start);
        self.next = Some(next);
        true
    }

    /// The last day inside the current period.
    pub fn inclusive_end(&self) -> Option<NaiveDate> {
        match (self.next, self.end) {
            (Some(next), _) => next.pred_opt(),
            (None, Some(end)) => end.pred_opt(),
            (None, None) => None,
        }
    }

    /// Step to the following period.
    pub fn advance(&mut self) {
        let duration = match self.duration {
            Some(duration) => duration,
            None => return,
        };
        let start = match (self.next, self.start) {
            (Some(next), _) => next,
            (None, Some(start)) => duration.add_to(start),
            (None, None) => return,
        };
        self.start = Some(start);
        self.next = Some(duration.add_to(start));
    }
}

impl Default for DateInterval {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_bare_date() {
        let interval = DateInterval::parse("2024-04-01").unwrap();
        assert_eq!(interval.start, Some(date(2024, 4, 1)));
        assert!(interval.duration.is_none());
    }

    #[test]
    fn test_parse_monthly_from() {
        let interval = DateInterval::parse("monthly from 2024-01-01").unwrap();
        assert_eq!(interval.duration, Some(IntervalDuration::Months(1)));
        assert_eq!(interval.start, Some(date(2024, 1, 1)));
    }

    #[test]
    fn test_parse_every_two_weeks() {
        let interval = DateInterval::parse("every 2 weeks").unwrap();
        assert_eq!(interval.duration, Some(IntervalDuration::Weeks(2)));
    }

    #[test]
    fn test_parse_rejects_nonsense() {
        assert!(DateInterval::parse("fortnightly").is_err());
        assert!(DateInterval::parse("every wednesday").is_err());
        assert!(DateInterval::parse("").is_err());
    }

    #[test]
    fn test_find_period_anchors_to_month_start() {
        let mut interval = DateInterval::with_duration(IntervalDuration::Months(1));
        assert!(interval.find_period(date(2024, 1, 15)));
        assert_eq!(interval.start, Some(date(2024, 1, 1)));
        assert_eq!(interval.next, Some(date(2024, 2, 1)));
        assert_eq!(interval.inclusive_end(), Some(date(2024, 1, 31)));
    }

    #[test]
    fn test_find_period_advances_across_months() {
        let mut interval = DateInterval::with_duration(IntervalDuration::Months(1));
        assert!(interval.find_period(date(2024, 1, 15)));
        assert!(interval.find_period(date(2024, 3, 2)));
        assert_eq!(interval.start, Some(date(2024, 3, 1)));
    }

    #[test]
    fn test_find_period_respects_end() {
        let mut interval = DateInterval::parse("monthly to 2024-03-01").unwrap();
        assert!(interval.find_period(date(2024, 2, 10)));
        assert!(!interval.find_period(date(2024, 3, 10)));
    }

    #[test]
    fn test_find_period_before_start() {
        let mut interval = DateInterval::parse("monthly from 2024-02-01").unwrap();
        assert!(!interval.find_period(date(2024, 1, 20)));
        assert!(interval.find_period(date(2024, 2, 20)));
    }

    #[test]
    fn test_advance_steps_one_period() {
        let mut interval = DateInterval::parse("monthly from 2024-01-01").unwrap();
        assert!(interval.find_period(date(2024, 1, 1)));
        interval.advance();
        assert_eq!(interval.start, Some(date(2024, 2, 1)));
        assert_eq!(interval.next, Some(date(2024, 3, 1)));
    }

    #[test]
    fn test_weekly_aligns_to_monday() {
        let mut interval = DateInterval::with_duration(IntervalDuration::Weeks(1));
        // 2024-01-10 is a Wednesday
        assert!(interval.find_period(date(2024, 1, 10)));
        assert_eq!(interval.start, Some(date(2024, 1, 8)));
        assert_eq!(interval.start.unwrap().weekday(), Weekday::Mon);
    }

    #[test]
    fn test_format_date_fallback() {
        assert_eq!(format_date(date(2024, 3, 15), "%Y-%m-%d"), "2024-03-15");
        assert_eq!(format_date(date(2024, 3, 15), "%As"), "Fridays");
    }
}
