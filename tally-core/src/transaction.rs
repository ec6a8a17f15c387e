//! Transaction (xact) representation

use chrono::NaiveDate;

use crate::posting::PostId;

/// Handle to a transaction in the journal's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XactId(pub(crate) usize);

impl XactId {
    /// Sentinel for a posting not yet attached to a transaction.
    pub(crate) const NONE: XactId = XactId(usize::MAX);
}

/// Clearing state of a transaction or posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Not yet reconciled
    #[default]
    Uncleared,
    /// Reconciliation pending (`!`)
    Pending,
    /// Cleared (`*`)
    Cleared,
}

bitflags::bitflags! {
    /// Transaction flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XactFlags: u8 {
        /// Temporary transaction synthesized during reporting
        const TEMP = 0x01;
        /// Transaction generated from a periodic template
        const GENERATED = 0x02;
    }
}

/// A dated collection of postings whose amounts sum to zero per commodity.
///
/// The balancing invariant is enforced by the journal source; the
/// reporting core relies on it and only synthesizes intentionally
/// unbalanced temporaries (subtotal lines, forecasts) flagged `TEMP`.
#[derive(Debug, Clone)]
pub struct Xact {
    /// Primary date
    pub date: NaiveDate,
    /// Optional effective date, used by effective-date reports
    pub effective_date: Option<NaiveDate>,
    /// Clearing state
    pub state: State,
    /// Payee line
    pub payee: String,
    /// Optional transaction code
    pub code: Option<String>,
    /// Optional note
    pub note: Option<String>,
    /// Flags
    pub flags: XactFlags,
    /// Postings, in source order
    pub posts: Vec<PostId>,
}

impl Xact {
    /// Create a transaction with the given date and payee.
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        Xact {
            date,
            effective_date: None,
            state: State::default(),
            payee: payee.into(),
            code: None,
            note: None,
            flags: XactFlags::default(),
            posts: Vec::new(),
        }
    }

    /// The effective date, falling back to the primary date.
    pub fn effective_date(&self) -> NaiveDate {
        self.effective_date.unwrap_or(self.date)
    }

    /// Whether this is a temporary reporting transaction.
    pub fn is_temp(&self) -> bool {
        self.flags.contains(XactFlags::TEMP)
    }

    /// Copy the identifying details of another transaction onto this one,
    /// leaving the posting list alone.
    pub fn copy_details(&mut self, other: &Xact) {
        self.date = other.date;
        self.effective_date = other.effective_date;
        self.state = other.state;
        self.payee = other.payee.clone();
        self.code = other.code.clone();
        self.note = other.note.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_date_fallback() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let mut xact = Xact::new(date, "Grocer");
        assert_eq!(xact.effective_date(), date);

        let effective = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        xact.effective_date = Some(effective);
        assert_eq!(xact.effective_date(), effective);
    }

    #[test]
    fn test_copy_details_leaves_posts() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let mut src = Xact::new(date, "Grocer");
        src.code = Some("42".to_string());
        src.state = State::Cleared;

        let mut dst = Xact::new(date, "");
        dst.posts.push(PostId(7));
        dst.copy_details(&src);
        assert_eq!(dst.payee, "Grocer");
        assert_eq!(dst.code.as_deref(), Some("42"));
        assert_eq!(dst.state, State::Cleared);
        assert_eq!(dst.posts, vec![PostId(7)]);
    }
}
