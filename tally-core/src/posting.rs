//! Posting representation: one side of a double-entry transaction

use chrono::NaiveDate;
use compact_str::CompactString;
use smallvec::SmallVec;
use tally_math::Amount;

use crate::account::AccountId;
use crate::transaction::{State, XactId};
use crate::value::Value;

/// Handle to a posting in the journal's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostId(pub(crate) usize);

bitflags::bitflags! {
    /// Posting flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostingFlags: u16 {
        /// Account was specified with (parens)
        const VIRTUAL = 0x0001;
        /// Virtual posting that must still balance
        const MUST_BALANCE = 0x0002;
        /// Amount was calculated rather than given
        const CALCULATED = 0x0004;
        /// Cost was calculated rather than given
        const COST_CALCULATED = 0x0008;
        /// Temporary posting synthesized during reporting
        const TEMP = 0x0010;
        /// Posting generated from an automated or periodic rule
        const GENERATED = 0x0020;
        /// Payee and account were anonymized
        const ANONYMIZED = 0x0040;
    }
}

bitflags::bitflags! {
    /// Per-report posting state flags, kept in xdata
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostXFlags: u16 {
        /// Posting entered a buffering stage
        const RECEIVED = 0x0001;
        /// Posting was already emitted by an expanding stage
        const HANDLED = 0x0002;
        /// Posting was shown (or scheduled to be shown)
        const DISPLAYED = 0x0004;
        /// The amount in xdata is to be rendered verbatim
        const DIRECT_AMT = 0x0008;
        /// Sort keys have been computed
        const SORT_CALC = 0x0010;
        /// The value lives in `compound_value`
        const COMPOUND = 0x0020;
        /// Posting was visited by the running-total stage
        const VISITED = 0x0040;
        /// Posting matched a report predicate
        const MATCHES = 0x0080;
    }
}

/// Per-report state hung off a posting, allocated on first use and
/// discarded when the report ends.
#[derive(Debug, Clone, Default)]
pub struct PostExtData {
    /// Amount as evaluated by the report's amount expression
    pub visited_value: Option<Value>,
    /// Multi-commodity or sequence value for synthetic postings
    pub compound_value: Option<Value>,
    /// Running total at this posting
    pub total: Option<Value>,
    /// Running cost-basis total at this posting
    pub cost_total: Option<Value>,
    /// Running posting count
    pub count: usize,
    /// Displayed-date override
    pub date: Option<NaiveDate>,
    /// Effective-date override
    pub value_date: Option<NaiveDate>,
    /// Account override for grouped reports
    pub reported_account: Option<AccountId>,
    /// Cached sort keys
    pub sort_values: SmallVec<[Value; 2]>,
    /// Report-scoped flags
    pub flags: PostXFlags,
}

/// One side of a transaction, attributing an amount to an account.
#[derive(Debug, Clone)]
pub struct Posting {
    /// Owning transaction
    pub xact: XactId,
    /// Debited or credited account
    pub account: AccountId,
    /// Posted amount
    pub amount: Amount,
    /// Optional conversion cost
    pub cost: Option<Amount>,
    /// State override; `None` inherits the transaction state
    pub state: Option<State>,
    /// Flags
    pub flags: PostingFlags,
    /// Optional note
    pub note: Option<CompactString>,
    /// Arrival order within the journal
    pub sequence: usize,
    /// Extended data, lazily allocated during reporting
    pub xdata: Option<Box<PostExtData>>,
}

impl Posting {
    /// Create a posting against an account. The transaction handle is
    /// assigned when the posting is added to the journal.
    pub fn new(account: AccountId, amount: Amount) -> Self {
        Posting {
            xact: XactId::NONE,
            account,
            amount,
            cost: None,
            state: None,
            flags: PostingFlags::default(),
            note: None,
            sequence: 0,
            xdata: None,
        }
    }

    /// Whether the posting is virtual (parenthesized account).
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(PostingFlags::VIRTUAL)
    }

    /// Whether the posting participates in transaction balancing.
    pub fn must_balance(&self) -> bool {
        !self.is_virtual() || self.flags.contains(PostingFlags::MUST_BALANCE)
    }

    /// Whether this is a temporary reporting posting.
    pub fn is_temp(&self) -> bool {
        self.flags.contains(PostingFlags::TEMP)
    }

    /// Whether the posting was generated rather than written by hand.
    pub fn is_generated(&self) -> bool {
        self.flags.contains(PostingFlags::GENERATED)
    }

    /// The cost if given, else the amount itself.
    pub fn cost_or_amount(&self) -> &Amount {
        self.cost.as_ref().unwrap_or(&self.amount)
    }

    /// Extended data, allocating it on first access.
    pub fn xdata(&mut self) -> &mut PostExtData {
        self.xdata.get_or_insert_with(Default::default)
    }

    /// Whether extended data has been allocated.
    pub fn has_xdata(&self) -> bool {
        self.xdata.is_some()
    }

    /// Drop the extended data.
    pub fn clear_xdata(&mut self) {
        self.xdata = None;
    }

    /// Check a report-scoped flag without allocating xdata.
    pub fn has_xflags(&self, flags: PostXFlags) -> bool {
        self.xdata.as_ref().map(|x| x.flags.contains(flags)).unwrap_or(false)
    }

    /// The account this posting reports under: the xdata override when a
    /// grouping stage set one, else the real account.
    pub fn reported_account(&self) -> AccountId {
        self.xdata
            .as_ref()
            .and_then(|x| x.reported_account)
            .unwrap_or(self.account)
    }

    /// Copy amount, cost, state, flags and note from another posting.
    pub fn copy_details(&mut self, other: &Posting) {
        self.account = other.account;
        self.amount = other.amount.clone();
        self.cost = other.cost.clone();
        self.state = other.state;
        self.flags = other.flags;
        self.note = other.note.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_balance() {
        let mut post = Posting::new(AccountId(1), Amount::from_i64(1));
        assert!(post.must_balance());
        post.flags.insert(PostingFlags::VIRTUAL);
        assert!(!post.must_balance());
        post.flags.insert(PostingFlags::MUST_BALANCE);
        assert!(post.must_balance());
    }

    #[test]
    fn test_reported_account_override() {
        let mut post = Posting::new(AccountId(1), Amount::from_i64(1));
        assert_eq!(post.reported_account(), AccountId(1));
        post.xdata().reported_account = Some(AccountId(9));
        assert_eq!(post.reported_account(), AccountId(9));
        post.clear_xdata();
        assert_eq!(post.reported_account(), AccountId(1));
    }

    #[test]
    fn test_cost_or_amount() {
        let mut post = Posting::new(AccountId(1), Amount::parse("1.00 EUR").unwrap());
        assert_eq!(post.cost_or_amount().symbol(), "EUR");
        post.cost = Some(Amount::parse("1.10 USD").unwrap());
        assert_eq!(post.cost_or_amount().symbol(), "USD");
    }
}
