//! Hierarchical account structure
//!
//! Accounts form a naming tree rooted at a nameless depth-0 node. The
//! journal owns every account in an arena; parent and child links are
//! handles into that arena, which keeps the parent back-references cycle
//! free.

use std::collections::BTreeMap;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::posting::PostId;
use crate::value::Value;

/// Handle to an account in the journal's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub(crate) usize);

bitflags::bitflags! {
    /// Account state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountFlags: u8 {
        /// Account was declared, not inferred
        const KNOWN = 0x01;
        /// Temporary account created during reporting
        const TEMP = 0x02;
        /// Account synthesized by a filter stage
        const GENERATED = 0x04;
    }
}

bitflags::bitflags! {
    /// Per-report account state flags, kept in xdata
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountXFlags: u16 {
        /// Sort keys have been computed
        const SORT_CALC = 0x01;
        /// At least one non-virtual posting was seen
        const HAS_NON_VIRTUALS = 0x02;
        /// At least one unbalanced virtual posting was seen
        const HAS_UNB_VIRTUALS = 0x04;
        /// Subtotalling may render this account as virtual
        const AUTO_VIRTUALIZE = 0x08;
        /// A posting of this account passed through the chain
        const VISITED = 0x10;
        /// Account matched a report predicate
        const MATCHING = 0x20;
        /// Account is scheduled for display
        const TO_DISPLAY = 0x40;
        /// Account has been displayed
        const DISPLAYED = 0x80;
    }
}

/// Per-report state hung off an account, allocated on first use and
/// discarded when the report ends.
#[derive(Debug, Clone, Default)]
pub struct AccountExtData {
    /// Sum of this account's own visited postings
    pub value: Value,
    /// Running total including descendants
    pub total: Value,
    /// Number of postings visited for this account
    pub count: usize,
    /// Number of postings including descendants
    pub total_count: usize,
    /// Report-scoped flags
    pub flags: AccountXFlags,
    /// Cached sort keys for sorted traversal
    pub sort_values: SmallVec<[Value; 2]>,
}

/// A node in the account naming tree.
#[derive(Debug)]
pub struct Account {
    /// Single name segment, e.g. `"Checking"`
    pub name: CompactString,
    /// Parent handle; `None` only for the root
    pub parent: Option<AccountId>,
    /// Child accounts keyed by segment name, iterated in name order
    pub children: BTreeMap<CompactString, AccountId>,
    /// Tree depth: root is 0, each child one more than its parent
    pub depth: usize,
    /// Optional declared note
    pub note: Option<String>,
    /// Account state flags
    pub flags: AccountFlags,
    /// Postings referencing this account, in arrival order
    pub posts: Vec<PostId>,
    /// Extended data, lazily allocated during reporting
    pub xdata: Option<Box<AccountExtData>>,
    fullname: String,
}

impl Account {
    pub(crate) fn new(
        name: CompactString,
        parent: Option<AccountId>,
        parent_fullname: &str,
        depth: usize,
    ) -> Self {
        let fullname = if parent_fullname.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", parent_fullname, name)
        };
        Account {
            name,
            parent,
            children: BTreeMap::new(),
            depth,
            note: None,
            flags: AccountFlags::default(),
            posts: Vec::new(),
            xdata: None,
            fullname,
        }
    }

    /// The full colon-joined name, e.g. `"Assets:Bank:Checking"`.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// The account's own segment name.
    pub fn partial_name(&self) -> &str {
        &self.name
    }

    /// Whether this is a temporary reporting account.
    pub fn is_temp(&self) -> bool {
        self.flags.contains(AccountFlags::TEMP)
    }

    /// Extended data, allocating it on first access.
    pub fn xdata(&mut self) -> &mut AccountExtData {
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
    pub fn has_xflags(&self, flags: AccountXFlags) -> bool {
        self.xdata.as_ref().map(|x| x.flags.contains(flags)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullname_joins_segments() {
        let root = Account::new(CompactString::new(""), None, "", 0);
        assert_eq!(root.fullname(), "");

        let assets = Account::new(CompactString::new("Assets"), Some(AccountId(0)), "", 1);
        assert_eq!(assets.fullname(), "Assets");

        let bank =
            Account::new(CompactString::new("Bank"), Some(AccountId(1)), assets.fullname(), 2);
        assert_eq!(bank.fullname(), "Assets:Bank");
        assert_eq!(bank.partial_name(), "Bank");
        assert_eq!(bank.depth, 2);
    }

    #[test]
    fn test_xdata_lazy_allocation() {
        let mut account = Account::new(CompactString::new("Assets"), None, "", 1);
        assert!(!account.has_xdata());
        account.xdata().flags.insert(AccountXFlags::VISITED);
        assert!(account.has_xflags(AccountXFlags::VISITED));
        account.clear_xdata();
        assert!(!account.has_xdata());
        assert!(!account.has_xflags(AccountXFlags::VISITED));
    }
}
