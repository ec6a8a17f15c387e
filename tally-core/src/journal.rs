//! Journal: arenas of accounts, transactions and postings
//!
//! The journal owns every item touched during a run. Items address one
//! another through integer handles, so the cyclic account↔parent and
//! posting↔transaction references stay simple owned data. During a report
//! the arenas are append-only: filter stages synthesize temporary items at
//! the tail, and `clear_transients` truncates back to the checkpoint when
//! the pipeline is torn down.

use chrono::NaiveDate;
use compact_str::CompactString;
use tally_math::{Amount, CommodityPool, DateInterval};

use crate::account::{Account, AccountId};
use crate::posting::{PostId, Posting, PostingFlags};
use crate::transaction::{State, Xact, XactFlags, XactId};

/// A periodic transaction template: a repeat interval plus a transaction
/// whose postings describe the expected flow per period. Consumed by the
/// budget and forecast stages.
#[derive(Debug, Clone)]
pub struct PeriodXact {
    /// The repeat schedule
    pub period: DateInterval,
    /// Template transaction
    pub xact: XactId,
}

/// Arena sizes at a point in time, used to roll back temporary items.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    accounts: usize,
    xacts: usize,
    posts: usize,
}

/// The root container for a single run.
#[derive(Debug, Default)]
pub struct Journal {
    accounts: Vec<Account>,
    xacts: Vec<Xact>,
    posts: Vec<Posting>,
    /// Periodic templates for budgeting and forecasting
    pub period_xacts: Vec<PeriodXact>,
    /// Commodities seen by this journal
    pub commodities: CommodityPool,
}

impl Journal {
    /// Create a journal holding only the root account.
    pub fn new() -> Self {
        let mut journal = Journal::default();
        journal.accounts.push(Account::new(CompactString::new(""), None, "", 0));
        journal
    }

    /// The root of the account tree.
    pub fn root(&self) -> AccountId {
        AccountId(0)
    }

    /// Borrow an account.
    pub fn account(&self, id: AccountId) -> &Account {
        &self.accounts[id.0]
    }

    /// Borrow an account mutably.
    pub fn account_mut(&mut self, id: AccountId) -> &mut Account {
        &mut self.accounts[id.0]
    }

    /// Borrow a transaction.
    pub fn xact(&self, id: XactId) -> &Xact {
        &self.xacts[id.0]
    }

    /// Borrow a transaction mutably.
    pub fn xact_mut(&mut self, id: XactId) -> &mut Xact {
        &mut self.xacts[id.0]
    }

    /// Borrow a posting.
    pub fn post(&self, id: PostId) -> &Posting {
        &self.posts[id.0]
    }

    /// Borrow a posting mutably.
    pub fn post_mut(&mut self, id: PostId) -> &mut Posting {
        &mut self.posts[id.0]
    }

    /// Find an account by its full colon-joined name, optionally creating
    /// the missing tail of the path. This is the journal's single account
    /// mutation channel; reporting code treats it as append-only.
    pub fn find_account(&mut self, name: &str, auto_create: bool) -> Option<AccountId> {
        let mut current = self.root();
        if name.is_empty() {
            return Some(current);
        }
        for segment in name.split(':') {
            let segment = CompactString::new(segment);
            match self.accounts[current.0].children.get(&segment) {
                Some(&child) => current = child,
                None => {
                    if !auto_create {
                        return None;
                    }
                    let id = AccountId(self.accounts.len());
                    let parent = &self.accounts[current.0];
                    let account = Account::new(
                        segment.clone(),
                        Some(current),
                        parent.fullname(),
                        parent.depth + 1,
                    );
                    self.accounts.push(account);
                    self.accounts[current.0].children.insert(segment, id);
                    current = id;
                }
            }
        }
        Some(current)
    }

    /// Append a transaction.
    pub fn add_xact(&mut self, xact: Xact) -> XactId {
        let id = XactId(self.xacts.len());
        self.xacts.push(xact);
        id
    }

    /// Append a posting to a transaction, linking it into the transaction
    /// and its account.
    pub fn add_post(&mut self, xact: XactId, mut posting: Posting) -> PostId {
        let id = PostId(self.posts.len());
        posting.xact = xact;
        posting.sequence = id.0;
        let account = posting.account;
        self.posts.push(posting);
        self.xacts[xact.0].posts.push(id);
        self.accounts[account.0].posts.push(id);
        id
    }

    /// Register a periodic transaction template. The template is flagged
    /// generated so ordinary posting iteration skips it; only the budget
    /// and forecast stages consume templates.
    pub fn add_period_xact(&mut self, period: DateInterval, xact: XactId) {
        self.xacts[xact.0].flags.insert(XactFlags::GENERATED);
        self.period_xacts.push(PeriodXact { period, xact });
    }

    /// Number of transactions, temporaries included.
    pub fn xact_count(&self) -> usize {
        self.xacts.len()
    }

    /// Handles of all ordinary transactions (temporaries and periodic
    /// templates excluded), in document order.
    pub fn xact_ids(&self) -> Vec<XactId> {
        (0..self.xacts.len())
            .map(XactId)
            .filter(|id| {
                !self.xacts[id.0]
                    .flags
                    .intersects(XactFlags::TEMP | XactFlags::GENERATED)
            })
            .collect()
    }

    /// Handles of all ordinary postings, in document order.
    pub fn journal_posts(&self) -> Vec<PostId> {
        let mut ids = Vec::new();
        for xact in &self.xacts {
            if xact.flags.intersects(XactFlags::TEMP | XactFlags::GENERATED) {
                continue;
            }
            for &post in &xact.posts {
                if !self.posts[post.0].is_temp() {
                    ids.push(post);
                }
            }
        }
        ids
    }

    /// The date a posting reports under: its xdata override if a stage set
    /// one, else its transaction's date.
    pub fn post_date(&self, id: PostId) -> NaiveDate {
        let post = &self.posts[id.0];
        if let Some(xdata) = &post.xdata {
            if let Some(date) = xdata.date {
                return date;
            }
        }
        self.xacts[post.xact.0].date
    }

    /// The payee a posting reports under (its transaction's payee).
    pub fn post_payee(&self, id: PostId) -> &str {
        &self.xacts[self.posts[id.0].xact.0].payee
    }

    /// Effective clearing state: the posting override, else the
    /// transaction state.
    pub fn post_state(&self, id: PostId) -> State {
        let post = &self.posts[id.0];
        post.state.unwrap_or(self.xacts[post.xact.0].state)
    }

    /// Current arena sizes; pass to `clear_transients` after a report.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            accounts: self.accounts.len(),
            xacts: self.xacts.len(),
            posts: self.posts.len(),
        }
    }

    /// Tear down everything a report created: drop items appended after
    /// the checkpoint, unlink them from surviving accounts and
    /// transactions, and discard all xdata.
    pub fn clear_transients(&mut self, checkpoint: Checkpoint) {
        let doomed_parents: Vec<(AccountId, CompactString)> = self.accounts
            [checkpoint.accounts..]
            .iter()
            .filter_map(|account| {
                account.parent.map(|parent| (parent, account.name.clone()))
            })
            .collect();
        for (parent, name) in doomed_parents {
            if parent.0 < checkpoint.accounts {
                self.accounts[parent.0].children.remove(&name);
            }
        }
        self.accounts.truncate(checkpoint.accounts);
        self.xacts.truncate(checkpoint.xacts);
        self.posts.truncate(checkpoint.posts);

        for account in &mut self.accounts {
            account.posts.retain(|p| p.0 < checkpoint.posts);
            account.clear_xdata();
        }
        for xact in &mut self.xacts {
            xact.posts.retain(|p| p.0 < checkpoint.posts);
        }
        for post in &mut self.posts {
            post.clear_xdata();
        }
    }

    /// Discard all xdata without touching the arenas.
    pub fn clear_xdata(&mut self) {
        for account in &mut self.accounts {
            account.clear_xdata();
        }
        for post in &mut self.posts {
            post.clear_xdata();
        }
    }

    /// Synthesize a temporary transaction.
    pub fn temp_xact(&mut self, payee: impl Into<String>, date: NaiveDate) -> XactId {
        let mut xact = Xact::new(date, payee);
        xact.flags.insert(XactFlags::TEMP);
        self.add_xact(xact)
    }

    /// Synthesize a temporary posting with a fresh amount.
    pub fn temp_post(&mut self, xact: XactId, account: AccountId, amount: Amount) -> PostId {
        let mut posting = Posting::new(account, amount);
        posting.flags.insert(PostingFlags::TEMP);
        self.add_post(xact, posting)
    }

    /// Synthesize a temporary copy of an existing posting under another
    /// transaction.
    pub fn temp_post_copy(&mut self, source: PostId, xact: XactId) -> PostId {
        let mut posting = Posting::new(self.posts[source.0].account, Amount::zero());
        posting.copy_details(&self.posts[source.0]);
        posting.flags.insert(PostingFlags::TEMP);
        self.add_post(xact, posting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_find_account_creates_path() {
        let mut journal = Journal::new();
        let id = journal.find_account("Assets:Bank:Checking", true).unwrap();
        let account = journal.account(id);
        assert_eq!(account.fullname(), "Assets:Bank:Checking");
        assert_eq!(account.depth, 3);

        let parent = journal.account(account.parent.unwrap());
        assert_eq!(parent.fullname(), "Assets:Bank");
        assert_eq!(parent.depth, 2);
    }

    #[test]
    fn test_find_account_no_autocreate() {
        let mut journal = Journal::new();
        assert!(journal.find_account("Assets", false).is_none());
        let created = journal.find_account("Assets", true).unwrap();
        assert_eq!(journal.find_account("Assets", false), Some(created));
    }

    #[test]
    fn test_siblings_unique_by_name() {
        let mut journal = Journal::new();
        let a = journal.find_account("Assets:Cash", true).unwrap();
        let b = journal.find_account("Assets:Cash", true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_add_post_links_everything() {
        let mut journal = Journal::new();
        let account = journal.find_account("Expenses:Food", true).unwrap();
        let xact = journal.add_xact(Xact::new(date(2024, 1, 2), "Grocer"));
        let post =
            journal.add_post(xact, Posting::new(account, Amount::parse("10.00 USD").unwrap()));

        assert_eq!(journal.post(post).xact, xact);
        assert_eq!(journal.xact(xact).posts, vec![post]);
        assert_eq!(journal.account(account).posts, vec![post]);
        assert_eq!(journal.post_date(post), date(2024, 1, 2));
        assert_eq!(journal.post_payee(post), "Grocer");
    }

    #[test]
    fn test_clear_transients_rolls_back() {
        let mut journal = Journal::new();
        let account = journal.find_account("Expenses:Food", true).unwrap();
        let xact = journal.add_xact(Xact::new(date(2024, 1, 2), "Grocer"));
        journal.add_post(xact, Posting::new(account, Amount::parse("10.00 USD").unwrap()));

        let checkpoint = journal.checkpoint();
        let temp_xact = journal.temp_xact("Subtotal", date(2024, 1, 31));
        let temp_account = journal.find_account("<Total>", true).unwrap();
        journal.temp_post(temp_xact, temp_account, Amount::zero());
        journal.post_mut(PostId(0)).xdata().count = 5;

        journal.clear_transients(checkpoint);
        assert_eq!(journal.xact_count(), 1);
        assert_eq!(journal.journal_posts().len(), 1);
        assert!(journal.find_account("<Total>", false).is_none());
        assert!(!journal.post(PostId(0)).has_xdata());
    }
}
