//! Posting and account enumeration orders
//!
//! Iterators are lazy over a precomputed order, finite, and
//! non-restartable. Exhausting one through `pass_down_posts` or
//! `pass_down_accounts` triggers `flush` on the head handler;
//! per-item errors pick up context naming the item being processed.

use crate::account::AccountId;
use crate::expr::{Expr, ItemRef, Predicate, ReportScope};
use crate::filters::{AccountHandler, PostHandler, ReportContext};
use crate::journal::Journal;
use crate::posting::PostId;
use crate::report::{ReportError, ReportResult};
use crate::value::Value;

/// An enumeration order over postings.
pub struct PostsIterator {
    ids: std::vec::IntoIter<PostId>,
}

impl PostsIterator {
    /// Document order: transactions as entered, postings within each.
    pub fn journal_order(journal: &Journal) -> Self {
        PostsIterator { ids: journal.journal_posts().into_iter() }
    }

    /// Stable order under `sort_order`, evaluated per posting.
    pub fn sorted_by(
        journal: &Journal,
        report: &ReportScope,
        sort_order: &Expr,
    ) -> ReportResult<Self> {
        let mut keyed: Vec<(Value, PostId)> = Vec::new();
        for post in journal.journal_posts() {
            let scope = crate::expr::BindScope::bind(report, journal, ItemRef::Post(post));
            keyed.push((sort_order.calc(&scope)?, post));
        }
        keyed.sort_by(|a, b| a.0.compare(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let ids: Vec<PostId> = keyed.into_iter().map(|(_, post)| post).collect();
        Ok(PostsIterator { ids: ids.into_iter() })
    }

    /// Grouped by account (tree pre-order), by date within each account.
    pub fn by_account(journal: &Journal) -> Self {
        let mut ids = Vec::new();
        for account in AccountsIterator::pre_order(journal) {
            let mut posts: Vec<PostId> = journal
                .account(account)
                .posts
                .iter()
                .copied()
                .filter(|&post| !journal.post(post).is_temp())
                .collect();
            posts.sort_by_key(|&post| journal.post_date(post));
            ids.extend(posts);
        }
        PostsIterator { ids: ids.into_iter() }
    }
}

impl Iterator for PostsIterator {
    type Item = PostId;

    fn next(&mut self) -> Option<PostId> {
        self.ids.next()
    }
}

/// An enumeration order over accounts.
pub struct AccountsIterator {
    ids: std::vec::IntoIter<AccountId>,
}

impl AccountsIterator {
    /// Depth-first pre-order over the account tree, the root excluded.
    pub fn pre_order(journal: &Journal) -> Self {
        let mut ids = Vec::new();
        let mut stack: Vec<AccountId> = journal
            .account(journal.root())
            .children
            .values()
            .rev()
            .copied()
            .collect();
        while let Some(account) = stack.pop() {
            ids.push(account);
            stack.extend(journal.account(account).children.values().rev().copied());
        }
        AccountsIterator { ids: ids.into_iter() }
    }

    /// Pre-order with siblings ordered by `sort_order` evaluated per
    /// account, stably.
    pub fn sorted_by(
        journal: &Journal,
        report: &ReportScope,
        sort_order: &Expr,
    ) -> ReportResult<Self> {
        fn visit(
            journal: &Journal,
            report: &ReportScope,
            sort_order: &Expr,
            account: AccountId,
            out: &mut Vec<AccountId>,
        ) -> ReportResult<()> {
            let mut keyed: Vec<(Value, AccountId)> = Vec::new();
            for &child in journal.account(account).children.values() {
                let scope =
                    crate::expr::BindScope::bind(report, journal, ItemRef::Account(child));
                keyed.push((sort_order.calc(&scope)?, child));
            }
            keyed.sort_by(|a, b| a.0.compare(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            for (_, child) in keyed {
                out.push(child);
                visit(journal, report, sort_order, child, out)?;
            }
            Ok(())
        }

        let mut ids = Vec::new();
        visit(journal, report, sort_order, journal.root(), &mut ids)?;
        Ok(AccountsIterator { ids: ids.into_iter() })
    }
}

impl Iterator for AccountsIterator {
    type Item = AccountId;

    fn next(&mut self) -> Option<AccountId> {
        self.ids.next()
    }
}

/// Drive a posting chain from an iterator, wrapping per-item errors with
/// the posting's context and flushing the head at exhaustion.
pub fn pass_down_posts(
    ctx: &mut ReportContext<'_>,
    iter: PostsIterator,
    handler: &mut dyn PostHandler,
) -> ReportResult<()> {
    for post in iter {
        handler.push(ctx, post).map_err(|err| {
            err.with_context(format!(
                "While handling posting: {} {} / {}",
                ctx.journal.post_date(post),
                ctx.journal.post_payee(post),
                ctx.journal.account(ctx.journal.post(post).account).fullname(),
            ))
        })?;
    }
    handler.flush(ctx)
}

/// Drive an account chain from an iterator, applying an optional
/// predicate in each account's bind scope.
pub fn pass_down_accounts(
    ctx: &mut ReportContext<'_>,
    iter: AccountsIterator,
    predicate: Option<&Predicate>,
    handler: &mut dyn AccountHandler,
) -> ReportResult<()> {
    for account in iter {
        let matched = match predicate {
            Some(predicate) => predicate
                .calc(&ctx.bind(ItemRef::Account(account)))
                .map_err(ReportError::from)?,
            None => true,
        };
        if matched {
            handler.push(ctx, account).map_err(|err| {
                err.with_context(format!(
                    "While handling account: {}",
                    ctx.journal.account(account).fullname()
                ))
            })?;
        }
    }
    handler.flush(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::Posting;
    use crate::transaction::Xact;
    use chrono::NaiveDate;
    use tally_math::Amount;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_journal() -> Journal {
        let mut journal = Journal::new();
        let food = journal.find_account("Expenses:Food", true).unwrap();
        let cash = journal.find_account("Assets:Cash", true).unwrap();

        let x1 = journal.add_xact(Xact::new(date(2024, 1, 2), "Grocer"));
        journal.add_post(x1, Posting::new(food, Amount::parse("10.00 USD").unwrap()));
        journal.add_post(x1, Posting::new(cash, Amount::parse("-10.00 USD").unwrap()));

        let x2 = journal.add_xact(Xact::new(date(2024, 1, 1), "Cafe"));
        journal.add_post(x2, Posting::new(food, Amount::parse("4.00 USD").unwrap()));
        journal.add_post(x2, Posting::new(cash, Amount::parse("-4.00 USD").unwrap()));

        journal
    }

    #[test]
    fn test_journal_order_is_document_order() {
        let journal = sample_journal();
        let payees: Vec<String> = PostsIterator::journal_order(&journal)
            .map(|post| journal.post_payee(post).to_string())
            .collect();
        assert_eq!(payees, vec!["Grocer", "Grocer", "Cafe", "Cafe"]);
    }

    #[test]
    fn test_sorted_posts_by_date() {
        let journal = sample_journal();
        let report = ReportScope::new(date(2024, 6, 1));
        let sort = Expr::parse("d").unwrap();
        let dates: Vec<NaiveDate> = PostsIterator::sorted_by(&journal, &report, &sort)
            .unwrap()
            .map(|post| journal.post_date(post))
            .collect();
        assert_eq!(
            dates,
            vec![date(2024, 1, 1), date(2024, 1, 1), date(2024, 1, 2), date(2024, 1, 2)]
        );
    }

    #[test]
    fn test_accounts_pre_order() {
        let journal = sample_journal();
        let names: Vec<String> = AccountsIterator::pre_order(&journal)
            .map(|account| journal.account(account).fullname().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["Assets", "Assets:Cash", "Expenses", "Expenses:Food"]
        );
    }

    #[test]
    fn test_by_account_groups_and_sorts() {
        let journal = sample_journal();
        let seen: Vec<(String, NaiveDate)> = PostsIterator::by_account(&journal)
            .map(|post| {
                (
                    journal
                        .account(journal.post(post).account)
                        .fullname()
                        .to_string(),
                    journal.post_date(post),
                )
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                ("Assets:Cash".to_string(), date(2024, 1, 1)),
                ("Assets:Cash".to_string(), date(2024, 1, 2)),
                ("Expenses:Food".to_string(), date(2024, 1, 1)),
                ("Expenses:Food".to_string(), date(2024, 1, 2)),
            ]
        );
    }
}
