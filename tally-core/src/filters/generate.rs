//! Generating stages: budget and forecast
//!
//! Both stages hold pending schedules built from the journal's periodic
//! transaction templates: a repeat interval paired with a template
//! posting. Budgeting emits negated expected amounts for every period a
//! real posting has moved past; forecasting repeatedly emits the
//! schedule with the earliest next occurrence until a predicate says
//! stop.

use chrono::NaiveDate;
use log::debug;

use tally_math::DateInterval;

use crate::expr::{ItemRef, Predicate};
use crate::filters::{PostHandler, PostHandlerBox, ReportContext};
use crate::posting::PostId;
use crate::report::{ReportError, ReportResult};

bitflags::bitflags! {
    /// Which postings a budget report lets through.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BudgetFlags: u8 {
        /// Show postings whose account is budgeted
        const BUDGETED = 0x01;
        /// Show postings whose account is not budgeted
        const UNBUDGETED = 0x02;
    }
}

/// One pending schedule: where the period currently stands, and the
/// template posting to emit for each elapsed period.
struct PendingPost {
    period: DateInterval,
    post: PostId,
}

fn collect_period_posts(journal: &crate::journal::Journal) -> Vec<PendingPost> {
    let mut pending = Vec::new();
    for period_xact in &journal.period_xacts {
        for &post in &journal.xact(period_xact.xact).posts {
            pending.push(PendingPost { period: period_xact.period.clone(), post });
        }
    }
    pending
}

// ---------------------------------------------------------------------------
// BudgetPosts

/// Compare real postings against periodic budget schedules. Every real
/// posting under a budgeted account first reports the budget's negated
/// expected amounts for all periods strictly before the posting's date.
pub struct BudgetPosts {
    next: PostHandlerBox,
    flags: BudgetFlags,
    pending_posts: Vec<PendingPost>,
}

impl BudgetPosts {
    /// Build the stage from the journal's periodic templates.
    pub fn new(next: PostHandlerBox, flags: BudgetFlags, ctx: &ReportContext<'_>) -> Self {
        BudgetPosts { next, flags, pending_posts: collect_period_posts(ctx.journal) }
    }

    /// Emit budget postings for every pending period that `date` has
    /// moved past, repeating until no schedule reports.
    fn report_budget_items(
        &mut self,
        ctx: &mut ReportContext<'_>,
        date: NaiveDate,
    ) -> ReportResult<()> {
        if self.pending_posts.is_empty() {
            return Ok(());
        }

        loop {
            let mut reported = false;
            for i in 0..self.pending_posts.len() {
                let begin = match self.pending_posts[i].period.start {
                    Some(begin) => begin,
                    None => {
                        if !self.pending_posts[i].period.find_period(date) {
                            let post = self.pending_posts[i].post;
                            let account = ctx.journal.post(post).reported_account();
                            return Err(ReportError::InvalidConfig(format!(
                                "budget period for account '{}' cannot place the date {}",
                                ctx.journal.account(account).fullname(),
                                date
                            )));
                        }
                        match self.pending_posts[i].period.start {
                            Some(begin) => begin,
                            None => continue,
                        }
                    }
                };

                let past_end = self.pending_posts[i]
                    .period
                    .end
                    .map(|end| begin >= end)
                    .unwrap_or(false);
                if begin < date && !past_end {
                    let template = self.pending_posts[i].post;
                    let account = ctx.journal.post(template).reported_account();
                    debug!(
                        "budget: reporting period starting {} for {}",
                        begin,
                        ctx.journal.account(account).fullname()
                    );

                    let xact = ctx.journal.temp_xact("Budget transaction", begin);
                    let temp = ctx.journal.temp_post_copy(template, xact);
                    ctx.journal.post_mut(temp).amount.in_place_negate();

                    self.pending_posts[i].period.advance();
                    self.next.push(ctx, temp)?;
                    reported = true;
                }
            }
            if !reported {
                return Ok(());
            }
        }
    }
}

impl PostHandler for BudgetPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let mut post_in_budget = false;

        'outer: for pending in &self.pending_posts {
            let budget_account = ctx.journal.post(pending.post).reported_account();
            let mut account = Some(ctx.journal.post(post).reported_account());
            while let Some(current) = account {
                if current == budget_account {
                    post_in_budget = true;
                    // Report the posting as if it had occurred in the
                    // budgeted (ancestor) account.
                    if ctx.journal.post(post).reported_account() != current {
                        ctx.journal.post_mut(post).xdata().reported_account = Some(current);
                    }
                    break 'outer;
                }
                account = ctx.journal.account(current).parent;
            }
        }

        if post_in_budget && self.flags.contains(BudgetFlags::BUDGETED) {
            let date = ctx.journal.post_date(post);
            self.report_budget_items(ctx, date)?;
            self.next.push(ctx, post)?;
        } else if !post_in_budget && self.flags.contains(BudgetFlags::UNBUDGETED) {
            self.next.push(ctx, post)?;
        }
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// ForecastPosts

/// Project periodic postings into the future. Real postings stream
/// through; at flush, the stage repeatedly emits the schedule with the
/// earliest next occurrence as a "Forecast transaction", stopping when
/// the predicate fails in a forecast posting's own scope, when the gap
/// since the last accepted posting exceeds five years, or when every
/// schedule has passed without the predicate ever firing.
pub struct ForecastPosts {
    next: PostHandlerBox,
    predicate: Predicate,
    pending_posts: Vec<PendingPost>,
}

impl ForecastPosts {
    /// Build the stage from the journal's periodic templates, positioning
    /// each schedule at or after the report's current date.
    pub fn new(
        next: PostHandlerBox,
        predicate: Predicate,
        ctx: &ReportContext<'_>,
    ) -> ReportResult<Self> {
        let current_date = ctx.report.current_date;
        let mut pending_posts = collect_period_posts(ctx.journal);
        for pending in &mut pending_posts {
            if pending.period.start.is_none() {
                if !pending.period.find_period(current_date) {
                    let account = ctx.journal.post(pending.post).reported_account();
                    return Err(ReportError::InvalidConfig(format!(
                        "forecast period for account '{}' cannot place today's date",
                        ctx.journal.account(account).fullname()
                    )));
                }
                pending.period.advance();
            } else {
                while pending.period.start.map(|s| s < current_date).unwrap_or(false) {
                    pending.period.advance();
                }
            }
        }
        Ok(ForecastPosts { next, predicate, pending_posts })
    }
}

impl PostHandler for ForecastPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        self.next.push(ctx, post)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let mut passed: Vec<PostId> = Vec::new();
        let mut last: Option<NaiveDate> = None;

        while !self.pending_posts.is_empty() {
            // The schedule with the earliest current occurrence.
            let mut least = 0;
            for i in 1..self.pending_posts.len() {
                if self.pending_posts[i].period.start < self.pending_posts[least].period.start {
                    least = i;
                }
            }

            let begin = match self.pending_posts[least].period.start {
                Some(begin) => begin,
                None => break,
            };
            if let Some(end) = self.pending_posts[least].period.end {
                if begin >= end {
                    let finished = self.pending_posts.remove(least);
                    passed.retain(|p| *p != finished.post);
                    continue;
                }
            }

            let template = self.pending_posts[least].post;
            let xact = ctx.journal.temp_xact("Forecast transaction", begin);
            let temp = ctx.journal.temp_post_copy(template, xact);

            self.pending_posts[least].period.advance();
            let next_date = self.pending_posts[least].period.start;

            let gap_too_wide = match (next_date, last) {
                (Some(next), Some(last)) => (next - last).num_days() > 365 * 5,
                _ => false,
            };
            if next_date.map(|next| next < begin).unwrap_or(true) || gap_too_wide {
                break;
            }

            if self.predicate.calc(&ctx.bind(ItemRef::Post(temp)))? {
                debug!("forecast: emitting {} for {}", begin, ctx.journal.post_payee(temp));
                self.next.push(ctx, temp)?;
                last = Some(begin);
                passed.clear();
            } else {
                if last.is_some() {
                    // The predicate had been matching and stopped; the
                    // forecast horizon is over.
                    break;
                }
                if !passed.contains(&template) {
                    passed.push(template);
                    if passed.len() >= self.pending_posts.len() {
                        break;
                    }
                }
            }
        }

        // A second flush must not resume the projection.
        self.pending_posts.clear();
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_flags() {
        let both = BudgetFlags::BUDGETED | BudgetFlags::UNBUDGETED;
        assert!(both.contains(BudgetFlags::BUDGETED));
        assert!(both.contains(BudgetFlags::UNBUDGETED));
        assert!(!BudgetFlags::BUDGETED.contains(BudgetFlags::UNBUDGETED));
    }

}
