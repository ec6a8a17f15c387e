//! Grouping stages: subtotal, interval, by-payee, day-of-week, equity
//!
//! All of these accumulate per-account values and emit one synthetic
//! posting per distinct account when a group closes. The shared
//! accumulator plays the role the common base class plays in classic
//! report chains; each stage decides when a group boundary falls.

use chrono::{Datelike, NaiveDate};
use log::debug;
use std::collections::BTreeMap;

use tally_math::{format_date, Amount, DateInterval};

use crate::account::{AccountId, AccountXFlags};
use crate::filters::{make_temp_post, PostHandler, PostHandlerBox, ReportContext};
use crate::posting::{PostId, PostingFlags};
use crate::report::ReportResult;
use crate::value::Value;

/// Per-account value accumulation shared by every grouping stage.
#[derive(Default)]
pub(crate) struct SubtotalAccum {
    /// Values keyed by account full name for deterministic emission order
    values: BTreeMap<String, (AccountId, Value)>,
    component_posts: Vec<PostId>,
    date_format: Option<String>,
}

impl SubtotalAccum {
    pub(crate) fn with_date_format(date_format: Option<String>) -> Self {
        SubtotalAccum { date_format, ..Default::default() }
    }

    /// Fold one posting into its account's bucket.
    pub(crate) fn add(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        self.component_posts.push(post);

        let account = ctx.journal.post(post).reported_account();
        let fullname = ctx.journal.account(account).fullname().to_string();
        let current = self
            .values
            .remove(&fullname)
            .map(|(_, value)| value)
            .unwrap_or_default();
        let value = ctx.add_to_value(post, &current)?;
        self.values.insert(fullname, (account, value));

        // Let the emitter render "(Account)" for accounts that held only
        // virtual postings.
        let (is_virtual, must_balance) = {
            let posting = ctx.journal.post(post);
            (posting.is_virtual(), posting.must_balance())
        };
        let xdata = ctx.journal.account_mut(account).xdata();
        xdata.flags.insert(AccountXFlags::AUTO_VIRTUALIZE);
        if !is_virtual {
            xdata.flags.insert(AccountXFlags::HAS_NON_VIRTUALS);
        } else if !must_balance {
            xdata.flags.insert(AccountXFlags::HAS_UNB_VIRTUALS);
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.component_posts.is_empty()
    }

    /// Close the group: one synthetic posting per account, dated at the
    /// group's latest posting, under a payee formatted from that date.
    /// `spec_fmt` overrides the `"- <date>"` shape (the by-payee and
    /// day-of-week stages pass their own labels).
    pub(crate) fn report(
        &mut self,
        ctx: &mut ReportContext<'_>,
        spec_fmt: Option<&str>,
        interval: Option<&DateInterval>,
        next: &mut dyn PostHandler,
    ) -> ReportResult<()> {
        if self.component_posts.is_empty() {
            return Ok(());
        }

        let mut range_start = interval.and_then(|i| i.start);
        let mut range_finish: Option<NaiveDate> = None;
        for &post in &self.component_posts {
            let date = ctx.journal.post_date(post);
            if range_start.map(|s| date < s).unwrap_or(true) {
                range_start = Some(date);
            }
            if range_finish.map(|f| date > f).unwrap_or(true) {
                range_finish = Some(date);
            }
        }
        self.component_posts.clear();

        let finish = match range_finish.or_else(|| interval.and_then(|i| i.inclusive_end())) {
            Some(finish) => finish,
            None => ctx.report.current_date,
        };

        let payee = match spec_fmt {
            Some(fmt) => format_date(finish, fmt),
            None => {
                let fmt = self
                    .date_format
                    .as_deref()
                    .unwrap_or(ctx.report.output_date_format.as_str());
                format!("- {}", format_date(finish, fmt))
            }
        };

        let xact = ctx.journal.temp_xact(payee, finish);
        if let Some(start) = range_start {
            ctx.journal.xact_mut(xact).effective_date = Some(start);
        }

        for (_, (account, value)) in std::mem::take(&mut self.values) {
            let post = make_temp_post(ctx, value, account, xact, None, None, false)?;
            next.push(ctx, post)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SubtotalPosts

/// Accumulate per-account values over the whole stream and emit one
/// synthetic posting per account at flush.
pub struct SubtotalPosts {
    next: PostHandlerBox,
    accum: SubtotalAccum,
}

impl SubtotalPosts {
    /// Subtotal everything into one group.
    pub fn new(next: PostHandlerBox) -> Self {
        SubtotalPosts { next, accum: SubtotalAccum::default() }
    }

    /// Override the date format used in the group payee.
    pub fn with_date_format(next: PostHandlerBox, date_format: Option<String>) -> Self {
        SubtotalPosts { next, accum: SubtotalAccum::with_date_format(date_format) }
    }
}

impl PostHandler for SubtotalPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        self.accum.add(ctx, post)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.accum.report(ctx, None, None, self.next.as_mut())?;
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// IntervalPosts

/// Route each posting to its containing period, reporting the closed
/// period's subtotal on every period change. With `generate_empty`,
/// quiet periods in between emit zero-valued placeholder postings so the
/// emitted periods partition the covered range.
pub struct IntervalPosts {
    next: PostHandlerBox,
    accum: SubtotalAccum,
    interval: DateInterval,
    empty_account: AccountId,
    generate_empty: bool,
    last_start: Option<NaiveDate>,
    saw_posts: bool,
}

impl IntervalPosts {
    /// Group by `interval`; placeholders post against `empty_account`.
    pub fn new(
        next: PostHandlerBox,
        interval: DateInterval,
        empty_account: AccountId,
        generate_empty: bool,
    ) -> Self {
        IntervalPosts {
            next,
            accum: SubtotalAccum::default(),
            interval,
            empty_account,
            generate_empty,
            last_start: None,
            saw_posts: false,
        }
    }

    fn report_subtotal(
        &mut self,
        ctx: &mut ReportContext<'_>,
        period_start: NaiveDate,
    ) -> ReportResult<()> {
        let mut closed = self.interval.clone();
        closed.start = Some(period_start);
        closed.next = self.interval.duration.map(|d| d.add_to(period_start));
        self.accum.report(ctx, None, Some(&closed), self.next.as_mut())
    }
}

impl PostHandler for IntervalPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let date = ctx.journal.post_date(post);
        if !self.interval.find_period(date) {
            return Ok(());
        }

        let duration = match self.interval.duration {
            Some(duration) => duration,
            // A non-repeating interval only filters; postings stream on.
            None => {
                self.saw_posts = true;
                return self.next.push(ctx, post);
            }
        };

        let current_start = self.interval.start;
        if let (Some(last_start), Some(current)) = (self.last_start, current_start) {
            if last_start != current {
                self.report_subtotal(ctx, last_start)?;

                if self.generate_empty {
                    let mut gap_start = duration.add_to(last_start);
                    while gap_start < current {
                        let gap_end = duration.add_to(gap_start);
                        let placeholder_date = gap_end.pred_opt().unwrap_or(gap_start);
                        debug!("interval: empty period at {}", gap_start);

                        let xact = ctx.journal.temp_xact("", placeholder_date);
                        let null_post =
                            ctx.journal.temp_post(xact, self.empty_account, Amount::zero());
                        ctx.journal
                            .post_mut(null_post)
                            .flags
                            .insert(PostingFlags::CALCULATED);
                        self.accum.add(ctx, null_post)?;
                        self.report_subtotal(ctx, gap_start)?;
                        gap_start = gap_end;
                    }
                }
            }
        }

        self.last_start = current_start;
        self.saw_posts = true;
        self.accum.add(ctx, post)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.saw_posts && !self.accum.is_empty() {
            if let Some(last_start) = self.last_start {
                self.report_subtotal(ctx, last_start)?;
            }
        }
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// ByPayeePosts

/// Partition postings by payee, keep one subtotal accumulation per
/// payee, and flush each group under its payee as title.
pub struct ByPayeePosts {
    next: PostHandlerBox,
    payee_subtotals: BTreeMap<String, SubtotalAccum>,
}

impl ByPayeePosts {
    /// Group by payee.
    pub fn new(next: PostHandlerBox) -> Self {
        ByPayeePosts { next, payee_subtotals: BTreeMap::new() }
    }
}

impl PostHandler for ByPayeePosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let payee = ctx.journal.post_payee(post).to_string();
        self.payee_subtotals
            .entry(payee)
            .or_default()
            .add(ctx, post)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        for (payee, mut accum) in std::mem::take(&mut self.payee_subtotals) {
            self.next.title(ctx, &payee)?;
            accum.report(ctx, Some(&payee), None, self.next.as_mut())?;
        }
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// DowPosts

/// Partition postings into the seven weekdays; each bucket subtotals
/// under the weekday's name ("Mondays", "Tuesdays", …).
pub struct DowPosts {
    next: PostHandlerBox,
    days_of_the_week: [Vec<PostId>; 7],
    accum: SubtotalAccum,
}

impl DowPosts {
    /// Group by day of week.
    pub fn new(next: PostHandlerBox) -> Self {
        DowPosts {
            next,
            days_of_the_week: Default::default(),
            accum: SubtotalAccum::default(),
        }
    }
}

impl PostHandler for DowPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let weekday = ctx.journal.post_date(post).weekday().num_days_from_sunday() as usize;
        self.days_of_the_week[weekday].push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        for bucket in 0..7 {
            for post in std::mem::take(&mut self.days_of_the_week[bucket]) {
                self.accum.add(ctx, post)?;
            }
            self.accum.report(ctx, Some("%As"), None, self.next.as_mut())?;
        }
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// PostsAsEquity

/// Render accumulated per-account values as one "Opening Balances"
/// transaction, with a balancing posting (or one per commodity) against
/// the equity account.
pub struct PostsAsEquity {
    next: PostHandlerBox,
    accum: SubtotalAccum,
    equity_account: AccountId,
}

impl PostsAsEquity {
    /// Balance into `equity_account`.
    pub fn new(next: PostHandlerBox, equity_account: AccountId) -> Self {
        PostsAsEquity { next, accum: SubtotalAccum::default(), equity_account }
    }

    fn report_subtotal(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.accum.is_empty() {
            return Ok(());
        }

        let mut finish: Option<NaiveDate> = None;
        for &post in &self.accum.component_posts {
            let date = ctx.journal.post_date(post);
            if finish.map(|f| date > f).unwrap_or(true) {
                finish = Some(date);
            }
        }
        self.accum.component_posts.clear();
        let date = finish.unwrap_or(ctx.report.current_date);

        let xact = ctx.journal.temp_xact("Opening Balances", date);

        let mut total = Value::Null;
        for (_, (account, value)) in std::mem::take(&mut self.accum.values) {
            total = total.add(&value).map_err(crate::expr::CalcError::from)?;
            let post = make_temp_post(ctx, value, account, xact, None, None, false)?;
            self.next.push(ctx, post)?;
        }

        match total {
            Value::Balance(balance) => {
                for amount in balance.amounts() {
                    let post = ctx.journal.temp_post(
                        xact,
                        self.equity_account,
                        amount.negated(),
                    );
                    self.next.push(ctx, post)?;
                }
            }
            other => {
                let amount = other
                    .to_amount()
                    .map_err(crate::expr::CalcError::from)?
                    .negated();
                let post = ctx.journal.temp_post(xact, self.equity_account, amount);
                self.next.push(ctx, post)?;
            }
        }
        Ok(())
    }
}

impl PostHandler for PostsAsEquity {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        self.accum.add(ctx, post)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.report_subtotal(ctx)?;
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}
