//! Filter chain for posting and account processing
//!
//! Reporting is a linear chain of handlers. Each handler receives
//! postings with `push`, forwards terminator signals with `flush`, and
//! passes group titles along with `title`. A handler owns the next stage;
//! flushing the head cascades down the chain. Stages that synthesize
//! subtotal lines, forecasts or revaluations append temporary items to
//! the journal arenas, flagged `TEMP` and torn down with the pipeline.

use chrono::NaiveDate;
use log::debug;
use std::collections::HashMap;
use std::fmt::Write as _;

use tally_math::Amount;

use crate::account::{AccountId, AccountXFlags};
use crate::expr::{BindScope, CalcResult, Expr, ItemRef, Predicate, ReportScope};
use crate::journal::Journal;
use crate::posting::{PostId, PostXFlags, Posting, PostingFlags};
use crate::report::{ReportError, ReportResult};
use crate::transaction::XactId;
use crate::value::Value;

pub mod generate;
pub mod subtotal;

pub use generate::{BudgetFlags, BudgetPosts, ForecastPosts};
pub use subtotal::{ByPayeePosts, DowPosts, IntervalPosts, PostsAsEquity, SubtotalPosts};

/// Mutable state threaded through the chain: the journal being reported
/// on and the read-only report scope.
pub struct ReportContext<'a> {
    /// The journal; append-only for temporaries during a report
    pub journal: &'a mut Journal,
    /// Evaluation defaults
    pub report: &'a ReportScope,
}

impl<'a> ReportContext<'a> {
    /// Bundle a journal and report scope.
    pub fn new(journal: &'a mut Journal, report: &'a ReportScope) -> Self {
        ReportContext { journal, report }
    }

    /// An evaluation scope bound to `item`.
    pub fn bind(&self, item: ItemRef) -> BindScope<'_> {
        BindScope::bind(self.report, self.journal, item)
    }

    /// A posting's value under the report's amount expression.
    pub fn post_amount(&self, post: PostId) -> CalcResult {
        self.report.amount_expr.calc(&self.bind(ItemRef::Post(post)))
    }

    /// Accumulate a posting's amount-expression value onto `value`.
    pub fn add_to_value(&self, post: PostId, value: &Value) -> CalcResult {
        Ok(value.add(&self.post_amount(post)?)?)
    }
}

/// One stage of the posting pipeline.
pub trait PostHandler {
    /// Accept the next posting.
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()>;
    /// Forward the end-of-stream signal, emitting any buffered group.
    /// Must be idempotent and safe on an empty stage.
    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()>;
    /// Pass a group title downstream.
    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()>;
}

/// Owned downstream stage.
pub type PostHandlerBox = Box<dyn PostHandler>;

/// One stage of the account pipeline.
pub trait AccountHandler {
    /// Accept the next account.
    fn push(&mut self, ctx: &mut ReportContext<'_>, account: AccountId) -> ReportResult<()>;
    /// Forward the end-of-stream signal.
    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()>;
}

/// SHA-1 hex digest, used by the anonymizer.
pub(crate) fn sha1_hex(input: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(40);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Build a temporary posting carrying `value` against `account` under
/// `xact`. Scalar values land in the posting's amount; balances and
/// sequences ride in the xdata compound slot. The caller pushes the
/// returned posting downstream itself.
pub(crate) fn make_temp_post(
    ctx: &mut ReportContext<'_>,
    value: Value,
    account: AccountId,
    xact: XactId,
    date: Option<NaiveDate>,
    total: Option<Value>,
    direct_amount: bool,
) -> ReportResult<PostId> {
    let mut flags = PostingFlags::TEMP;
    {
        // Accounts holding only virtual postings report their subtotal as
        // virtual too.
        let acct = ctx.journal.account(account);
        if acct.has_xflags(AccountXFlags::AUTO_VIRTUALIZE)
            && !acct.has_xflags(AccountXFlags::HAS_NON_VIRTUALS)
        {
            flags.insert(PostingFlags::VIRTUAL);
            if !acct.has_xflags(AccountXFlags::HAS_UNB_VIRTUALS) {
                flags.insert(PostingFlags::MUST_BALANCE);
            }
        }
    }

    let simplified = value.simplified();
    let (amount, compound) = match &simplified {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Amount(_) => {
            let amount = simplified.to_amount().map_err(crate::expr::CalcError::from)?;
            (amount, None)
        }
        Value::Balance(_) | Value::Seq(_) => (Amount::zero(), Some(simplified.clone())),
        other => {
            return Err(ReportError::InvalidConfig(format!(
                "cannot synthesize a posting from a {} value",
                other.type_name()
            )))
        }
    };

    let post = ctx.journal.temp_post(xact, account, amount);
    ctx.journal.post_mut(post).flags.insert(flags);
    let xdata = ctx.journal.post_mut(post).xdata();
    if let Some(date) = date {
        xdata.date = Some(date);
    }
    if let Some(compound) = compound {
        xdata.compound_value = Some(compound);
        xdata.flags.insert(PostXFlags::COMPOUND);
    }
    if let Some(total) = total {
        xdata.total = Some(total);
    }
    if direct_amount {
        xdata.flags.insert(PostXFlags::DIRECT_AMT);
    }
    Ok(post)
}

// ---------------------------------------------------------------------------
// TruncateXacts

/// Emit only the transactions whose index falls in the head or tail
/// window. Counts whole transactions, not postings; negative counts
/// invert the selection.
pub struct TruncateXacts {
    next: PostHandlerBox,
    posts: Vec<PostId>,
    head_count: i32,
    tail_count: i32,
    xacts_seen: usize,
    last_xact: Option<XactId>,
}

impl TruncateXacts {
    /// Keep `head_count` transactions from the front and `tail_count`
    /// from the back.
    pub fn new(next: PostHandlerBox, head_count: i32, tail_count: i32) -> Self {
        TruncateXacts {
            next,
            posts: Vec::new(),
            head_count,
            tail_count,
            xacts_seen: 0,
            last_xact: None,
        }
    }
}

impl PostHandler for TruncateXacts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let xact = ctx.journal.post(post).xact;
        if self.last_xact != Some(xact) {
            if self.last_xact.is_some() {
                self.xacts_seen += 1;
            }
            self.last_xact = Some(xact);
        }

        // With a pure positive head there is no reason to buffer past it.
        if self.tail_count == 0
            && self.head_count > 0
            && self.xacts_seen >= self.head_count as usize
        {
            return Ok(());
        }

        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.posts.is_empty() {
            return self.next.flush(ctx);
        }

        let mut total = 1usize;
        let mut xact = ctx.journal.post(self.posts[0]).xact;
        for &post in &self.posts {
            let this_xact = ctx.journal.post(post).xact;
            if this_xact != xact {
                total += 1;
                xact = this_xact;
            }
        }

        let mut index = 0usize;
        let mut xact = ctx.journal.post(self.posts[0]).xact;
        for post in std::mem::take(&mut self.posts) {
            let this_xact = ctx.journal.post(post).xact;
            if this_xact != xact {
                xact = this_xact;
                index += 1;
            }

            let mut print = false;
            if self.head_count != 0 {
                if self.head_count > 0 && index < self.head_count as usize {
                    print = true;
                } else if self.head_count < 0 && index >= (-self.head_count) as usize {
                    print = true;
                }
            }
            if !print && self.tail_count != 0 {
                let from_end = total - index;
                if self.tail_count > 0 && from_end <= self.tail_count as usize {
                    print = true;
                } else if self.tail_count < 0 && from_end > (-self.tail_count) as usize {
                    print = true;
                }
            }

            if print {
                self.next.push(ctx, post)?;
            }
        }

        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// SortPosts

/// Buffer every posting, then emit in the stable order given by a sort
/// expression evaluated within each posting's bind scope.
pub struct SortPosts {
    next: PostHandlerBox,
    posts: Vec<PostId>,
    sort_order: Expr,
}

impl SortPosts {
    /// Sort by `sort_order`.
    pub fn new(next: PostHandlerBox, sort_order: Expr) -> Self {
        SortPosts { next, posts: Vec::new(), sort_order }
    }
}

impl PostHandler for SortPosts {
    fn push(&mut self, _ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let mut keyed: Vec<(Value, PostId)> = Vec::with_capacity(self.posts.len());
        for post in std::mem::take(&mut self.posts) {
            let key = self.sort_order.calc(&ctx.bind(ItemRef::Post(post)))?;
            ctx.journal.post_mut(post).xdata().flags.insert(PostXFlags::SORT_CALC);
            keyed.push((key, post));
        }
        keyed.sort_by(|a, b| {
            a.0.compare(&b.0).unwrap_or(std::cmp::Ordering::Equal)
        });
        for (_, post) in keyed {
            ctx.journal.post_mut(post).xdata().flags.remove(PostXFlags::SORT_CALC);
            self.next.push(ctx, post)?;
        }
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// FilterPosts / DisplayFilterPosts

/// Forward only the postings matching a predicate.
pub struct FilterPosts {
    next: PostHandlerBox,
    predicate: Predicate,
}

impl FilterPosts {
    /// Keep postings for which `predicate` holds.
    pub fn new(next: PostHandlerBox, predicate: Predicate) -> Self {
        FilterPosts { next, predicate }
    }
}

impl PostHandler for FilterPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        if self.predicate.calc(&ctx.bind(ItemRef::Post(post)))? {
            ctx.journal.post_mut(post).xdata().flags.insert(PostXFlags::MATCHES);
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

/// Forward only the postings matching the display predicate, marking
/// what is shown.
pub struct DisplayFilterPosts {
    next: PostHandlerBox,
    predicate: Predicate,
}

impl DisplayFilterPosts {
    /// Display postings for which `predicate` holds.
    pub fn new(next: PostHandlerBox, predicate: Predicate) -> Self {
        DisplayFilterPosts { next, predicate }
    }
}

impl PostHandler for DisplayFilterPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        if self.predicate.calc(&ctx.bind(ItemRef::Post(post)))? {
            ctx.journal.post_mut(post).xdata().flags.insert(PostXFlags::DISPLAYED);
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
// CalcPosts

/// Assign each posting an incrementing count and a running total (and
/// cost-basis total). With `account_wise`, each account's totals run
/// independently; otherwise one global total accumulates.
pub struct CalcPosts {
    next: PostHandlerBox,
    account_wise: bool,
    count: usize,
    total: Value,
    cost_total: Value,
    account_totals: HashMap<AccountId, (Value, Value)>,
}

impl CalcPosts {
    /// Running totals, globally or per account.
    pub fn new(next: PostHandlerBox, account_wise: bool) -> Self {
        CalcPosts {
            next,
            account_wise,
            count: 0,
            total: Value::Null,
            cost_total: Value::Null,
            account_totals: HashMap::new(),
        }
    }
}

impl PostHandler for CalcPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let amount = ctx.post_amount(post)?;
        let cost_value = Value::Amount(ctx.journal.post(post).cost_or_amount().clone());
        let account = ctx.journal.post(post).reported_account();

        self.count += 1;
        let (total, cost_total) = if self.account_wise {
            let entry = self.account_totals.entry(account).or_default();
            let total = entry.0.add(&amount)?;
            let cost_total = entry.1.add(&cost_value)?;
            *entry = (total.clone(), cost_total.clone());
            (total, cost_total)
        } else {
            self.total = self.total.add(&amount)?;
            self.cost_total = self.cost_total.add(&cost_value)?;
            (self.total.clone(), self.cost_total.clone())
        };

        {
            let xdata = ctx.journal.post_mut(post).xdata();
            xdata.count = self.count;
            xdata.visited_value = Some(amount.clone());
            xdata.total = Some(total);
            xdata.cost_total = Some(cost_total);
            xdata.flags.insert(PostXFlags::VISITED);
        }

        let account_value = ctx
            .journal
            .account(account)
            .xdata
            .as_ref()
            .map(|x| x.value.clone())
            .unwrap_or_default();
        let account_value = account_value.add(&amount)?;
        {
            let xdata = ctx.journal.account_mut(account).xdata();
            xdata.value = account_value;
            xdata.count += 1;
            xdata.flags.insert(AccountXFlags::VISITED);
        }

        // Totals include descendants, so they roll up the tree.
        let mut cursor = Some(account);
        while let Some(current) = cursor {
            let family_total = ctx
                .journal
                .account(current)
                .xdata
                .as_ref()
                .map(|x| x.total.clone())
                .unwrap_or_default();
            let family_total = family_total.add(&amount)?;
            let xdata = ctx.journal.account_mut(current).xdata();
            xdata.total = family_total;
            xdata.total_count += 1;
            cursor = ctx.journal.account(current).parent;
        }

        self.next.push(ctx, post)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// CollapsePosts

/// Group consecutive postings by transaction, emitting one synthetic
/// posting per transaction against the totals account. A transaction
/// with a single displayed posting passes through untouched; with
/// `only_if_zero`, non-zero transactions emit their original postings.
pub struct CollapsePosts {
    next: PostHandlerBox,
    totals_account: AccountId,
    only_if_zero: bool,
    only_predicate: Option<Predicate>,
    display_predicate: Option<Predicate>,
    subtotal: Value,
    count: usize,
    component_posts: Vec<PostId>,
    last_xact: Option<XactId>,
    last_post: Option<PostId>,
}

impl CollapsePosts {
    /// Collapse transactions into `totals_account`.
    pub fn new(next: PostHandlerBox, totals_account: AccountId, only_if_zero: bool) -> Self {
        CollapsePosts {
            next,
            totals_account,
            only_if_zero,
            only_predicate: None,
            display_predicate: None,
            subtotal: Value::Null,
            count: 0,
            component_posts: Vec::new(),
            last_xact: None,
            last_post: None,
        }
    }

    /// Restrict which postings count as displayed when deciding whether a
    /// transaction collapses.
    pub fn with_predicates(
        mut self,
        only: Option<Predicate>,
        display: Option<Predicate>,
    ) -> Self {
        self.only_predicate = only;
        self.display_predicate = display;
        self
    }

    fn report_subtotal(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.count == 0 {
            return Ok(());
        }

        let mut displayed_count = 0usize;
        for &post in &self.component_posts {
            let scope = ctx.bind(ItemRef::Post(post));
            let only = match &self.only_predicate {
                Some(pred) => pred.calc(&scope)?,
                None => true,
            };
            let display = match &self.display_predicate {
                Some(pred) => pred.calc(&scope)?,
                None => true,
            };
            if only && display {
                displayed_count += 1;
            }
        }

        if displayed_count == 1 {
            if let Some(last_post) = self.last_post {
                self.next.push(ctx, last_post)?;
            }
        } else if self.only_if_zero && self.subtotal.is_truthy() {
            for post in self.component_posts.clone() {
                self.next.push(ctx, post)?;
            }
        } else if let Some(last_xact) = self.last_xact {
            let mut earliest: Option<NaiveDate> = None;
            for &post in &self.component_posts {
                let date = ctx.journal.post_date(post);
                if earliest.map(|e| date < e).unwrap_or(true) {
                    earliest = Some(date);
                }
            }
            let payee = ctx.journal.xact(last_xact).payee.clone();
            let date = earliest.unwrap_or(ctx.journal.xact(last_xact).date);
            debug!("collapse: pseudo-xact date = {}", date);

            let xact = ctx.journal.temp_xact(payee, date);
            let subtotal = std::mem::take(&mut self.subtotal);
            let post =
                make_temp_post(ctx, subtotal, self.totals_account, xact, None, None, false)?;
            self.next.push(ctx, post)?;
        }

        self.component_posts.clear();
        self.last_xact = None;
        self.last_post = None;
        self.subtotal = Value::Null;
        self.count = 0;
        Ok(())
    }
}

impl PostHandler for CollapsePosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let xact = ctx.journal.post(post).xact;
        if self.last_xact != Some(xact) && self.count > 0 {
            self.report_subtotal(ctx)?;
        }

        self.subtotal = ctx.add_to_value(post, &self.subtotal)?;
        self.count += 1;
        self.component_posts.push(post);
        self.last_xact = Some(xact);
        self.last_post = Some(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.report_subtotal(ctx)?;
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// RelatedPosts

/// Buffer matched postings; on flush, emit their transaction siblings
/// instead (the "other side" of each entry). With `also_matching`, the
/// received postings themselves are emitted too.
pub struct RelatedPosts {
    next: PostHandlerBox,
    posts: Vec<PostId>,
    also_matching: bool,
}

impl RelatedPosts {
    /// Expand postings to their siblings.
    pub fn new(next: PostHandlerBox, also_matching: bool) -> Self {
        RelatedPosts { next, posts: Vec::new(), also_matching }
    }
}

impl PostHandler for RelatedPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        ctx.journal.post_mut(post).xdata().flags.insert(PostXFlags::RECEIVED);
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        for post in std::mem::take(&mut self.posts) {
            let xact = ctx.journal.post(post).xact;
            for sibling in ctx.journal.xact(xact).posts.clone() {
                let candidate = ctx.journal.post(sibling);
                if candidate.has_xflags(PostXFlags::HANDLED) {
                    continue;
                }
                let emit = if candidate.has_xflags(PostXFlags::RECEIVED) {
                    self.also_matching
                } else {
                    !candidate
                        .flags
                        .intersects(PostingFlags::GENERATED | PostingFlags::VIRTUAL)
                };
                if emit {
                    ctx.journal.post_mut(sibling).xdata().flags.insert(PostXFlags::HANDLED);
                    self.next.push(ctx, sibling)?;
                }
            }
        }
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// ChangedValuePosts

/// Track the market value of the running total between displayed
/// postings, inserting a "Commodities revalued" posting whenever it
/// moved without a transaction, and a "Commodity rounding" posting when
/// display truncation would misstate the running total.
pub struct ChangedValuePosts {
    next: PostHandlerBox,
    revalued_account: AccountId,
    rounding_account: AccountId,
    changed_values_only: bool,
    last_post: Option<PostId>,
    last_total: Value,
    last_display_total: Value,
}

impl ChangedValuePosts {
    /// Revaluations post to `revalued_account`, rounding adjustments to
    /// `rounding_account`.
    pub fn new(
        next: PostHandlerBox,
        revalued_account: AccountId,
        rounding_account: AccountId,
        changed_values_only: bool,
    ) -> Self {
        ChangedValuePosts {
            next,
            revalued_account,
            rounding_account,
            changed_values_only,
            last_post: None,
            last_total: Value::Null,
            last_display_total: Value::Null,
        }
    }

    /// Evaluate `expr` for `post` as of `date` by temporarily overriding
    /// the posting's display date. The previous override is restored on
    /// success and on error alike, before the result propagates.
    fn calc_at(
        ctx: &mut ReportContext<'_>,
        expr: &Expr,
        post: PostId,
        date: Option<NaiveDate>,
    ) -> CalcResult {
        let saved = ctx.journal.post(post).xdata.as_ref().and_then(|x| x.date);
        if let Some(date) = date {
            ctx.journal.post_mut(post).xdata().date = Some(date);
        }
        let result = expr.calc(&ctx.bind(ItemRef::Post(post)));
        if date.is_some() {
            ctx.journal.post_mut(post).xdata().date = saved;
        }
        result
    }

    fn output_revaluation(
        &mut self,
        ctx: &mut ReportContext<'_>,
        post: PostId,
        date: Option<NaiveDate>,
    ) -> ReportResult<()> {
        let total_expr = ctx.report.total_expr.clone();
        let repriced_total = Self::calc_at(ctx, &total_expr, post, date)?;
        debug!("changed_value: last_total = {}", self.last_total);
        debug!("changed_value: repriced_total = {}", repriced_total);

        if !self.last_total.is_null() {
            let diff = repriced_total.sub(&self.last_total)?;
            if diff.is_truthy() {
                let date = date.unwrap_or_else(|| ctx.journal.post_date(post));
                let xact = ctx.journal.temp_xact("Commodities revalued", date);
                let revalued = make_temp_post(
                    ctx,
                    diff,
                    self.revalued_account,
                    xact,
                    Some(date),
                    Some(repriced_total),
                    false,
                )?;
                self.output_rounding(ctx, revalued)?;
                self.next.push(ctx, revalued)?;
            }
        }
        Ok(())
    }

    fn output_rounding(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let scope = ctx.bind(ItemRef::Post(post));
        let new_display_total = ctx.report.display_total_expr.calc(&scope)?;
        debug!("changed_value: new_display_total = {}", new_display_total);

        if !self.last_display_total.is_null() {
            let repriced_amount = ctx.report.display_amount_expr.calc(&scope)?;
            if repriced_amount.is_truthy() {
                let precise_display_total =
                    new_display_total.truncated().sub(&repriced_amount.truncated())?;
                let diff = precise_display_total.sub(&self.last_display_total)?;
                if diff.is_truthy() {
                    debug!("changed_value: rounding diff = {}", diff);
                    let date = ctx.journal.post_date(post);
                    let xact = ctx.journal.temp_xact("Commodity rounding", date);
                    let rounding = make_temp_post(
                        ctx,
                        diff,
                        self.rounding_account,
                        xact,
                        Some(date),
                        Some(precise_display_total),
                        true,
                    )?;
                    self.next.push(ctx, rounding)?;
                }
            }
        }
        self.last_display_total = new_display_total;
        Ok(())
    }
}

impl PostHandler for ChangedValuePosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        if let Some(last_post) = self.last_post {
            let date = ctx.journal.post_date(post);
            self.output_revaluation(ctx, last_post, Some(date))?;
        }

        if self.changed_values_only {
            ctx.journal.post_mut(post).xdata().flags.insert(PostXFlags::DISPLAYED);
        }

        self.output_rounding(ctx, post)?;
        self.next.push(ctx, post)?;

        self.last_total = ctx.report.total_expr.calc(&ctx.bind(ItemRef::Post(post)))?;
        self.last_post = Some(post);
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
// AnonymizePosts

/// Replace payees and account names with their SHA-1 hex digests,
/// reporting digested copies of every transaction and posting and
/// leaving notes behind.
pub struct AnonymizePosts {
    next: PostHandlerBox,
    last_xact: Option<XactId>,
    mapped_xact: Option<XactId>,
}

impl AnonymizePosts {
    /// Anonymize everything flowing through.
    pub fn new(next: PostHandlerBox) -> Self {
        AnonymizePosts { next, last_xact: None, mapped_xact: None }
    }
}

impl PostHandler for AnonymizePosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        // Digesting a digest would change it; already-anonymized postings
        // pass through so the stage is idempotent.
        if ctx.journal.post(post).flags.contains(PostingFlags::ANONYMIZED) {
            return self.next.push(ctx, post);
        }

        let source_xact = ctx.journal.post(post).xact;
        if self.last_xact != Some(source_xact) {
            let source = ctx.journal.xact(source_xact).clone();
            let xact = ctx.journal.temp_xact(sha1_hex(&source.payee), source.date);
            {
                let anonymized = ctx.journal.xact_mut(xact);
                anonymized.effective_date = source.effective_date;
                anonymized.state = source.state;
                anonymized.code = source.code.clone();
                anonymized.note = None;
            }
            self.last_xact = Some(source_xact);
            self.mapped_xact = Some(xact);
        }
        let xact = match self.mapped_xact {
            Some(xact) => xact,
            None => return Ok(()),
        };

        let fullname = {
            let account = ctx.journal.post(post).account;
            ctx.journal.account(account).fullname().to_string()
        };
        let digest = sha1_hex(&fullname);
        let account = match ctx.journal.find_account(&digest, true) {
            Some(account) => account,
            None => return Ok(()),
        };
        ctx.journal.account_mut(account).flags.insert(
            crate::account::AccountFlags::TEMP | crate::account::AccountFlags::GENERATED,
        );

        let mut temp = Posting::new(account, Amount::zero());
        temp.copy_details(ctx.journal.post(post));
        temp.account = account;
        temp.note = None;
        temp.flags.insert(PostingFlags::TEMP | PostingFlags::ANONYMIZED);
        let temp = ctx.journal.add_post(xact, temp);

        self.next.push(ctx, temp)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// RoundPosts

/// Replace each posting whose amount carries more precision than its
/// display with a temporary copy rounded to display precision.
pub struct RoundPosts {
    next: PostHandlerBox,
}

impl RoundPosts {
    /// Round displayed amounts.
    pub fn new(next: PostHandlerBox) -> Self {
        RoundPosts { next }
    }
}

impl PostHandler for RoundPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let amount = ctx.journal.post(post).amount.clone();
        let truncated = amount.truncated();
        if truncated.quantity() == amount.quantity() {
            return self.next.push(ctx, post);
        }

        let xact = ctx.journal.post(post).xact;
        let mut rounded = Posting::new(ctx.journal.post(post).account, Amount::zero());
        rounded.copy_details(ctx.journal.post(post));
        rounded.amount = truncated;
        rounded.flags.insert(PostingFlags::TEMP | PostingFlags::CALCULATED);
        let rounded = ctx.journal.add_post(xact, rounded);
        self.next.push(ctx, rounded)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.next.flush(ctx)
    }

    fn title(&mut self, ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.next.title(ctx, title)
    }
}

// ---------------------------------------------------------------------------
// TransferDetails

/// Which element a [`TransferDetails`] stage rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferElement {
    /// Replace the transaction payee
    Payee,
    /// Replace the posting's account
    Account,
}

/// Rewrite the payee or account of each posting from an expression
/// evaluated in the posting's own scope, reporting through temporary
/// copies.
pub struct TransferDetails {
    next: PostHandlerBox,
    element: TransferElement,
    expr: Expr,
}

impl TransferDetails {
    /// Rewrite `element` with the value of `expr`.
    pub fn new(next: PostHandlerBox, element: TransferElement, expr: Expr) -> Self {
        TransferDetails { next, element, expr }
    }
}

impl PostHandler for TransferDetails {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let source_xact = ctx.journal.post(post).xact;
        let source = ctx.journal.xact(source_xact).clone();
        let date = ctx.journal.post_date(post);

        let xact = ctx.journal.temp_xact(source.payee.clone(), date);
        {
            let copy = ctx.journal.xact_mut(xact);
            copy.state = source.state;
            copy.code = source.code.clone();
            copy.note = source.note.clone();
        }

        let mut temp = Posting::new(ctx.journal.post(post).account, Amount::zero());
        temp.copy_details(ctx.journal.post(post));
        temp.flags.insert(PostingFlags::TEMP);
        let temp = ctx.journal.add_post(xact, temp);

        let value = self.expr.calc(&ctx.bind(ItemRef::Post(temp)))?;
        match self.element {
            TransferElement::Payee => {
                ctx.journal.xact_mut(xact).payee = value.to_string();
            }
            TransferElement::Account => {
                let name = value.to_string();
                if let Some(account) = ctx.journal.find_account(&name, true) {
                    let old = ctx.journal.post(temp).account;
                    ctx.journal.account_mut(old).posts.retain(|p| *p != temp);
                    ctx.journal.post_mut(temp).account = account;
                    ctx.journal.account_mut(account).posts.push(temp);
                }
            }
        }

        self.next.push(ctx, temp)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
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
    fn test_sha1_hex_digest() {
        assert_eq!(sha1_hex("X"), "c032adc1ff629c9b66f22749ad667e6beadf144b");
        assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
