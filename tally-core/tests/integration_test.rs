//! End-to-end tests for the reporting pipeline

use std::cell::RefCell;
use std::rc::Rc;

use chrono::NaiveDate;
use tally_math::{Amount, DateInterval};

use tally_core::expr::{Expr, ItemRef, Predicate, ReportScope};
use tally_core::filters::{
    AnonymizePosts, BudgetFlags, BudgetPosts, ByPayeePosts, CalcPosts, ChangedValuePosts,
    CollapsePosts, DowPosts, ForecastPosts, IntervalPosts, PostHandler, PostsAsEquity,
    RelatedPosts, ReportContext, SortPosts, SubtotalPosts, TruncateXacts,
};
use tally_core::format::Format;
use tally_core::iterators::{pass_down_posts, PostsIterator};
use tally_core::journal::Journal;
use tally_core::posting::{PostId, Posting};
use tally_core::report::{Report, ReportError, ReportOptions, ReportResult, SharedBuffer};
use tally_core::transaction::Xact;
use tally_core::value::Value;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn report_scope() -> ReportScope {
    ReportScope::new(date(2024, 6, 15))
}

#[derive(Debug, Clone, PartialEq)]
struct CapturedPost {
    date: NaiveDate,
    effective: Option<NaiveDate>,
    payee: String,
    account: String,
    amount: String,
    total: String,
}

/// Terminal handler recording what reaches the end of a chain.
#[derive(Clone, Default)]
struct Capture {
    posts: Rc<RefCell<Vec<CapturedPost>>>,
    titles: Rc<RefCell<Vec<String>>>,
}

impl Capture {
    fn new() -> Self {
        Self::default()
    }

    fn posts(&self) -> Vec<CapturedPost> {
        self.posts.borrow().clone()
    }

    fn titles(&self) -> Vec<String> {
        self.titles.borrow().clone()
    }
}

impl PostHandler for Capture {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let amount = ctx.post_amount(post)?;
        let total = ctx
            .journal
            .post(post)
            .xdata
            .as_ref()
            .and_then(|x| x.total.clone())
            .unwrap_or(Value::Null);
        let xact = ctx.journal.post(post).xact;
        self.posts.borrow_mut().push(CapturedPost {
            date: ctx.journal.post_date(post),
            effective: ctx.journal.xact(xact).effective_date,
            payee: ctx.journal.post_payee(post).to_string(),
            account: ctx
                .journal
                .account(ctx.journal.post(post).reported_account())
                .fullname()
                .to_string(),
            amount: amount.to_string(),
            total: total.to_string(),
        });
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }

    fn title(&mut self, _ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        self.titles.borrow_mut().push(title.to_string());
        Ok(())
    }
}

fn add_simple_xact(
    journal: &mut Journal,
    when: NaiveDate,
    payee: &str,
    postings: &[(&str, &str)],
) {
    let xact = journal.add_xact(Xact::new(when, payee));
    for (account, amount) in postings {
        let account = journal.find_account(account, true).unwrap();
        let amount = Amount::parse_in(amount, &mut journal.commodities).unwrap();
        journal.add_post(xact, Posting::new(account, amount));
    }
}

fn sample_journal() -> Journal {
    let mut journal = Journal::new();
    add_simple_xact(
        &mut journal,
        date(2024, 1, 2),
        "Grocer",
        &[("Expenses:Food", "10.00 USD"), ("Assets:Cash", "-10.00 USD")],
    );
    add_simple_xact(
        &mut journal,
        date(2024, 1, 3),
        "Cafe",
        &[("Expenses:Food", "4.00 USD"), ("Assets:Cash", "-4.00 USD")],
    );
    journal
}

fn run_chain(
    journal: &mut Journal,
    scope: &ReportScope,
    head: &mut dyn PostHandler,
) -> ReportResult<()> {
    let iter = PostsIterator::journal_order(journal);
    let mut ctx = ReportContext::new(journal, scope);
    pass_down_posts(&mut ctx, iter, head)
}

// ---------------------------------------------------------------------------
// Invariants

#[test]
fn balance_preservation_through_passthrough() {
    let mut journal = sample_journal();
    let scope = report_scope();
    let capture = Capture::new();
    let mut head = capture.clone();
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let mut per_xact: std::collections::BTreeMap<String, Value> = Default::default();
    for post in capture.posts() {
        let amount = Value::Amount(Amount::parse(&post.amount).unwrap());
        let entry = per_xact.entry(post.payee.clone()).or_insert(Value::Null);
        *entry = entry.add(&amount).unwrap();
    }
    assert_eq!(per_xact.len(), 2);
    for (_, sum) in per_xact {
        assert!(!sum.is_truthy(), "transaction did not balance: {}", sum);
    }
}

#[test]
fn subtotal_preserves_per_account_sums() {
    let mut journal = sample_journal();
    add_simple_xact(
        &mut journal,
        date(2024, 2, 1),
        "Butcher",
        &[("Expenses:Food", "6.50 USD"), ("Assets:Cash", "-6.50 USD")],
    );
    let scope = report_scope();

    let capture = Capture::new();
    let mut head = SubtotalPosts::new(Box::new(capture.clone()));
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    assert_eq!(posts.len(), 2);
    let by_account: std::collections::BTreeMap<_, _> = posts
        .iter()
        .map(|p| (p.account.clone(), p.amount.clone()))
        .collect();
    assert_eq!(by_account["Assets:Cash"], "-20.50 USD");
    assert_eq!(by_account["Expenses:Food"], "20.50 USD");
}

#[test]
fn interval_generate_empty_partitions_range() {
    let mut journal = Journal::new();
    add_simple_xact(&mut journal, date(2024, 1, 10), "January", &[("Expenses:Food", "10.00 USD")]);
    add_simple_xact(&mut journal, date(2024, 4, 5), "April", &[("Expenses:Food", "7.00 USD")]);
    let scope = report_scope();

    let empty_account = journal.find_account("<None>", true).unwrap();
    let capture = Capture::new();
    let mut head = IntervalPosts::new(
        Box::new(capture.clone()),
        DateInterval::parse("monthly").unwrap(),
        empty_account,
        true,
    );
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    let payees: Vec<&str> = posts.iter().map(|p| p.payee.as_str()).collect();
    assert_eq!(
        payees,
        vec!["- 2024-01-10", "- 2024-02-29", "- 2024-03-31", "- 2024-04-05"]
    );
    // The emitted periods partition the covered range: consecutive month
    // starts, no gaps, no overlap.
    let starts: Vec<NaiveDate> = posts.iter().map(|p| p.effective.unwrap()).collect();
    assert_eq!(
        starts,
        vec![date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1), date(2024, 4, 1)]
    );
}

#[test]
fn head_and_tail_windows() {
    let mut journal = Journal::new();
    for day in 1..=5 {
        add_simple_xact(
            &mut journal,
            date(2024, 1, day),
            &format!("Payee{}", day),
            &[("Expenses:Food", "1.00 USD"), ("Assets:Cash", "-1.00 USD")],
        );
    }
    let scope = report_scope();

    let distinct = |capture: &Capture| {
        let mut payees: Vec<String> = Vec::new();
        for post in capture.posts() {
            if payees.last() != Some(&post.payee) {
                payees.push(post.payee);
            }
        }
        payees
    };

    let capture = Capture::new();
    let mut head = TruncateXacts::new(Box::new(capture.clone()), 2, 0);
    run_chain(&mut journal, &scope, &mut head).unwrap();
    assert_eq!(distinct(&capture), vec!["Payee1", "Payee2"]);

    let capture = Capture::new();
    let mut head = TruncateXacts::new(Box::new(capture.clone()), 0, 2);
    run_chain(&mut journal, &scope, &mut head).unwrap();
    assert_eq!(distinct(&capture), vec!["Payee4", "Payee5"]);

    // Negative counts invert the selection.
    let capture = Capture::new();
    let mut head = TruncateXacts::new(Box::new(capture.clone()), -2, 0);
    run_chain(&mut journal, &scope, &mut head).unwrap();
    assert_eq!(distinct(&capture), vec!["Payee3", "Payee4", "Payee5"]);

    let capture = Capture::new();
    let mut head = TruncateXacts::new(Box::new(capture.clone()), 0, -2);
    run_chain(&mut journal, &scope, &mut head).unwrap();
    assert_eq!(distinct(&capture), vec!["Payee1", "Payee2", "Payee3"]);
}

#[test]
fn sort_is_stable_for_equal_keys() {
    let mut journal = Journal::new();
    for payee in ["Alpha", "Beta", "Gamma"] {
        add_simple_xact(&mut journal, date(2024, 1, 2), payee, &[("Expenses:Food", "1.00 USD")]);
    }
    add_simple_xact(&mut journal, date(2024, 1, 1), "Delta", &[("Expenses:Food", "1.00 USD")]);
    let scope = report_scope();

    let capture = Capture::new();
    let mut head = SortPosts::new(Box::new(capture.clone()), Expr::parse("d").unwrap());
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let payees: Vec<String> = capture.posts().into_iter().map(|p| p.payee).collect();
    assert_eq!(payees, vec!["Delta", "Alpha", "Beta", "Gamma"]);
}

#[test]
fn format_round_trip_default_rendering() {
    let mut journal = sample_journal();
    let scope = report_scope();
    let post = journal.journal_posts()[0];

    let format = Format::parse("%(payee)").unwrap();
    let ctx = ReportContext::new(&mut journal, &scope);
    let rendered = format.format(&ctx.bind(ItemRef::Post(post))).unwrap();
    assert_eq!(rendered, "Grocer");

    let format = Format::parse("%(a)").unwrap();
    let rendered = format.format(&ctx.bind(ItemRef::Post(post))).unwrap();
    assert_eq!(rendered, "10.00 USD");
}

#[test]
fn truncation_renders_exactly_max_width() {
    let mut journal = Journal::new();
    add_simple_xact(
        &mut journal,
        date(2024, 1, 2),
        "Neighborhood Grocery Store",
        &[("Expenses:Food", "1.00 USD")],
    );
    let scope = report_scope();
    let post = journal.journal_posts()[0];
    let ctx = ReportContext::new(&mut journal, &scope);

    for max_width in 4..=12usize {
        let format = Format::parse(&format!("%.{}(payee)", max_width)).unwrap();
        let rendered = format.format(&ctx.bind(ItemRef::Post(post))).unwrap();
        assert_eq!(rendered.chars().count(), max_width, "width {}", max_width);
    }
}

#[test]
fn anonymize_is_idempotent() {
    let scope = report_scope();

    let once = Capture::new();
    let mut journal = sample_journal();
    let mut head = AnonymizePosts::new(Box::new(once.clone()));
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let twice = Capture::new();
    let mut journal = sample_journal();
    let mut head =
        AnonymizePosts::new(Box::new(AnonymizePosts::new(Box::new(twice.clone()))));
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let strip = |posts: Vec<CapturedPost>| -> Vec<(String, String)> {
        posts.into_iter().map(|p| (p.payee, p.account)).collect()
    };
    let once_posts = strip(once.posts());
    assert_eq!(once_posts, strip(twice.posts()));

    // Digests, not names.
    assert_eq!(once_posts[0].0, "d4d433942feb69922cc3d0372dd70070057014a5");
    assert_eq!(once_posts[0].1, "1b565047893eb8f55e839a9f0b5259d047547a82");
    assert_eq!(once_posts[1].1, "5321567d559b6bd673d7280bb6f04964de2f72a0");
}

// ---------------------------------------------------------------------------
// End-to-end scenarios

#[test]
fn collapse_emits_one_total_posting() {
    let mut journal = Journal::new();
    add_simple_xact(
        &mut journal,
        date(2024, 1, 2),
        "X",
        &[("Expenses:Food", "10.00 USD"), ("Assets:Cash", "-10.00 USD")],
    );
    let scope = report_scope();

    let totals = journal.find_account("Total", true).unwrap();
    let capture = Capture::new();
    let mut head = CollapsePosts::new(Box::new(capture.clone()), totals, false);
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].account, "Total");
    assert_eq!(posts[0].amount, "0.00 USD");
    assert_eq!(posts[0].payee, "X");
    assert_eq!(posts[0].date, date(2024, 1, 2));
}

#[test]
fn interval_groups_label_with_last_posting_date() {
    let mut journal = Journal::new();
    for (day, amount) in [(5, "10.00 USD"), (12, "20.00 USD"), (20, "30.00 USD")] {
        add_simple_xact(&mut journal, date(2024, 1, day), "Jan", &[("Expenses:Food", amount)]);
    }
    for (day, amount) in [(3, "5.00 USD"), (14, "7.00 USD")] {
        add_simple_xact(&mut journal, date(2024, 2, day), "Feb", &[("Expenses:Food", amount)]);
    }
    let scope = report_scope();

    let empty_account = journal.find_account("<None>", true).unwrap();
    let capture = Capture::new();
    let mut head = IntervalPosts::new(
        Box::new(capture.clone()),
        DateInterval::parse("monthly").unwrap(),
        empty_account,
        false,
    );
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].payee, "- 2024-01-20");
    assert_eq!(posts[0].amount, "60.00 USD");
    assert_eq!(posts[1].payee, "- 2024-02-14");
    assert_eq!(posts[1].amount, "12.00 USD");
}

#[test]
fn changed_value_inserts_revaluation_posting() {
    let mut journal = Journal::new();
    add_simple_xact(&mut journal, date(2024, 1, 1), "Buy", &[("Assets:FX", "1.00 EUR")]);
    add_simple_xact(&mut journal, date(2024, 6, 1), "Buy more", &[("Assets:FX", "1.00 EUR")]);

    let eur = journal.commodities.find("EUR").unwrap();
    let usd = journal.commodities.find_or_create("USD", 2);
    eur.add_price(date(2024, 1, 1), Amount::new("1.10".parse().unwrap(), Some(usd.clone())));
    eur.add_price(date(2024, 6, 1), Amount::new("1.20".parse().unwrap(), Some(usd)));

    let mut scope = report_scope();
    scope.total_expr = Expr::parse("V").unwrap();
    scope.display_amount_expr = Expr::parse("v").unwrap();

    let revalued = journal.find_account("<Revalued>", true).unwrap();
    let rounding = journal.find_account("<Adjustment>", true).unwrap();
    let capture = Capture::new();
    let changed =
        ChangedValuePosts::new(Box::new(capture.clone()), revalued, rounding, false);
    let mut head = CalcPosts::new(Box::new(changed), false);
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    let summary: Vec<(&str, &str)> = posts
        .iter()
        .map(|p| (p.payee.as_str(), p.amount.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Buy", "1.00 EUR"),
            ("Commodities revalued", "0.10 USD"),
            ("Buy more", "1.00 EUR"),
        ]
    );
    assert_eq!(posts[1].date, date(2024, 6, 1));
}

#[test]
fn forecast_emits_until_predicate_fails() {
    let mut journal = Journal::new();
    let rent = journal.find_account("Expenses:Rent", true).unwrap();
    let template = journal.add_xact(Xact::new(date(2024, 1, 1), "Monthly rent"));
    let amount = Amount::parse_in("1000.00 USD", &mut journal.commodities).unwrap();
    journal.add_post(template, Posting::new(rent, amount));
    journal.add_period_xact(DateInterval::parse("monthly").unwrap(), template);

    let scope = ReportScope::new(date(2024, 1, 15));
    let capture = Capture::new();
    let mut head = {
        let ctx = ReportContext::new(&mut journal, &scope);
        ForecastPosts::new(
            Box::new(capture.clone()),
            Predicate::parse("d < [2024-04-01]").unwrap(),
            &ctx,
        )
        .unwrap()
    };
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].date, date(2024, 2, 1));
    assert_eq!(posts[1].date, date(2024, 3, 1));
    for post in &posts {
        assert_eq!(post.payee, "Forecast transaction");
        assert_eq!(post.amount, "1000.00 USD");
        assert_eq!(post.account, "Expenses:Rent");
    }
}

#[test]
fn truncate_head_keeps_source_order() {
    let mut journal = Journal::new();
    for day in 1..=5 {
        add_simple_xact(
            &mut journal,
            date(2024, 1, day),
            &format!("Payee{}", day),
            &[("Expenses:Food", "1.00 USD"), ("Assets:Cash", "-1.00 USD")],
        );
    }
    let scope = report_scope();

    let capture = Capture::new();
    let mut head = TruncateXacts::new(Box::new(capture.clone()), 2, 0);
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let seen: Vec<(String, String)> = capture
        .posts()
        .into_iter()
        .map(|p| (p.payee, p.account))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("Payee1".to_string(), "Expenses:Food".to_string()),
            ("Payee1".to_string(), "Assets:Cash".to_string()),
            ("Payee2".to_string(), "Expenses:Food".to_string()),
            ("Payee2".to_string(), "Assets:Cash".to_string()),
        ]
    );
}

#[test]
fn format_alignment_scenario() {
    let mut journal = Journal::new();
    add_simple_xact(&mut journal, date(2024, 1, 2), "Grocer", &[("Expenses:Food", "5.00 USD")]);
    let scope = report_scope();
    let post = journal.journal_posts()[0];

    let format = Format::parse("%-20(payee) %12{amount}").unwrap();
    let ctx = ReportContext::new(&mut journal, &scope);
    let rendered = format.format(&ctx.bind(ItemRef::Post(post))).unwrap();
    insta::assert_snapshot!(rendered, @"Grocer                   5.00 USD");
    assert_eq!(rendered, format!("{:<20} {:>12}", "Grocer", "5.00 USD"));
}

// ---------------------------------------------------------------------------
// Further stages

#[test]
fn by_payee_groups_with_titles() {
    let mut journal = Journal::new();
    add_simple_xact(&mut journal, date(2024, 1, 2), "Grocer", &[("Expenses:Food", "10.00 USD")]);
    add_simple_xact(&mut journal, date(2024, 1, 3), "Cafe", &[("Expenses:Food", "4.00 USD")]);
    add_simple_xact(&mut journal, date(2024, 1, 9), "Cafe", &[("Expenses:Food", "3.00 USD")]);
    let scope = report_scope();

    let capture = Capture::new();
    let mut head = ByPayeePosts::new(Box::new(capture.clone()));
    run_chain(&mut journal, &scope, &mut head).unwrap();

    assert_eq!(capture.titles(), vec!["Cafe", "Grocer"]);
    let posts = capture.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].payee, "Cafe");
    assert_eq!(posts[0].amount, "7.00 USD");
    assert_eq!(posts[1].payee, "Grocer");
    assert_eq!(posts[1].amount, "10.00 USD");
}

#[test]
fn dow_buckets_label_weekday_names() {
    let mut journal = Journal::new();
    // 2024-01-01 is a Monday, 2024-01-05 a Friday.
    add_simple_xact(&mut journal, date(2024, 1, 1), "Monday buy", &[("Expenses:Food", "2.00 USD")]);
    add_simple_xact(&mut journal, date(2024, 1, 8), "Monday again", &[("Expenses:Food", "3.00 USD")]);
    add_simple_xact(&mut journal, date(2024, 1, 5), "Friday buy", &[("Expenses:Food", "5.00 USD")]);
    let scope = report_scope();

    let capture = Capture::new();
    let mut head = DowPosts::new(Box::new(capture.clone()));
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let summary: Vec<(String, String)> = capture
        .posts()
        .into_iter()
        .map(|p| (p.payee, p.amount))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Mondays".to_string(), "5.00 USD".to_string()),
            ("Fridays".to_string(), "5.00 USD".to_string()),
        ]
    );
}

#[test]
fn related_expands_to_siblings() {
    let mut journal = sample_journal();
    let scope = report_scope();

    let capture = Capture::new();
    let mut related = RelatedPosts::new(Box::new(capture.clone()), false);

    // Feed only the Grocer food posting; its cash side comes out.
    let food_post = journal.journal_posts()[0];
    let mut ctx = ReportContext::new(&mut journal, &scope);
    related.push(&mut ctx, food_post).unwrap();
    related.flush(&mut ctx).unwrap();

    let posts = capture.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].account, "Assets:Cash");
    assert_eq!(posts[0].payee, "Grocer");
}

#[test]
fn budget_reports_elapsed_periods_negated() {
    let mut journal = Journal::new();
    let food = journal.find_account("Expenses:Food", true).unwrap();
    let template = journal.add_xact(Xact::new(date(2024, 1, 1), "Food budget"));
    let amount = Amount::parse_in("500.00 USD", &mut journal.commodities).unwrap();
    journal.add_post(template, Posting::new(food, amount));
    journal
        .add_period_xact(DateInterval::parse("monthly from 2024-01-01").unwrap(), template);

    add_simple_xact(
        &mut journal,
        date(2024, 3, 10),
        "Market",
        &[("Expenses:Food:Market", "520.00 USD")],
    );
    let scope = report_scope();

    let capture = Capture::new();
    let mut head = {
        let ctx = ReportContext::new(&mut journal, &scope);
        BudgetPosts::new(Box::new(capture.clone()), BudgetFlags::BUDGETED, &ctx)
    };
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    let summary: Vec<(&str, NaiveDate, &str)> = posts
        .iter()
        .map(|p| (p.payee.as_str(), p.date, p.amount.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Budget transaction", date(2024, 1, 1), "-500.00 USD"),
            ("Budget transaction", date(2024, 2, 1), "-500.00 USD"),
            ("Budget transaction", date(2024, 3, 1), "-500.00 USD"),
            ("Market", date(2024, 3, 10), "520.00 USD"),
        ]
    );
    // The real posting reports under the budgeted ancestor account.
    assert_eq!(posts[3].account, "Expenses:Food");
}

#[test]
fn equity_balances_accumulated_totals() {
    let mut journal = Journal::new();
    add_simple_xact(&mut journal, date(2024, 1, 2), "One", &[("Expenses:Food", "10.00 USD")]);
    add_simple_xact(&mut journal, date(2024, 1, 5), "Two", &[("Expenses:Food", "5.00 USD")]);
    let scope = report_scope();

    let equity = journal.find_account("Equity:Opening Balances", true).unwrap();
    let capture = Capture::new();
    let mut head = PostsAsEquity::new(Box::new(capture.clone()), equity);
    run_chain(&mut journal, &scope, &mut head).unwrap();

    let posts = capture.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].payee, "Opening Balances");
    assert_eq!(posts[0].account, "Expenses:Food");
    assert_eq!(posts[0].amount, "15.00 USD");
    assert_eq!(posts[1].account, "Equity:Opening Balances");
    assert_eq!(posts[1].amount, "-15.00 USD");
    assert_eq!(posts[0].date, date(2024, 1, 5));
}

// ---------------------------------------------------------------------------
// Whole-report runs

#[test]
fn register_run_renders_running_totals() {
    let mut journal = sample_journal();
    let options = ReportOptions {
        current_date: Some(date(2024, 6, 15)),
        ..Default::default()
    };
    let report = Report::new(options).unwrap();

    let buffer = SharedBuffer::new();
    report.run(&mut journal, Box::new(buffer.clone())).unwrap();

    let contents = buffer.contents();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        vec![
            "2024-01-02 Grocer               Expenses:Food              10.00 USD    10.00 USD",
            "2024-01-02 Grocer               Assets:Cash               -10.00 USD     0.00 USD",
            "2024-01-03 Cafe                 Expenses:Food               4.00 USD     4.00 USD",
            "2024-01-03 Cafe                 Assets:Cash                -4.00 USD     0.00 USD",
        ]
    );

    // Temporaries and xdata are gone after the run.
    assert_eq!(journal.xact_count(), 2);
    for post in journal.journal_posts() {
        assert!(!journal.post(post).has_xdata());
    }
}

#[test]
fn account_run_lists_visited_accounts() {
    let mut journal = sample_journal();
    let options = ReportOptions {
        current_date: Some(date(2024, 6, 15)),
        ..Default::default()
    };
    let report = Report::new(options).unwrap();

    let buffer = SharedBuffer::new();
    report.run_accounts(&mut journal, Box::new(buffer.clone())).unwrap();

    let contents = buffer.contents();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        vec!["  -14.00 USD  Assets:Cash", "   14.00 USD  Expenses:Food"]
    );
}

#[test]
fn errors_carry_item_context() {
    let mut journal = sample_journal();
    let options = ReportOptions {
        predicate: Some("1 / 0".to_string()),
        current_date: Some(date(2024, 6, 15)),
        ..Default::default()
    };
    let report = Report::new(options).unwrap();

    let buffer = SharedBuffer::new();
    let err = report.run(&mut journal, Box::new(buffer.clone())).unwrap_err();
    match err {
        ReportError::Context { context, source } => {
            assert!(context.contains("While handling posting"), "context: {}", context);
            assert!(matches!(*source, ReportError::Calc(_)));
        }
        other => panic!("expected contextual error, got {}", other),
    }
    // Nothing was written, and the journal is back to pristine state.
    assert_eq!(buffer.contents(), "");
    assert_eq!(journal.xact_count(), 2);
}

#[test]
fn collapsed_register_via_report_options() {
    let mut journal = sample_journal();
    let options = ReportOptions {
        collapse: true,
        totals_account: "Total".to_string(),
        format: Some("%d %-10P %-12a %10{t}\n".to_string()),
        current_date: Some(date(2024, 6, 15)),
        ..Default::default()
    };
    let report = Report::new(options).unwrap();

    let buffer = SharedBuffer::new();
    report.run(&mut journal, Box::new(buffer.clone())).unwrap();

    let contents = buffer.contents();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        vec![
            "2024-01-02 Grocer     Total          0.00 USD",
            "2024-01-03 Cafe       Total          0.00 USD",
        ]
    );
}
