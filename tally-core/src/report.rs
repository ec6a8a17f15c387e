//! Report configuration, chain assembly, and the terminal formatters
//!
//! A [`Report`] turns a [`ReportOptions`] into a [`ReportScope`] plus a
//! handler chain wired outside-in: the stage closest to the source sees
//! raw postings, later stages see transformed ones. `run` drives the
//! posting iterator through the chain, flushes, and tears down every
//! temporary the pipeline created, whether or not an error cut it short.

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use chrono::NaiveDate;

use tally_math::{DateError, DateInterval};

use crate::expr::{
    CalcError, Expr, ItemRef, ParseError, Predicate, ReportScope,
};
use crate::filters::{
    AccountHandler, AnonymizePosts, BudgetFlags, BudgetPosts, ByPayeePosts, CalcPosts,
    ChangedValuePosts, CollapsePosts, DisplayFilterPosts, DowPosts, FilterPosts, ForecastPosts,
    IntervalPosts, PostHandler, PostHandlerBox, PostsAsEquity, RelatedPosts, ReportContext,
    RoundPosts, SortPosts, SubtotalPosts, TruncateXacts,
};
use crate::format::{Format, FormatError};
use crate::iterators::{pass_down_accounts, pass_down_posts, AccountsIterator, PostsIterator};
use crate::journal::Journal;
use crate::posting::PostId;

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors that can occur while building or running a report
#[derive(Debug)]
pub enum ReportError {
    /// Syntax error in an expression, format string or period
    Parse(ParseError),
    /// Evaluation failure
    Calc(CalcError),
    /// Format engine failure
    Format(FormatError),
    /// Bad date or period in the configuration
    Date(DateError),
    /// Output sink failure
    Io(String),
    /// Unusable report configuration
    InvalidConfig(String),
    /// An error wrapped with the item or phase it occurred in
    Context {
        /// What was being processed
        context: String,
        /// The underlying error
        source: Box<ReportError>,
    },
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Parse(err) => write!(f, "{}", err),
            ReportError::Calc(err) => write!(f, "{}", err),
            ReportError::Format(err) => write!(f, "{}", err),
            ReportError::Date(err) => write!(f, "{}", err),
            ReportError::Io(msg) => write!(f, "IO error: {}", msg),
            ReportError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            ReportError::Context { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl Error for ReportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReportError::Context { source, .. } => Some(source.as_ref()),
            ReportError::Parse(err) => Some(err),
            ReportError::Calc(err) => Some(err),
            ReportError::Format(err) => Some(err),
            ReportError::Date(err) => Some(err),
            _ => None,
        }
    }
}

impl ReportError {
    /// Wrap this error with the item or phase being processed.
    pub fn with_context(self, context: String) -> ReportError {
        ReportError::Context { context, source: Box::new(self) }
    }
}

impl From<ParseError> for ReportError {
    fn from(err: ParseError) -> Self {
        ReportError::Parse(err)
    }
}

impl From<CalcError> for ReportError {
    fn from(err: CalcError) -> Self {
        ReportError::Calc(err)
    }
}

impl From<FormatError> for ReportError {
    fn from(err: FormatError) -> Self {
        ReportError::Format(err)
    }
}

impl From<DateError> for ReportError {
    fn from(err: DateError) -> Self {
        ReportError::Date(err)
    }
}

impl From<std::io::Error> for ReportError {
    fn from(err: std::io::Error) -> Self {
        ReportError::Io(err.to_string())
    }
}

impl From<crate::value::ValueError> for ReportError {
    fn from(err: crate::value::ValueError) -> Self {
        ReportError::Calc(CalcError::from(err))
    }
}

/// Which side of the budget a report shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetMode {
    /// No budget processing
    #[default]
    None,
    /// Budgeted accounts only
    Budgeted,
    /// Unbudgeted accounts only
    Unbudgeted,
    /// Both
    Both,
}

impl BudgetMode {
    fn flags(self) -> BudgetFlags {
        match self {
            BudgetMode::None => BudgetFlags::empty(),
            BudgetMode::Budgeted => BudgetFlags::BUDGETED,
            BudgetMode::Unbudgeted => BudgetFlags::UNBUDGETED,
            BudgetMode::Both => BudgetFlags::BUDGETED | BudgetFlags::UNBUDGETED,
        }
    }
}

const DEFAULT_REGISTER_FORMAT: &str = "%d %-20P %-23a %12{t} %12{T}\n";
const DEFAULT_ACCOUNT_FORMAT: &str = "%12{amount}  %(account)\n";

/// Everything the CLI front-end can ask of the reporting core.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Emit only the first N transactions (negative inverts)
    pub head_count: i32,
    /// Emit only the last N transactions (negative inverts)
    pub tail_count: i32,
    /// Sort postings by this expression
    pub sort_order: Option<String>,
    /// Keep only postings matching this predicate
    pub predicate: Option<String>,
    /// Display only postings matching this predicate
    pub display_predicate: Option<String>,
    /// Subtotal by account over the whole range
    pub subtotal: bool,
    /// Subtotal per period, e.g. `"monthly"`
    pub interval: Option<String>,
    /// Emit zero placeholders for quiet periods
    pub generate_empty: bool,
    /// Group by payee
    pub by_payee: bool,
    /// Group by day of week
    pub by_dow: bool,
    /// Collapse each transaction to one posting
    pub collapse: bool,
    /// Collapse only transactions whose net is zero
    pub collapse_if_zero: bool,
    /// Show the siblings of matched postings
    pub related: bool,
    /// Show matched postings along with their siblings
    pub related_all: bool,
    /// Budget processing mode
    pub budget_mode: BudgetMode,
    /// Forecast until this predicate fails
    pub forecast_predicate: Option<String>,
    /// Digest payees and account names
    pub anonymize: bool,
    /// Insert revaluation postings when market values move
    pub changed_values: bool,
    /// Render accumulated balances as an equity transaction
    pub equity: bool,
    /// Round displayed amounts to display precision
    pub round: bool,
    /// Run totals per account instead of globally
    pub account_wise: bool,
    /// Account receiving revaluation postings
    pub revalued_account: String,
    /// Account receiving display-rounding postings
    pub rounding_account: String,
    /// Account receiving collapsed totals
    pub totals_account: String,
    /// Account balancing equity output
    pub equity_account: String,
    /// Override of the amount expression
    pub amount_expr: Option<String>,
    /// Override of the total expression
    pub total_expr: Option<String>,
    /// Output format string
    pub format: Option<String>,
    /// Date format for rendered dates
    pub date_format: Option<String>,
    /// Per-segment length for account abbreviation
    pub account_abbrev_length: Option<usize>,
    /// Output width; defaults from the COLUMNS environment variable
    pub output_width: usize,
    /// The report's "today"; defaults to the wall clock
    pub current_date: Option<NaiveDate>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        let output_width = std::env::var("COLUMNS")
            .ok()
            .and_then(|columns| columns.parse().ok())
            .unwrap_or(80);
        ReportOptions {
            head_count: 0,
            tail_count: 0,
            sort_order: None,
            predicate: None,
            display_predicate: None,
            subtotal: false,
            interval: None,
            generate_empty: false,
            by_payee: false,
            by_dow: false,
            collapse: false,
            collapse_if_zero: false,
            related: false,
            related_all: false,
            budget_mode: BudgetMode::None,
            forecast_predicate: None,
            anonymize: false,
            changed_values: false,
            equity: false,
            round: false,
            account_wise: false,
            revalued_account: "<Revalued>".to_string(),
            rounding_account: "<Adjustment>".to_string(),
            totals_account: "<Total>".to_string(),
            equity_account: "Equity:Opening Balances".to_string(),
            amount_expr: None,
            total_expr: None,
            format: None,
            date_format: None,
            account_abbrev_length: None,
            output_width,
            current_date: None,
        }
    }
}

/// A configured report: scope plus options, ready to build chains.
pub struct Report {
    /// Evaluation defaults derived from the options
    pub scope: ReportScope,
    /// The configuration this report was built from
    pub options: ReportOptions,
}

impl Report {
    /// Parse the option expressions and fix the evaluation defaults.
    pub fn new(options: ReportOptions) -> ReportResult<Report> {
        let current_date = options
            .current_date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let mut scope = ReportScope::new(current_date);
        if let Some(source) = &options.amount_expr {
            scope.amount_expr = Expr::parse(source)?;
        }
        if let Some(source) = &options.total_expr {
            scope.total_expr = Expr::parse(source)?;
        }
        if let Some(date_format) = &options.date_format {
            scope.date_format = date_format.clone();
            scope.output_date_format = date_format.clone();
        }

        scope.amount_expr.compile(&scope).map_err(CalcError::from)?;
        scope.total_expr.compile(&scope).map_err(CalcError::from)?;
        Ok(Report { scope, options })
    }

    fn parse_predicate(source: &Option<String>) -> ReportResult<Option<Predicate>> {
        match source {
            Some(source) => Ok(Some(Predicate::parse(source)?)),
            None => Ok(None),
        }
    }

    /// Compose the posting handler chain for this configuration, from the
    /// terminal formatter back to the head. The head is what the source
    /// iterator feeds.
    pub fn chain(
        &self,
        journal: &mut Journal,
        output: Box<dyn Write>,
    ) -> ReportResult<PostHandlerBox> {
        let options = &self.options;

        let format_source = options
            .format
            .clone()
            .unwrap_or_else(|| DEFAULT_REGISTER_FORMAT.to_string());
        let mut format = Format::parse(&format_source)?;
        if let Some(length) = options.account_abbrev_length {
            format = format.with_account_abbrev(length);
        }

        let mut handler: PostHandlerBox = Box::new(FormatPosts::new(format, output));

        if let Some(predicate) = Self::parse_predicate(&options.display_predicate)? {
            handler = Box::new(DisplayFilterPosts::new(handler, predicate));
        }

        if options.round {
            handler = Box::new(RoundPosts::new(handler));
        }

        if options.changed_values {
            let revalued = find_or_config_error(journal, &options.revalued_account)?;
            let rounding = find_or_config_error(journal, &options.rounding_account)?;
            handler = Box::new(ChangedValuePosts::new(handler, revalued, rounding, false));
        }

        match options.budget_mode {
            BudgetMode::None => {
                if let Some(source) = &options.forecast_predicate {
                    let predicate = Predicate::parse(source)?;
                    let ctx = ReportContext::new(journal, &self.scope);
                    handler = Box::new(ForecastPosts::new(handler, predicate, &ctx)?);
                }
            }
            mode => {
                let ctx = ReportContext::new(journal, &self.scope);
                handler = Box::new(BudgetPosts::new(handler, mode.flags(), &ctx));
            }
        }

        if options.equity {
            let equity = find_or_config_error(journal, &options.equity_account)?;
            handler = Box::new(PostsAsEquity::new(handler, equity));
        }

        if options.by_dow {
            handler = Box::new(DowPosts::new(handler));
        } else if options.by_payee {
            handler = Box::new(ByPayeePosts::new(handler));
        } else if let Some(period) = &options.interval {
            let interval = DateInterval::parse(period)?;
            let empty_account = find_or_config_error(journal, "<None>")?;
            handler = Box::new(IntervalPosts::new(
                handler,
                interval,
                empty_account,
                options.generate_empty,
            ));
        } else if options.subtotal {
            handler = Box::new(SubtotalPosts::new(handler));
        }

        if options.collapse || options.collapse_if_zero {
            let totals = find_or_config_error(journal, &options.totals_account)?;
            let display = Self::parse_predicate(&options.display_predicate)?;
            let only = Self::parse_predicate(&options.predicate)?;
            handler = Box::new(
                CollapsePosts::new(handler, totals, options.collapse_if_zero)
                    .with_predicates(only, display),
            );
        }

        if options.related || options.related_all {
            handler = Box::new(RelatedPosts::new(handler, options.related_all));
        }

        handler = Box::new(CalcPosts::new(handler, options.account_wise));

        if options.head_count != 0 || options.tail_count != 0 {
            handler = Box::new(TruncateXacts::new(
                handler,
                options.head_count,
                options.tail_count,
            ));
        }

        if let Some(source) = &options.sort_order {
            handler = Box::new(SortPosts::new(handler, Expr::parse(source)?));
        }

        if let Some(predicate) = Self::parse_predicate(&options.predicate)? {
            handler = Box::new(FilterPosts::new(handler, predicate));
        }

        if options.anonymize {
            handler = Box::new(AnonymizePosts::new(handler));
        }

        Ok(handler)
    }

    /// Run the posting report: build the chain, stream every journal
    /// posting through it, flush, and tear down transient state.
    pub fn run(&self, journal: &mut Journal, output: Box<dyn Write>) -> ReportResult<()> {
        let checkpoint = journal.checkpoint();
        let result = self.run_inner(journal, output);
        journal.clear_transients(checkpoint);
        result
    }

    fn run_inner(&self, journal: &mut Journal, output: Box<dyn Write>) -> ReportResult<()> {
        let mut head = self.chain(journal, output)?;
        let iter = PostsIterator::journal_order(journal);
        let mut ctx = ReportContext::new(journal, &self.scope);
        pass_down_posts(&mut ctx, iter, head.as_mut())
    }

    /// Run the simpler whole-account report: stream postings through a
    /// bare totals stage to populate account state, then walk the account
    /// tree through the account formatter.
    pub fn run_accounts(
        &self,
        journal: &mut Journal,
        output: Box<dyn Write>,
    ) -> ReportResult<()> {
        let checkpoint = journal.checkpoint();
        let result = self.run_accounts_inner(journal, output);
        journal.clear_transients(checkpoint);
        result
    }

    fn run_accounts_inner(
        &self,
        journal: &mut Journal,
        output: Box<dyn Write>,
    ) -> ReportResult<()> {
        let mut totals: PostHandlerBox =
            Box::new(CalcPosts::new(Box::new(IgnorePosts), true));
        {
            let iter = PostsIterator::journal_order(journal);
            let mut ctx = ReportContext::new(journal, &self.scope);
            pass_down_posts(&mut ctx, iter, totals.as_mut())?;
        }

        let format_source = self
            .options
            .format
            .clone()
            .unwrap_or_else(|| DEFAULT_ACCOUNT_FORMAT.to_string());
        let format = Format::parse(&format_source)?;
        let mut formatter = FormatAccounts::new(format, output);

        let predicate = Self::parse_predicate(&self.options.display_predicate)?;
        let iter = match &self.options.sort_order {
            Some(source) => {
                AccountsIterator::sorted_by(journal, &self.scope, &Expr::parse(source)?)?
            }
            None => AccountsIterator::pre_order(journal),
        };
        let mut ctx = ReportContext::new(journal, &self.scope);
        pass_down_accounts(&mut ctx, iter, predicate.as_ref(), &mut formatter)
    }
}

fn find_or_config_error(
    journal: &mut Journal,
    name: &str,
) -> ReportResult<crate::account::AccountId> {
    journal
        .find_account(name, true)
        .ok_or_else(|| ReportError::InvalidConfig(format!("cannot create account '{}'", name)))
}

/// Terminal posting handler: renders each posting through the format
/// engine and writes the result to the sink.
pub struct FormatPosts {
    format: Format,
    output: Box<dyn Write>,
}

impl FormatPosts {
    /// Render with `format` into `output`.
    pub fn new(format: Format, output: Box<dyn Write>) -> Self {
        FormatPosts { format, output }
    }
}

impl PostHandler for FormatPosts {
    fn push(&mut self, ctx: &mut ReportContext<'_>, post: PostId) -> ReportResult<()> {
        let rendered = self
            .format
            .format(&ctx.bind(ItemRef::Post(post)))
            .map_err(|err| {
                ReportError::from(err).with_context(format!(
                    "While formatting posting dated {}",
                    ctx.journal.post_date(post)
                ))
            })?;
        self.output.write_all(rendered.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.output.flush()?;
        Ok(())
    }

    fn title(&mut self, _ctx: &mut ReportContext<'_>, title: &str) -> ReportResult<()> {
        writeln!(self.output, "{}", title)?;
        Ok(())
    }
}

/// Terminal account handler: renders each visited account.
pub struct FormatAccounts {
    format: Format,
    output: Box<dyn Write>,
}

impl FormatAccounts {
    /// Render with `format` into `output`.
    pub fn new(format: Format, output: Box<dyn Write>) -> Self {
        FormatAccounts { format, output }
    }
}

impl AccountHandler for FormatAccounts {
    fn push(
        &mut self,
        ctx: &mut ReportContext<'_>,
        account: crate::account::AccountId,
    ) -> ReportResult<()> {
        // Only accounts something actually posted to appear.
        if !ctx
            .journal
            .account(account)
            .has_xflags(crate::account::AccountXFlags::VISITED)
        {
            return Ok(());
        }
        let rendered = self
            .format
            .format(&ctx.bind(ItemRef::Account(account)))
            .map_err(ReportError::from)?;
        self.output.write_all(rendered.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.output.flush()?;
        Ok(())
    }
}

/// Terminal stage that discards everything; used when a chain is run
/// only for its side effects on xdata.
pub struct IgnorePosts;

impl PostHandler for IgnorePosts {
    fn push(&mut self, _ctx: &mut ReportContext<'_>, _post: PostId) -> ReportResult<()> {
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }

    fn title(&mut self, _ctx: &mut ReportContext<'_>, _title: &str) -> ReportResult<()> {
        Ok(())
    }
}

/// A clonable in-memory sink, handy for capturing report output.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured output as UTF-8 text.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.borrow()).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ReportOptions::default();
        assert_eq!(options.head_count, 0);
        assert_eq!(options.budget_mode, BudgetMode::None);
        assert_eq!(options.totals_account, "<Total>");
        assert!(options.output_width >= 1);
    }

    #[test]
    fn test_report_rejects_bad_amount_expr() {
        let options = ReportOptions {
            amount_expr: Some("1 +".to_string()),
            ..Default::default()
        };
        assert!(matches!(Report::new(options), Err(ReportError::Parse(_))));
    }

    #[test]
    fn test_report_rejects_unbound_identifier() {
        let options = ReportOptions {
            amount_expr: Some("no_such_name".to_string()),
            ..Default::default()
        };
        assert!(matches!(Report::new(options), Err(ReportError::Calc(_))));
    }

    #[test]
    fn test_budget_mode_flags() {
        assert_eq!(BudgetMode::Both.flags(), BudgetFlags::BUDGETED | BudgetFlags::UNBUDGETED);
        assert!(BudgetMode::None.flags().is_empty());
    }

    #[test]
    fn test_shared_buffer_captures() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"hello").unwrap();
        assert_eq!(buffer.contents(), "hello");
    }
}
