//! Core of the Mindoh personal-finance backend.
//!
//! The engine owns the ledger (incomes and expenses in several currencies),
//! the exchange-rate cache and the account flows. Read paths come in two
//! shapes: paginated row lists for display, and aggregations (summaries and
//! time buckets) converted into a target currency with the current rates.

pub use aggregate::{
    CurrencySummary, ExpenseGroup, ExpenseMeta, ExpenseSummary, GroupPage, bucket_label, group,
    page_groups, paginate, summarize, summarize_rollup,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::EngineError;
pub use expenses::{Expense, ExpenseKind};
pub use mailer::{LogMailer, MailError, Mailer};
pub use ops::{Actor, Engine, EngineBuilder, ExpensePatch, NewExpense, NewUser, ProfilePatch};
pub use query::{
    BucketRollup, ExpenseFilter, GroupBy, GroupSort, GroupSortColumn, GroupsQuery,
    KindCurrencyRollup, OrderColumn, OrderDir, SummaryQuery, bucket_key,
};
pub use rates::{
    AVAILABLE_CURRENCIES, BASE_CURRENCY, ExchangeRateCache, HttpRateSource, RateError, RateSource,
    RateTable, StaticRateSource, convert, fallback_rates,
};
pub use users::{Role, User};

mod aggregate;
mod clock;
mod error;
mod expenses;
mod mailer;
mod ops;
mod query;
pub mod rates;
mod users;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
