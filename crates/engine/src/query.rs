//! Query-time value objects for listing and aggregating ledger rows.
//!
//! Filters are plain data validated once (see [`ExpenseFilter::validated`])
//! before anything touches the database.

use std::str::FromStr;

use chrono::{Datelike, TimeDelta};
use sea_orm::DbBackend;

use crate::{
    EngineError, ExpenseKind, ResultEngine,
    util::{DATE_FORMAT, normalize_currency, normalize_optional_date, normalize_tag, parse_date},
};

/// Columns the display list may be ordered by. Anything else falls back to `Date`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderColumn {
    #[default]
    Date,
    Amount,
    Type,
    Kind,
    Currency,
    CreatedAt,
}

impl OrderColumn {
    /// Parse a requested column, silently falling back to `Date`.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("amount") => Self::Amount,
            Some("type") => Self::Type,
            Some("kind") => Self::Kind,
            Some("currency") => Self::Currency,
            Some("created_at") => Self::CreatedAt,
            _ => Self::Date,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    #[default]
    Desc,
}

impl OrderDir {
    /// `asc` (any case) is ascending, everything else descending.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }
}

/// Row filter shared by the list, summary, rollup and group queries.
///
/// `from` and `to` are inclusive `YYYY-MM-DD` bounds compared as strings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpenseFilter {
    pub user_id: Option<i64>,
    pub kind: Option<ExpenseKind>,
    pub types: Vec<String>,
    pub currencies: Vec<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub order_by: OrderColumn,
    pub order_dir: OrderDir,
}

impl ExpenseFilter {
    /// Normalize tags and currency codes, and reject malformed date bounds.
    pub fn validated(self) -> ResultEngine<Self> {
        let types = self
            .types
            .iter()
            .map(|t| normalize_tag(t))
            .filter(|t| !t.is_empty())
            .collect();
        let currencies = self
            .currencies
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| normalize_currency(c))
            .collect::<ResultEngine<Vec<_>>>()?;
        let from = normalize_optional_date(self.from.as_deref(), "from")?;
        let to = normalize_optional_date(self.to.as_deref(), "to")?;

        Ok(Self {
            types,
            currencies,
            from,
            to,
            ..self
        })
    }
}

/// Time bucket granularity for grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    Day,
    Week,
    Month,
    Year,
}

impl GroupBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Week => "WEEK",
            Self::Month => "MONTH",
            Self::Year => "YEAR",
        }
    }

    /// SQL expression mapping the `date` column to a lexicographically sortable
    /// bucket key. Must agree with [`bucket_key`].
    pub(crate) fn bucket_sql(self, backend: DbBackend) -> &'static str {
        match (self, backend) {
            (Self::Day, _) => "date",
            (Self::Week, DbBackend::Postgres) => {
                "TO_CHAR(DATE_TRUNC('week', date::date), 'YYYY-MM-DD')"
            }
            (Self::Week, DbBackend::MySql) => {
                "DATE_FORMAT(DATE_SUB(date, INTERVAL WEEKDAY(date) DAY), '%Y-%m-%d')"
            }
            (Self::Week, _) => "date(date, 'weekday 0', '-6 days')",
            (Self::Month, _) => "SUBSTR(date, 1, 7)",
            (Self::Year, _) => "SUBSTR(date, 1, 4)",
        }
    }
}

impl FromStr for GroupBy {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DAY" => Ok(Self::Day),
            "WEEK" => Ok(Self::Week),
            "MONTH" => Ok(Self::Month),
            "YEAR" => Ok(Self::Year),
            _ => Err(EngineError::InvalidGroupBy(format!(
                "unsupported group_by value: {value}"
            ))),
        }
    }
}

/// Bucket key of a `YYYY-MM-DD` date.
///
/// - `Day`: the date unchanged
/// - `Week`: the Monday of its ISO week, `YYYY-MM-DD`
/// - `Month`: `YYYY-MM`
/// - `Year`: `YYYY`
pub fn bucket_key(group_by: GroupBy, date: &str) -> ResultEngine<String> {
    let parsed = parse_date(date, "date")?;
    let key = match group_by {
        GroupBy::Day => parsed.format(DATE_FORMAT).to_string(),
        GroupBy::Week => {
            let offset = i64::from(parsed.weekday().num_days_from_monday());
            (parsed - TimeDelta::days(offset))
                .format(DATE_FORMAT)
                .to_string()
        }
        GroupBy::Month => parsed.format("%Y-%m").to_string(),
        GroupBy::Year => parsed.format("%Y").to_string(),
    };
    Ok(key)
}

/// Column an in-memory bucket list can be sorted by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupSortColumn {
    Period,
    Income,
    Expense,
    Balance,
}

/// Explicit sort for the bucket list. Without one, buckets keep the
/// newest-first order of the rollup query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupSort {
    pub column: GroupSortColumn,
    pub dir: OrderDir,
}

impl GroupSort {
    /// Returns `None` when no (or an unknown) column is requested.
    pub fn parse(order_by: Option<&str>, order_dir: Option<&str>) -> Option<Self> {
        let column = match order_by.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("period") => GroupSortColumn::Period,
            Some("income") => GroupSortColumn::Income,
            Some("expense") => GroupSortColumn::Expense,
            Some("balance") => GroupSortColumn::Balance,
            _ => return None,
        };
        Some(Self {
            column,
            dir: OrderDir::parse_or_default(order_dir),
        })
    }
}

/// Parameters of a summary request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryQuery {
    pub filter: ExpenseFilter,
    /// Currency totals are expressed in. Defaults to the base currency.
    pub currency: Option<String>,
}

/// Parameters of a time-bucket groups request.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupsQuery {
    pub filter: ExpenseFilter,
    pub currency: Option<String>,
    pub group_by: GroupBy,
    pub sort: Option<GroupSort>,
    /// 1-based; `0` is read as `1`.
    pub page: u64,
    /// `0` returns every bucket.
    pub page_size: u64,
}

/// One `(kind, currency)` rollup row: count and native sum.
#[derive(Clone, Debug, PartialEq)]
pub struct KindCurrencyRollup {
    pub kind: ExpenseKind,
    pub currency: String,
    pub count: u64,
    pub total: f64,
}

/// One `(bucket, currency, type, kind)` rollup row with its native sum.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketRollup {
    pub bucket: String,
    pub currency: String,
    pub expense_type: String,
    pub kind: ExpenseKind,
    pub total: f64,
}
