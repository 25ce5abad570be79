//! Aggregation engine.
//!
//! Pure functions turning ledger rows (or database rollups) plus a rate table
//! snapshot into summaries and time-bucket groups expressed in a target
//! currency. Conversion happens here and not in SQL because rates are not
//! stored per row and change between requests.
//!
//! Amounts are signed, so `balance = income + expense` everywhere: for the
//! converted totals, for every bucket and for the native per-currency
//! breakdown. A currency missing from the rate table converts at rate `1`.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    Expense, ExpenseKind,
    query::{BucketRollup, GroupBy, GroupSort, GroupSortColumn, KindCurrencyRollup, OrderDir},
    rates::{RateTable, rate_of},
};

/// Native (unconverted) totals of one currency.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CurrencySummary {
    pub total_income: f64,
    pub total_expense: f64,
    pub total_balance: f64,
}

impl CurrencySummary {
    fn add(&mut self, kind: ExpenseKind, amount: f64) {
        match kind {
            ExpenseKind::Income => self.total_income += amount,
            ExpenseKind::Expense => self.total_expense += amount,
        }
        self.total_balance = self.total_income + self.total_expense;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseSummary {
    pub currency: String,
    pub income_count: u64,
    pub expense_count: u64,
    pub total_income: f64,
    pub total_expense: f64,
    pub total_balance: f64,
    pub total_by_type_income: BTreeMap<String, f64>,
    /// Absolute converted magnitude per expense type.
    pub total_by_type_expense: BTreeMap<String, f64>,
    /// Present only when the rows span more than one currency.
    pub by_currency: Option<BTreeMap<String, CurrencySummary>>,
}

/// Counts and native per-currency totals, computed from a `(kind, currency)`
/// rollup without transferring rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExpenseMeta {
    pub total: u64,
    pub income_count: u64,
    pub expense_count: u64,
    pub by_currency: BTreeMap<String, CurrencySummary>,
}

/// Totals of one time bucket, converted to the target currency.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseGroup {
    /// Raw sortable bucket key (`YYYY-MM-DD`, `YYYY-MM` or `YYYY`).
    pub key: String,
    pub label: String,
    pub income: f64,
    pub expense: f64,
    pub balance: f64,
    /// Signed converted total per type.
    pub total_by_type: BTreeMap<String, f64>,
}

/// One page of buckets plus the total bucket count.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupPage {
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub groups: Vec<ExpenseGroup>,
}

/// Summarize `rows` in `target` currency using the `rates` snapshot.
pub fn summarize(rows: &[Expense], rates: &RateTable, target: &str) -> ExpenseSummary {
    let target_rate = rate_of(rates, target);

    let mut summary = ExpenseSummary {
        currency: target.to_string(),
        income_count: 0,
        expense_count: 0,
        total_income: 0.0,
        total_expense: 0.0,
        total_balance: 0.0,
        total_by_type_income: BTreeMap::new(),
        total_by_type_expense: BTreeMap::new(),
        by_currency: None,
    };
    let mut by_currency: BTreeMap<String, CurrencySummary> = BTreeMap::new();

    for row in rows {
        let converted = row.amount * rate_of(rates, &row.currency) / target_rate;
        match row.kind {
            ExpenseKind::Income => {
                summary.income_count += 1;
                summary.total_income += converted;
                *summary
                    .total_by_type_income
                    .entry(row.expense_type.clone())
                    .or_default() += converted;
            }
            ExpenseKind::Expense => {
                summary.expense_count += 1;
                summary.total_expense += converted;
                *summary
                    .total_by_type_expense
                    .entry(row.expense_type.clone())
                    .or_default() += converted.abs();
            }
        }
        by_currency
            .entry(row.currency.clone())
            .or_default()
            .add(row.kind, row.amount);
    }

    summary.total_balance = summary.total_income + summary.total_expense;
    if by_currency.len() > 1 {
        summary.by_currency = Some(by_currency);
    }
    summary
}

/// Fold a `(kind, currency)` rollup into counts and native totals.
pub fn summarize_rollup(rows: &[KindCurrencyRollup]) -> ExpenseMeta {
    let mut meta = ExpenseMeta::default();
    for row in rows {
        meta.total += row.count;
        match row.kind {
            ExpenseKind::Income => meta.income_count += row.count,
            ExpenseKind::Expense => meta.expense_count += row.count,
        }
        meta.by_currency
            .entry(row.currency.clone())
            .or_default()
            .add(row.kind, row.total);
    }
    meta
}

/// Build time buckets from a `(bucket, currency, type, kind)` rollup.
///
/// Without `sort`, buckets keep their first-seen order, which is the
/// newest-first order of the rollup query.
pub fn group(
    rows: &[BucketRollup],
    rates: &RateTable,
    target: &str,
    group_by: GroupBy,
    sort: Option<GroupSort>,
) -> Vec<ExpenseGroup> {
    let target_rate = rate_of(rates, target);

    let mut groups: Vec<ExpenseGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for row in rows {
        let converted = row.total * rate_of(rates, &row.currency) / target_rate;
        let position = *index.entry(row.bucket.as_str()).or_insert_with(|| {
            groups.push(ExpenseGroup {
                key: row.bucket.clone(),
                label: bucket_label(group_by, &row.bucket),
                income: 0.0,
                expense: 0.0,
                balance: 0.0,
                total_by_type: BTreeMap::new(),
            });
            groups.len() - 1
        });

        let bucket = &mut groups[position];
        match row.kind {
            ExpenseKind::Income => bucket.income += converted,
            ExpenseKind::Expense => bucket.expense += converted,
        }
        bucket.balance = bucket.income + bucket.expense;
        *bucket
            .total_by_type
            .entry(row.expense_type.clone())
            .or_default() += converted;
    }

    if let Some(sort) = sort {
        sort_groups(&mut groups, sort);
    }
    groups
}

fn sort_groups(groups: &mut [ExpenseGroup], sort: GroupSort) {
    groups.sort_by(|a, b| {
        let ordering = match sort.column {
            GroupSortColumn::Period => a.key.cmp(&b.key),
            GroupSortColumn::Income => a.income.total_cmp(&b.income),
            GroupSortColumn::Expense => a.expense.total_cmp(&b.expense),
            GroupSortColumn::Balance => a.balance.total_cmp(&b.balance),
        };
        match sort.dir {
            OrderDir::Asc => ordering,
            OrderDir::Desc => ordering.reverse(),
        }
    });
}

/// Human label of a bucket key. Keys that do not parse are returned as-is.
///
/// - `Day`: `15 Jan 2024`
/// - `Week`: `W/o 15 Jan` (week of the Monday)
/// - `Month`: `Jan 2024`
/// - `Year`: `2024`
pub fn bucket_label(group_by: GroupBy, key: &str) -> String {
    let label = match group_by {
        GroupBy::Day => NaiveDate::parse_from_str(key, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%d %b %Y").to_string()),
        GroupBy::Week => NaiveDate::parse_from_str(key, "%Y-%m-%d")
            .ok()
            .map(|d| d.format("W/o %d %b").to_string()),
        GroupBy::Month => NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d")
            .ok()
            .map(|d| d.format("%b %Y").to_string()),
        GroupBy::Year => None,
    };
    label.unwrap_or_else(|| key.to_string())
}

/// Slice one page out of `items`. `page` is 1-based (`0` reads as `1`) and a
/// `page_size` of `0` returns everything.
pub fn paginate<T>(items: Vec<T>, page: u64, page_size: u64) -> Vec<T> {
    if page_size == 0 {
        return items;
    }
    let page = page.max(1);
    let skip = (page - 1).saturating_mul(page_size);
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    let take = usize::try_from(page_size).unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(take).collect()
}

/// Paginate buckets and report the total bucket count.
pub fn page_groups(groups: Vec<ExpenseGroup>, page: u64, page_size: u64) -> GroupPage {
    let total = groups.len() as u64;
    GroupPage {
        total,
        page: page.max(1),
        page_size,
        groups: paginate(groups, page, page_size),
    }
}
