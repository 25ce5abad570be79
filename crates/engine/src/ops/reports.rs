use sea_orm::{
    FromQueryResult, Order, QueryFilter, QueryOrder, QuerySelect, prelude::*, sea_query::Expr,
};

use crate::{
    BASE_CURRENCY, Expense, ExpenseFilter, ExpenseKind, ExpenseMeta, ExpenseSummary, GroupBy,
    GroupPage, GroupsQuery, OrderColumn, OrderDir, RateTable, ResultEngine, SummaryQuery,
    aggregate::{group, page_groups, summarize, summarize_rollup},
    expenses,
    query::{BucketRollup, KindCurrencyRollup},
    util::normalize_currency,
};

use super::{Actor, Engine};

trait ApplyExpenseFilters: QueryFilter + Sized {
    fn apply_expense_filters(self, filter: &ExpenseFilter) -> Self;
}

impl<T> ApplyExpenseFilters for T
where
    T: QueryFilter + Sized,
{
    fn apply_expense_filters(mut self, filter: &ExpenseFilter) -> Self {
        self = self.filter(expenses::Column::DeletedAt.is_null());
        if let Some(user_id) = filter.user_id {
            self = self.filter(expenses::Column::UserId.eq(user_id));
        }
        if let Some(kind) = filter.kind {
            self = self.filter(expenses::Column::Kind.eq(kind.as_str()));
        }
        if !filter.types.is_empty() {
            self = self.filter(expenses::Column::ExpenseType.is_in(filter.types.clone()));
        }
        if !filter.currencies.is_empty() {
            self = self.filter(expenses::Column::Currency.is_in(filter.currencies.clone()));
        }
        if let Some(from) = &filter.from {
            self = self.filter(expenses::Column::Date.gte(from.as_str()));
        }
        if let Some(to) = &filter.to {
            self = self.filter(expenses::Column::Date.lte(to.as_str()));
        }
        self
    }
}

fn order_column(column: OrderColumn) -> expenses::Column {
    match column {
        OrderColumn::Date => expenses::Column::Date,
        OrderColumn::Amount => expenses::Column::Amount,
        OrderColumn::Type => expenses::Column::ExpenseType,
        OrderColumn::Kind => expenses::Column::Kind,
        OrderColumn::Currency => expenses::Column::Currency,
        OrderColumn::CreatedAt => expenses::Column::CreatedAt,
    }
}

fn order(dir: OrderDir) -> Order {
    match dir {
        OrderDir::Asc => Order::Asc,
        OrderDir::Desc => Order::Desc,
    }
}

/// Resolve the target currency of an aggregation. Blank means the base currency.
fn target_currency(requested: Option<&str>) -> ResultEngine<String> {
    match requested.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => normalize_currency(code),
        None => Ok(BASE_CURRENCY.to_string()),
    }
}

#[derive(Debug, FromQueryResult)]
struct KindCurrencyRow {
    kind: String,
    currency: String,
    cnt: i64,
    sum_amt: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct BucketRow {
    bucket: String,
    currency: String,
    expense_type: String,
    kind: String,
    sum_amt: Option<f64>,
}

impl Engine {
    fn scoped(&self, actor: &Actor, filter: ExpenseFilter) -> ResultEngine<ExpenseFilter> {
        ExpenseFilter {
            user_id: actor.scope(filter.user_id),
            ..filter
        }
        .validated()
    }

    fn select_expenses(&self, filter: &ExpenseFilter) -> Select<expenses::Entity> {
        let dir = order(filter.order_dir);
        expenses::Entity::find()
            .apply_expense_filters(filter)
            .order_by(order_column(filter.order_by), dir.clone())
            .order_by(expenses::Column::Id, dir)
    }

    /// One display page of rows, ordered by the filter's column and direction.
    ///
    /// `page` is 1-based (`0` reads as `1`); `page_size` of `0` returns every row.
    pub async fn list_expenses(
        &self,
        actor: &Actor,
        filter: ExpenseFilter,
        page: u64,
        page_size: u64,
    ) -> ResultEngine<Vec<Expense>> {
        let filter = self.scoped(actor, filter)?;
        let mut query = self.select_expenses(&filter);
        if page_size > 0 {
            query = query
                .offset(page.max(1).saturating_sub(1).saturating_mul(page_size))
                .limit(page_size);
        }
        query
            .all(&self.database)
            .await?
            .into_iter()
            .map(Expense::try_from)
            .collect()
    }

    /// Every row matching the filter, without pagination.
    pub async fn list_all_expenses(
        &self,
        actor: &Actor,
        filter: ExpenseFilter,
    ) -> ResultEngine<Vec<Expense>> {
        let filter = self.scoped(actor, filter)?;
        self.select_expenses(&filter)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Expense::try_from)
            .collect()
    }

    async fn kind_currency_rollup(
        &self,
        filter: &ExpenseFilter,
    ) -> ResultEngine<Vec<KindCurrencyRollup>> {
        let rows = expenses::Entity::find()
            .select_only()
            .column(expenses::Column::Kind)
            .column(expenses::Column::Currency)
            .column_as(expenses::Column::Id.count(), "cnt")
            .column_as(expenses::Column::Amount.sum(), "sum_amt")
            .apply_expense_filters(filter)
            .group_by(expenses::Column::Kind)
            .group_by(expenses::Column::Currency)
            .into_model::<KindCurrencyRow>()
            .all(&self.database)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(KindCurrencyRollup {
                    kind: ExpenseKind::try_from(row.kind.as_str())?,
                    currency: row.currency,
                    count: u64::try_from(row.cnt).unwrap_or_default(),
                    total: row.sum_amt.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn bucket_rollup(
        &self,
        filter: &ExpenseFilter,
        group_by: GroupBy,
    ) -> ResultEngine<Vec<BucketRollup>> {
        let bucket = group_by.bucket_sql(self.database.get_database_backend());
        let rows = expenses::Entity::find()
            .select_only()
            .column_as(Expr::cust(bucket), "bucket")
            .column(expenses::Column::Currency)
            .column_as(expenses::Column::ExpenseType, "expense_type")
            .column(expenses::Column::Kind)
            .column_as(expenses::Column::Amount.sum(), "sum_amt")
            .apply_expense_filters(filter)
            .group_by(Expr::cust(bucket))
            .group_by(expenses::Column::Currency)
            .group_by(expenses::Column::ExpenseType)
            .group_by(expenses::Column::Kind)
            .order_by(Expr::cust("bucket"), Order::Desc)
            .into_model::<BucketRow>()
            .all(&self.database)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(BucketRollup {
                    bucket: row.bucket,
                    currency: row.currency,
                    expense_type: row.expense_type,
                    kind: ExpenseKind::try_from(row.kind.as_str())?,
                    total: row.sum_amt.unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Row counts and native per-currency totals for the filter.
    ///
    /// Computed with a `(kind, currency)` rollup, so no row leaves the database.
    pub async fn expense_meta(
        &self,
        actor: &Actor,
        filter: ExpenseFilter,
    ) -> ResultEngine<ExpenseMeta> {
        let filter = self.scoped(actor, filter)?;
        let rollup = self.kind_currency_rollup(&filter).await?;
        Ok(summarize_rollup(&rollup))
    }

    /// Totals of every matching row, converted to the requested currency.
    pub async fn expense_summary(
        &self,
        actor: &Actor,
        query: SummaryQuery,
    ) -> ResultEngine<ExpenseSummary> {
        let target = target_currency(query.currency.as_deref())?;
        let rows = self.list_all_expenses(actor, query.filter).await?;
        let rates = self.rates.rates().await;
        Ok(summarize(&rows, &rates, &target))
    }

    /// Time buckets of the matching rows, converted to the requested currency.
    ///
    /// Buckets are newest first unless the query names an explicit sort.
    pub async fn expense_groups(
        &self,
        actor: &Actor,
        query: GroupsQuery,
    ) -> ResultEngine<GroupPage> {
        let target = target_currency(query.currency.as_deref())?;
        let filter = self.scoped(actor, query.filter)?;
        let rollup = self.bucket_rollup(&filter, query.group_by).await?;
        let rates = self.rates.rates().await;
        let groups = group(&rollup, &rates, &target, query.group_by, query.sort);
        Ok(page_groups(groups, query.page, query.page_size))
    }

    /// Distinct, sorted, non-empty type tags of live rows.
    pub async fn expense_types(
        &self,
        actor: &Actor,
        user_id: Option<i64>,
    ) -> ResultEngine<Vec<String>> {
        let mut query = expenses::Entity::find()
            .select_only()
            .column(expenses::Column::ExpenseType)
            .distinct()
            .filter(expenses::Column::DeletedAt.is_null())
            .filter(expenses::Column::ExpenseType.ne(""));
        if let Some(user_id) = actor.scope(user_id) {
            query = query.filter(expenses::Column::UserId.eq(user_id));
        }
        Ok(query
            .order_by_asc(expenses::Column::ExpenseType)
            .into_tuple::<String>()
            .all(&self.database)
            .await?)
    }

    /// Current rate table ("1 unit = X base"), refreshed when stale.
    pub async fn exchange_rates(&self) -> RateTable {
        self.rates.rates().await
    }
}
