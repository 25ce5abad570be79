//! Expense API endpoints

use api_types::expense::{
    CurrencySummary, Expense, ExpenseGroup, ExpenseGroupsResponse, ExpenseKind as ApiKind,
    ExpenseListResponse, ExpenseMeta, ExpenseNew, ExpenseQuery, ExpenseSummary,
    ExpenseTypesQuery, ExpenseUpdate,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::Query;
use std::collections::BTreeMap;

use engine::{
    Actor, ExpenseFilter, ExpenseKind, GroupBy, GroupSort, GroupsQuery, OrderColumn, OrderDir,
    SummaryQuery, User,
};

use crate::{ServerError, server::ServerState};

pub(crate) fn actor(user: &User) -> Actor {
    Actor::new(user.id, user.role)
}

fn map_kind(kind: ExpenseKind) -> ApiKind {
    match kind {
        ExpenseKind::Income => ApiKind::Income,
        ExpenseKind::Expense => ApiKind::Expense,
    }
}

fn unmap_kind(kind: ApiKind) -> ExpenseKind {
    match kind {
        ApiKind::Income => ExpenseKind::Income,
        ApiKind::Expense => ExpenseKind::Expense,
    }
}

fn map_expense(expense: engine::Expense) -> Expense {
    Expense {
        id: expense.id,
        user_id: expense.user_id,
        amount: expense.amount,
        currency: expense.currency,
        kind: map_kind(expense.kind),
        expense_type: expense.expense_type,
        resource: expense.resource,
        description: expense.description,
        date: expense.date,
        created_at: expense.created_at,
        updated_at: expense.updated_at,
    }
}

fn map_currency_totals(
    totals: BTreeMap<String, engine::CurrencySummary>,
) -> BTreeMap<String, CurrencySummary> {
    totals
        .into_iter()
        .map(|(code, s)| {
            (
                code,
                CurrencySummary {
                    total_income: s.total_income,
                    total_expense: s.total_expense,
                    total_balance: s.total_balance,
                },
            )
        })
        .collect()
}

fn map_meta(meta: engine::ExpenseMeta) -> ExpenseMeta {
    ExpenseMeta {
        total: meta.total,
        income_count: meta.income_count,
        expense_count: meta.expense_count,
        by_currency: map_currency_totals(meta.by_currency),
    }
}

fn map_group(group: engine::ExpenseGroup) -> ExpenseGroup {
    ExpenseGroup {
        key: group.key,
        label: group.label,
        income: group.income,
        expense: group.expense,
        balance: group.balance,
        total_by_type: group.total_by_type,
    }
}

/// Flatten repeated and comma-separated values, dropping blanks.
fn split_values(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn filter_from(query: &ExpenseQuery) -> Result<ExpenseFilter, ServerError> {
    let kind = match query.kind.as_deref().map(str::trim) {
        Some(kind) if !kind.is_empty() => Some(ExpenseKind::try_from(kind)?),
        _ => None,
    };
    Ok(ExpenseFilter {
        user_id: query.user_id,
        kind,
        types: split_values(&query.types),
        currencies: split_values(&query.currencies),
        from: query.from.clone(),
        to: query.to.clone(),
        order_by: OrderColumn::parse_or_default(query.order_by.as_deref()),
        order_dir: OrderDir::parse_or_default(query.order_dir.as_deref()),
    })
}

/// Page and page size from the query; `page_size <= 0` means everything.
fn paging(query: &ExpenseQuery) -> (u64, u64) {
    let page = query.page.unwrap_or(1).max(1).unsigned_abs();
    let page_size = query.page_size.unwrap_or(0).max(0).unsigned_abs();
    (page, page_size)
}

pub async fn create(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Json(payload): Json<ExpenseNew>,
) -> Result<(StatusCode, Json<Expense>), ServerError> {
    let cmd = engine::NewExpense {
        user_id: payload.user_id,
        amount: payload.amount,
        currency: payload.currency,
        kind: unmap_kind(payload.kind),
        expense_type: payload.expense_type,
        resource: payload.resource,
        description: payload.description,
        date: payload.date,
    };
    let expense = state.engine.add_expense(&actor(&user), cmd).await?;
    Ok((StatusCode::CREATED, Json(map_expense(expense))))
}

pub async fn list(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Query(query): Query<ExpenseQuery>,
) -> Result<Json<ExpenseListResponse>, ServerError> {
    let actor = actor(&user);
    let filter = filter_from(&query)?;
    let (page, page_size) = paging(&query);

    let rows = state
        .engine
        .list_expenses(&actor, filter.clone(), page, page_size)
        .await?;
    let meta = state.engine.expense_meta(&actor, filter).await?;

    Ok(Json(ExpenseListResponse {
        page,
        page_size,
        count: meta.total,
        data: rows.into_iter().map(map_expense).collect(),
        meta: map_meta(meta),
    }))
}

pub async fn summary(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Query(query): Query<ExpenseQuery>,
) -> Result<Json<ExpenseSummary>, ServerError> {
    let summary = state
        .engine
        .expense_summary(
            &actor(&user),
            SummaryQuery {
                filter: filter_from(&query)?,
                currency: query.original_currency,
            },
        )
        .await?;

    Ok(Json(ExpenseSummary {
        currency: summary.currency,
        income_count: summary.income_count,
        expense_count: summary.expense_count,
        total_income: summary.total_income,
        total_expense: summary.total_expense,
        total_balance: summary.total_balance,
        total_by_type_income: summary.total_by_type_income,
        total_by_type_expense: summary.total_by_type_expense,
        by_currency: summary.by_currency.map(map_currency_totals),
    }))
}

pub async fn groups(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Query(query): Query<ExpenseQuery>,
) -> Result<Json<ExpenseGroupsResponse>, ServerError> {
    let group_by = query
        .group_by
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .unwrap_or("DAY")
        .parse::<GroupBy>()?;
    let (page, page_size) = paging(&query);
    let groups_query = GroupsQuery {
        filter: filter_from(&query)?,
        currency: query.original_currency.clone(),
        group_by,
        sort: GroupSort::parse(query.order_by.as_deref(), query.order_dir.as_deref()),
        page,
        page_size,
    };

    let page = state
        .engine
        .expense_groups(&actor(&user), groups_query)
        .await?;
    Ok(Json(ExpenseGroupsResponse {
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        groups: page.groups.into_iter().map(map_group).collect(),
    }))
}

pub async fn types(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Query(query): Query<ExpenseTypesQuery>,
) -> Result<Json<Vec<String>>, ServerError> {
    let types = state
        .engine
        .expense_types(&actor(&user), query.user_id)
        .await?;
    Ok(Json(types))
}

pub async fn get(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Result<Json<Expense>, ServerError> {
    let expense = state.engine.expense(id, &actor(&user)).await?;
    Ok(Json(map_expense(expense)))
}

pub async fn update(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(payload): Json<ExpenseUpdate>,
) -> Result<Json<Expense>, ServerError> {
    let patch = engine::ExpensePatch {
        amount: payload.amount,
        currency: payload.currency,
        kind: payload.kind.map(unmap_kind),
        expense_type: payload.expense_type,
        resource: payload.resource,
        description: payload.description,
        date: payload.date,
    };
    let expense = state
        .engine
        .update_expense(id, patch, &actor(&user))
        .await?;
    Ok(Json(map_expense(expense)))
}

pub async fn delete(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    state.engine.delete_expense(id, &actor(&user)).await?;
    Ok(StatusCode::NO_CONTENT)
}
