//! Ledger records.
//!
//! An `Expense` row is either an income or an expense, told apart by
//! [`ExpenseKind`]. Amounts are signed: expenses are stored as values `<= 0`,
//! incomes as values `>= 0`. Rows are never hard-deleted; `deleted_at` marks
//! a soft delete and every query skips such rows.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseKind {
    Income,
    Expense,
}

impl ExpenseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Check the sign rule for this kind.
    ///
    /// `Expense` amounts must be `<= 0` and `Income` amounts `>= 0`.
    pub fn check_amount(self, amount: f64) -> ResultEngine<()> {
        if !amount.is_finite() {
            return Err(EngineError::InvalidAmount(
                "amount must be a finite number".to_string(),
            ));
        }
        match self {
            Self::Expense if amount > 0.0 => Err(EngineError::InvalidAmount(
                "expense amount must be <= 0".to_string(),
            )),
            Self::Income if amount < 0.0 => Err(EngineError::InvalidAmount(
                "income amount must be >= 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl TryFrom<&str> for ExpenseKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(EngineError::InvalidInput(format!(
                "invalid expense kind: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for ExpenseKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub kind: ExpenseKind,
    /// Free-form lowercase tag, e.g. `food`.
    pub expense_type: String,
    /// Free-form payment source tag, e.g. `CASH`.
    pub resource: String,
    pub description: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub kind: String,
    #[sea_orm(column_name = "type")]
    pub expense_type: String,
    pub resource: String,
    pub description: String,
    pub date: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Expense> for ActiveModel {
    fn from(expense: &Expense) -> Self {
        Self {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(expense.user_id),
            amount: ActiveValue::Set(expense.amount),
            currency: ActiveValue::Set(expense.currency.clone()),
            kind: ActiveValue::Set(expense.kind.as_str().to_string()),
            expense_type: ActiveValue::Set(expense.expense_type.clone()),
            resource: ActiveValue::Set(expense.resource.clone()),
            description: ActiveValue::Set(expense.description.clone()),
            date: ActiveValue::Set(expense.date.clone()),
            created_at: ActiveValue::Set(expense.created_at),
            updated_at: ActiveValue::Set(expense.updated_at),
            deleted_at: ActiveValue::Set(expense.deleted_at),
        }
    }
}

impl TryFrom<Model> for Expense {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            amount: model.amount,
            currency: model.currency,
            kind: ExpenseKind::try_from(model.kind.as_str())?,
            expense_type: model.expense_type,
            resource: model.resource,
            description: model.description,
            date: model.date,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
        })
    }
}
