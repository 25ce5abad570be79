use sea_orm::{ActiveValue, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    EngineError, Expense, ExpenseKind, ResultEngine, expenses, users,
    util::{DATE_FORMAT, normalize_currency, normalize_required, normalize_tag, parse_date},
};

use super::{Actor, Engine, with_tx};

/// A new ledger row.
#[derive(Clone, Debug, PartialEq)]
pub struct NewExpense {
    /// Owner. Defaults to the caller; only admins may name someone else.
    pub user_id: Option<i64>,
    pub amount: f64,
    pub currency: String,
    pub kind: ExpenseKind,
    pub expense_type: String,
    pub resource: Option<String>,
    pub description: Option<String>,
    /// `YYYY-MM-DD`. Defaults to today.
    pub date: Option<String>,
}

/// Partial update of a ledger row. `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpensePatch {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub kind: Option<ExpenseKind>,
    pub expense_type: Option<String>,
    pub resource: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
}

/// Load a live row the actor is allowed to see. Rows of other users are
/// reported as missing.
async fn find_visible<C>(conn: &C, id: i64, actor: &Actor) -> ResultEngine<expenses::Model>
where
    C: ConnectionTrait,
{
    let model = expenses::Entity::find_by_id(id)
        .filter(expenses::Column::DeletedAt.is_null())
        .one(conn)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("expense".to_string()))?;
    if !actor.can_access(model.user_id) {
        return Err(EngineError::KeyNotFound("expense".to_string()));
    }
    Ok(model)
}

impl Engine {
    /// Record an income or an expense.
    ///
    /// The amount sign must match the kind; nothing is written otherwise.
    pub async fn add_expense(&self, actor: &Actor, cmd: NewExpense) -> ResultEngine<Expense> {
        let owner = actor.owner_for(cmd.user_id)?;
        cmd.kind.check_amount(cmd.amount)?;
        let currency = normalize_currency(&cmd.currency)?;
        let expense_type = normalize_tag(&normalize_required(&cmd.expense_type, "type")?);
        let date = match cmd.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(date) => parse_date(date, "date")?,
            None => self.clock.today(),
        }
        .format(DATE_FORMAT)
        .to_string();

        with_tx!(self, |db_tx| {
            if owner != actor.user_id
                && users::Entity::find_by_id(owner).one(&db_tx).await?.is_none()
            {
                return Err(EngineError::KeyNotFound("user".to_string()));
            }

            let now = self.clock.now();
            let expense = Expense {
                id: 0,
                user_id: owner,
                amount: cmd.amount,
                currency,
                kind: cmd.kind,
                expense_type,
                resource: cmd.resource.unwrap_or_default().trim().to_string(),
                description: cmd.description.unwrap_or_default().trim().to_string(),
                date,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            let model = expenses::ActiveModel::from(&expense).insert(&db_tx).await?;
            tracing::debug!(id = model.id, user_id = owner, "expense recorded");
            Expense::try_from(model)
        })
    }

    /// Return one live row visible to `actor`.
    pub async fn expense(&self, id: i64, actor: &Actor) -> ResultEngine<Expense> {
        let model = find_visible(&self.database, id, actor).await?;
        Expense::try_from(model)
    }

    /// Apply a partial update.
    ///
    /// The sign rule is checked on the merged row, so changing only the kind
    /// (or only the amount) is rejected when the result would break it.
    pub async fn update_expense(
        &self,
        id: i64,
        patch: ExpensePatch,
        actor: &Actor,
    ) -> ResultEngine<Expense> {
        with_tx!(self, |db_tx| {
            let model = find_visible(&db_tx, id, actor).await?;
            let current = Expense::try_from(model.clone())?;

            let amount = patch.amount.unwrap_or(current.amount);
            let kind = patch.kind.unwrap_or(current.kind);
            kind.check_amount(amount)?;

            let mut active: expenses::ActiveModel = model.into();
            active.amount = ActiveValue::Set(amount);
            active.kind = ActiveValue::Set(kind.as_str().to_string());
            if let Some(currency) = patch.currency.as_deref() {
                active.currency = ActiveValue::Set(normalize_currency(currency)?);
            }
            if let Some(expense_type) = patch.expense_type.as_deref() {
                active.expense_type =
                    ActiveValue::Set(normalize_tag(&normalize_required(expense_type, "type")?));
            }
            if let Some(resource) = patch.resource {
                active.resource = ActiveValue::Set(resource.trim().to_string());
            }
            if let Some(description) = patch.description {
                active.description = ActiveValue::Set(description.trim().to_string());
            }
            if let Some(date) = patch.date.as_deref() {
                let date = parse_date(date, "date")?;
                active.date = ActiveValue::Set(date.format(DATE_FORMAT).to_string());
            }
            active.updated_at = ActiveValue::Set(self.clock.now());

            let model = active.update(&db_tx).await?;
            Expense::try_from(model)
        })
    }

    /// Soft-delete a row. It disappears from every list and aggregate.
    pub async fn delete_expense(&self, id: i64, actor: &Actor) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let model = find_visible(&db_tx, id, actor).await?;
            let now = self.clock.now();
            let mut active: expenses::ActiveModel = model.into();
            active.deleted_at = ActiveValue::Set(Some(now));
            active.updated_at = ActiveValue::Set(now);
            active.update(&db_tx).await?;
            tracing::debug!(id, "expense deleted");
            Ok(())
        })
    }
}
