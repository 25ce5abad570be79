use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plain acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

pub mod expense {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ExpenseKind {
        Income,
        Expense,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseNew {
        /// Owner. Only admins may set someone else.
        pub user_id: Option<i64>,
        /// Signed: expenses `<= 0`, incomes `>= 0`.
        pub amount: f64,
        pub currency: String,
        pub kind: ExpenseKind,
        #[serde(rename = "type")]
        pub expense_type: String,
        pub resource: Option<String>,
        pub description: Option<String>,
        /// `YYYY-MM-DD`, defaults to today.
        pub date: Option<String>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseUpdate {
        pub amount: Option<f64>,
        pub currency: Option<String>,
        pub kind: Option<ExpenseKind>,
        #[serde(rename = "type")]
        pub expense_type: Option<String>,
        pub resource: Option<String>,
        pub description: Option<String>,
        pub date: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Expense {
        pub id: i64,
        pub user_id: i64,
        pub amount: f64,
        pub currency: String,
        pub kind: ExpenseKind,
        #[serde(rename = "type")]
        pub expense_type: String,
        pub resource: String,
        pub description: String,
        pub date: String,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    /// Query string shared by the list, summary and groups endpoints.
    ///
    /// `types` and `currencies` may repeat (`types=food&types=rent`) or hold a
    /// comma-separated list. Fields an endpoint does not use are ignored.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseQuery {
        pub user_id: Option<i64>,
        pub kind: Option<String>,
        #[serde(default)]
        pub types: Vec<String>,
        #[serde(default)]
        pub currencies: Vec<String>,
        pub from: Option<String>,
        pub to: Option<String>,
        pub order_by: Option<String>,
        pub order_dir: Option<String>,
        /// 1-based. Values below 1 mean the first page.
        pub page: Option<i64>,
        /// Zero or negative returns everything.
        pub page_size: Option<i64>,
        /// Target currency of converted totals. Defaults to `VND`.
        pub original_currency: Option<String>,
        /// `DAY`, `WEEK`, `MONTH` or `YEAR`.
        pub group_by: Option<String>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct CurrencySummary {
        pub total_income: f64,
        pub total_expense: f64,
        pub total_balance: f64,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseMeta {
        pub total: u64,
        pub income_count: u64,
        pub expense_count: u64,
        pub by_currency: BTreeMap<String, CurrencySummary>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseListResponse {
        pub page: u64,
        pub page_size: u64,
        /// Rows matching the filter across every page.
        pub count: u64,
        pub data: Vec<Expense>,
        pub meta: ExpenseMeta,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseSummary {
        pub currency: String,
        pub income_count: u64,
        pub expense_count: u64,
        pub total_income: f64,
        pub total_expense: f64,
        pub total_balance: f64,
        pub total_by_type_income: BTreeMap<String, f64>,
        pub total_by_type_expense: BTreeMap<String, f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub by_currency: Option<BTreeMap<String, CurrencySummary>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseGroup {
        pub key: String,
        pub label: String,
        pub income: f64,
        pub expense: f64,
        pub balance: f64,
        pub total_by_type: BTreeMap<String, f64>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExpenseGroupsResponse {
        pub total: u64,
        pub page: u64,
        pub page_size: u64,
        pub groups: Vec<ExpenseGroup>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ExpenseTypesQuery {
        pub user_id: Option<i64>,
    }
}

pub mod user {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Role {
        User,
        Admin,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct UserRegister {
        pub username: String,
        pub email: String,
        pub password: String,
        pub name: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct User {
        pub id: i64,
        pub username: String,
        pub email: String,
        pub role: Role,
        pub name: Option<String>,
        pub birthdate: Option<String>,
        pub phone: Option<String>,
        pub address: Option<String>,
        pub is_email_verified: bool,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    /// Profile update. Missing fields are left untouched, empty strings clear them.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct UserUpdate {
        pub email: Option<String>,
        pub name: Option<String>,
        pub birthdate: Option<String>,
        pub phone: Option<String>,
        pub address: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct VerifyEmail {
        pub token: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct EmailRequest {
        pub email: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ResetPassword {
        pub token: String,
        pub new_password: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ChangePassword {
        pub current_password: String,
        pub new_password: String,
    }
}

pub mod currency {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ExchangeRates {
        /// Every rate is "1 unit = X base".
        pub base_currency: String,
        pub rates: BTreeMap<String, f64>,
        pub last_refresh: Option<DateTime<Utc>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Currencies {
        pub currencies: Vec<String>,
    }
}
