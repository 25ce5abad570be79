use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::EngineError;

use serde::Serialize;
pub use server::{app, run_with_listener};

mod currency;
mod expenses;
mod server;
mod user;

pub mod types {
    pub mod expense {
        pub use api_types::expense::{
            CurrencySummary, Expense, ExpenseGroup, ExpenseGroupsResponse, ExpenseKind,
            ExpenseListResponse, ExpenseMeta, ExpenseNew, ExpenseQuery, ExpenseSummary,
            ExpenseTypesQuery, ExpenseUpdate,
        };
    }

    pub mod user {
        pub use api_types::user::{
            ChangePassword, EmailRequest, ResetPassword, Role, User, UserRegister, UserUpdate,
            VerifyEmail,
        };
    }

    pub mod currency {
        pub use api_types::currency::{Currencies, ExchangeRates};
    }
}

pub enum ServerError {
    Engine(EngineError),
    Generic(String),
}

#[derive(Serialize)]
struct Error {
    error: String,
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ExistingKey(_) => StatusCode::CONFLICT,
        EngineError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        EngineError::Database(_) | EngineError::PasswordHash(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        EngineError::InvalidAmount(_)
        | EngineError::InvalidDate(_)
        | EngineError::InvalidGroupBy(_)
        | EngineError::InvalidInput(_)
        | EngineError::InvalidToken(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn message_for_engine_error(err: EngineError) -> String {
    match err {
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        EngineError::PasswordHash(hash_err) => {
            tracing::error!("password hashing error: {hash_err}");
            "internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ServerError::Engine(err) => (
                status_for_engine_error(&err),
                message_for_engine_error(err),
            ),
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, err),
        };

        (status, Json(Error { error })).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}
