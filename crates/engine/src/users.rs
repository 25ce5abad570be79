//! User accounts.
//!
//! Secrets (password hash, verification and reset tokens) live only on the
//! entity `Model`; the public [`User`] never carries them.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(EngineError::InvalidInput(format!("invalid role: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
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

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub username: String,
    #[sea_orm(unique)]
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub name: Option<String>,
    pub birthdate: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_email_verified: bool,
    pub email_verify_token: Option<String>,
    pub email_verify_expiry: Option<DateTimeUtc>,
    pub password_reset_token: Option<String>,
    pub password_reset_expiry: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for User {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            username: model.username,
            email: model.email,
            role: Role::try_from(model.role.as_str())?,
            name: model.name,
            birthdate: model.birthdate,
            phone: model.phone,
            address: model.address,
            is_email_verified: model.is_email_verified,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
