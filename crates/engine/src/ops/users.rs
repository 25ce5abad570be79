use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use chrono::TimeDelta;
use sea_orm::{ActiveValue, QueryFilter, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    EngineError, ResultEngine, Role, User, expenses,
    mailer::{password_reset_email, verification_email},
    users,
    util::{
        generate_token, normalize_optional_date, normalize_optional_text, normalize_required,
    },
};

use super::{Actor, EMAIL_VERIFY_TTL, Engine, PASSWORD_RESET_TTL, with_tx};

const MIN_PASSWORD_LEN: usize = 8;

/// Sign-up request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

/// Partial profile update. `None` leaves the field untouched, an empty
/// string clears an optional field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub birthdate: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

fn check_password(password: &str) -> ResultEngine<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(EngineError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn normalize_email(value: &str) -> ResultEngine<String> {
    let email = normalize_required(value, "email")?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(EngineError::InvalidInput(format!("invalid email: '{email}'"))),
    }
}

fn hash_password(password: &str) -> ResultEngine<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|err| EngineError::PasswordHash(err.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| EngineError::PasswordHash(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn ttl(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::hours(1))
}

impl Engine {
    async fn send_mail(&self, to: &str, (subject, body): (String, String)) {
        if let Err(err) = self.mailer.send(to, &subject, &body).await {
            tracing::warn!(to, "failed to send '{subject}': {err}");
        }
    }

    async fn user_model<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
    ) -> ResultEngine<users::Model> {
        users::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("user".to_string()))
    }

    /// Create an unverified account and mail its verification link.
    ///
    /// Username and email must both be unused.
    pub async fn register(&self, cmd: NewUser) -> ResultEngine<User> {
        let username = normalize_required(&cmd.username, "username")?;
        let email = normalize_email(&cmd.email)?;
        check_password(&cmd.password)?;
        let password_hash = hash_password(&cmd.password)?;
        let token = generate_token();

        let user = with_tx!(self, |db_tx| {
            let taken = users::Entity::find()
                .filter(
                    users::Column::Username
                        .eq(username.as_str())
                        .or(users::Column::Email.eq(email.as_str())),
                )
                .one(&db_tx)
                .await?;
            if let Some(existing) = taken {
                let field = if existing.username == username {
                    "username"
                } else {
                    "email"
                };
                return Err(EngineError::ExistingKey(field.to_string()));
            }

            let now = self.clock.now();
            let model = users::ActiveModel {
                id: ActiveValue::NotSet,
                username: ActiveValue::Set(username),
                email: ActiveValue::Set(email),
                password_hash: ActiveValue::Set(password_hash),
                role: ActiveValue::Set(Role::User.as_str().to_string()),
                name: ActiveValue::Set(normalize_optional_text(cmd.name.as_deref())),
                birthdate: ActiveValue::Set(None),
                phone: ActiveValue::Set(None),
                address: ActiveValue::Set(None),
                is_email_verified: ActiveValue::Set(false),
                email_verify_token: ActiveValue::Set(Some(token.clone())),
                email_verify_expiry: ActiveValue::Set(Some(now + ttl(EMAIL_VERIFY_TTL))),
                password_reset_token: ActiveValue::Set(None),
                password_reset_expiry: ActiveValue::Set(None),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
            }
            .insert(&db_tx)
            .await?;
            User::try_from(model)
        })?;

        tracing::info!(user_id = user.id, "user registered");
        self.send_mail(&user.email, verification_email(&self.app_url, &token))
            .await;
        Ok(user)
    }

    /// Check credentials and return the account.
    pub async fn authenticate(&self, username: &str, password: &str) -> ResultEngine<User> {
        let model = users::Entity::find()
            .filter(users::Column::Username.eq(username.trim()))
            .one(&self.database)
            .await?
            .ok_or(EngineError::InvalidCredentials)?;
        if !verify_password(password, &model.password_hash) {
            return Err(EngineError::InvalidCredentials);
        }
        User::try_from(model)
    }

    pub async fn user(&self, id: i64) -> ResultEngine<User> {
        User::try_from(self.user_model(&self.database, id).await?)
    }

    /// Look up an account on behalf of `actor`.
    pub async fn user_as(&self, id: i64, actor: &Actor) -> ResultEngine<User> {
        actor.check_account(id)?;
        self.user(id).await
    }

    /// Delete an account together with every expense it owns, soft-deleted
    /// ones included.
    pub async fn delete_user(&self, id: i64, actor: &Actor) -> ResultEngine<()> {
        actor.check_account(id)?;
        with_tx!(self, |db_tx| {
            let model = self.user_model(&db_tx, id).await?;
            let removed = expenses::Entity::delete_many()
                .filter(expenses::Column::UserId.eq(model.id))
                .exec(&db_tx)
                .await?
                .rows_affected;
            users::Entity::delete_by_id(model.id).exec(&db_tx).await?;
            tracing::info!(user_id = model.id, expenses = removed, "user deleted");
            Ok(())
        })
    }

    /// Update profile fields. Changing the email resets verification.
    pub async fn update_profile(&self, id: i64, patch: ProfilePatch) -> ResultEngine<User> {
        let mut verify_token = None;
        let user = with_tx!(self, |db_tx| {
            let model = self.user_model(&db_tx, id).await?;
            let now = self.clock.now();
            let mut active: users::ActiveModel = model.clone().into();

            if let Some(email) = patch.email.as_deref() {
                let email = normalize_email(email)?;
                if email != model.email {
                    let taken = users::Entity::find()
                        .filter(users::Column::Email.eq(email.as_str()))
                        .one(&db_tx)
                        .await?;
                    if taken.is_some() {
                        return Err(EngineError::ExistingKey("email".to_string()));
                    }
                    let token = generate_token();
                    active.email = ActiveValue::Set(email);
                    active.is_email_verified = ActiveValue::Set(false);
                    active.email_verify_token = ActiveValue::Set(Some(token.clone()));
                    active.email_verify_expiry =
                        ActiveValue::Set(Some(now + ttl(EMAIL_VERIFY_TTL)));
                    verify_token = Some(token);
                }
            }
            if let Some(name) = patch.name.as_deref() {
                active.name = ActiveValue::Set(normalize_optional_text(Some(name)));
            }
            if let Some(birthdate) = patch.birthdate.as_deref() {
                active.birthdate =
                    ActiveValue::Set(normalize_optional_date(Some(birthdate), "birthdate")?);
            }
            if let Some(phone) = patch.phone.as_deref() {
                active.phone = ActiveValue::Set(normalize_optional_text(Some(phone)));
            }
            if let Some(address) = patch.address.as_deref() {
                active.address = ActiveValue::Set(normalize_optional_text(Some(address)));
            }
            active.updated_at = ActiveValue::Set(now);

            User::try_from(active.update(&db_tx).await?)
        })?;

        if let Some(token) = verify_token {
            self.send_mail(&user.email, verification_email(&self.app_url, &token))
                .await;
        }
        Ok(user)
    }

    /// Mark the account owning `token` as verified. The token is single use.
    pub async fn verify_email(&self, token: &str) -> ResultEngine<User> {
        with_tx!(self, |db_tx| {
            let now = self.clock.now();
            let model = users::Entity::find()
                .filter(users::Column::EmailVerifyToken.eq(token.trim()))
                .one(&db_tx)
                .await?
                .filter(|m| {
                    !token.trim().is_empty() && m.email_verify_expiry.is_some_and(|e| e > now)
                })
                .ok_or_else(|| {
                    EngineError::InvalidToken("invalid or expired verification token".to_string())
                })?;

            let mut active: users::ActiveModel = model.into();
            active.is_email_verified = ActiveValue::Set(true);
            active.email_verify_token = ActiveValue::Set(None);
            active.email_verify_expiry = ActiveValue::Set(None);
            active.updated_at = ActiveValue::Set(now);
            User::try_from(active.update(&db_tx).await?)
        })
    }

    /// Issue a fresh verification link.
    ///
    /// Unknown and already verified addresses are accepted silently so the
    /// endpoint does not reveal which emails are registered.
    pub async fn resend_verification(&self, email: &str) -> ResultEngine<()> {
        let email = normalize_email(email)?;
        let token = generate_token();
        let sent_to = with_tx!(self, |db_tx| {
            let model = users::Entity::find()
                .filter(users::Column::Email.eq(email.as_str()))
                .one(&db_tx)
                .await?;
            match model {
                Some(model) if !model.is_email_verified => {
                    let now = self.clock.now();
                    let address = model.email.clone();
                    let mut active: users::ActiveModel = model.into();
                    active.email_verify_token = ActiveValue::Set(Some(token.clone()));
                    active.email_verify_expiry =
                        ActiveValue::Set(Some(now + ttl(EMAIL_VERIFY_TTL)));
                    active.updated_at = ActiveValue::Set(now);
                    active.update(&db_tx).await?;
                    Ok::<_, EngineError>(Some(address))
                }
                _ => Ok(None),
            }
        })?;

        if let Some(address) = sent_to {
            self.send_mail(&address, verification_email(&self.app_url, &token))
                .await;
        }
        Ok(())
    }

    /// Issue a password reset link to a verified account.
    ///
    /// Always succeeds for a well-formed address, whether or not a mail is sent.
    pub async fn forgot_password(&self, email: &str) -> ResultEngine<()> {
        let email = normalize_email(email)?;
        let token = generate_token();
        let sent_to = with_tx!(self, |db_tx| {
            let model = users::Entity::find()
                .filter(users::Column::Email.eq(email.as_str()))
                .one(&db_tx)
                .await?;
            match model {
                Some(model) if model.is_email_verified => {
                    let now = self.clock.now();
                    let address = model.email.clone();
                    let mut active: users::ActiveModel = model.into();
                    active.password_reset_token = ActiveValue::Set(Some(token.clone()));
                    active.password_reset_expiry =
                        ActiveValue::Set(Some(now + ttl(PASSWORD_RESET_TTL)));
                    active.updated_at = ActiveValue::Set(now);
                    active.update(&db_tx).await?;
                    Ok::<_, EngineError>(Some(address))
                }
                _ => Ok(None),
            }
        })?;

        if let Some(address) = sent_to {
            self.send_mail(&address, password_reset_email(&self.app_url, &token))
                .await;
        }
        Ok(())
    }

    /// Set a new password using a reset token. The token is single use.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> ResultEngine<()> {
        check_password(new_password)?;
        let password_hash = hash_password(new_password)?;
        with_tx!(self, |db_tx| {
            let now = self.clock.now();
            let model = users::Entity::find()
                .filter(users::Column::PasswordResetToken.eq(token.trim()))
                .one(&db_tx)
                .await?
                .filter(|m| {
                    !token.trim().is_empty() && m.password_reset_expiry.is_some_and(|e| e > now)
                })
                .ok_or_else(|| {
                    EngineError::InvalidToken("invalid or expired reset token".to_string())
                })?;

            let mut active: users::ActiveModel = model.into();
            active.password_hash = ActiveValue::Set(password_hash);
            active.password_reset_token = ActiveValue::Set(None);
            active.password_reset_expiry = ActiveValue::Set(None);
            active.updated_at = ActiveValue::Set(now);
            active.update(&db_tx).await?;
            tracing::info!("password reset");
            Ok(())
        })
    }

    /// Change the password of a signed-in user.
    pub async fn change_password(
        &self,
        id: i64,
        current_password: &str,
        new_password: &str,
    ) -> ResultEngine<()> {
        check_password(new_password)?;
        with_tx!(self, |db_tx| {
            let model = self.user_model(&db_tx, id).await?;
            if !verify_password(current_password, &model.password_hash) {
                return Err(EngineError::InvalidCredentials);
            }
            let mut active: users::ActiveModel = model.into();
            active.password_hash = ActiveValue::Set(hash_password(new_password)?);
            active.updated_at = ActiveValue::Set(self.clock.now());
            active.update(&db_tx).await?;
            Ok(())
        })
    }

    /// Grant or revoke a role.
    pub async fn set_role(&self, username: &str, role: Role) -> ResultEngine<User> {
        with_tx!(self, |db_tx| {
            let model = users::Entity::find()
                .filter(users::Column::Username.eq(username.trim()))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::KeyNotFound("user".to_string()))?;
            let mut active: users::ActiveModel = model.into();
            active.role = ActiveValue::Set(role.as_str().to_string());
            active.updated_at = ActiveValue::Set(self.clock.now());
            let user = User::try_from(active.update(&db_tx).await?)?;
            tracing::info!(user_id = user.id, role = role.as_str(), "role changed");
            Ok(user)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn email_shape_is_checked() {
        assert_eq!(normalize_email(" Ann@Example.com "), Ok("ann@example.com".to_string()));
        assert!(normalize_email("ann").is_err());
        assert!(normalize_email("@example.com").is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(check_password("short").is_err());
        assert!(check_password("long enough").is_ok());
    }
}
