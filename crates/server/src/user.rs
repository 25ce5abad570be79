//! Account endpoints: sign-up, email verification, password flows and profile.

use api_types::{
    Message,
    user::{
        ChangePassword, EmailRequest, ResetPassword, Role as ApiRole, User, UserRegister,
        UserUpdate, VerifyEmail,
    },
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use engine::Role;

use crate::{ServerError, expenses::actor, server::ServerState};

fn map_user(user: engine::User) -> User {
    User {
        id: user.id,
        username: user.username,
        email: user.email,
        role: match user.role {
            Role::User => ApiRole::User,
            Role::Admin => ApiRole::Admin,
        },
        name: user.name,
        birthdate: user.birthdate,
        phone: user.phone,
        address: user.address,
        is_email_verified: user.is_email_verified,
        created_at: user.created_at,
        updated_at: user.updated_at,
    }
}

pub async fn register(
    State(state): State<ServerState>,
    Json(payload): Json<UserRegister>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    let user = state
        .engine
        .register(engine::NewUser {
            username: payload.username,
            email: payload.email,
            password: payload.password,
            name: payload.name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(map_user(user))))
}

pub async fn verify_email(
    State(state): State<ServerState>,
    Json(payload): Json<VerifyEmail>,
) -> Result<Json<User>, ServerError> {
    let user = state.engine.verify_email(&payload.token).await?;
    Ok(Json(map_user(user)))
}

pub async fn resend_verification(
    State(state): State<ServerState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<Message>, ServerError> {
    state.engine.resend_verification(&payload.email).await?;
    Ok(Json(Message::new(
        "if the account exists and is not verified, a new link has been sent",
    )))
}

pub async fn forgot_password(
    State(state): State<ServerState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<Message>, ServerError> {
    state.engine.forgot_password(&payload.email).await?;
    Ok(Json(Message::new(
        "if the account exists, a password reset link has been sent",
    )))
}

pub async fn reset_password(
    State(state): State<ServerState>,
    Json(payload): Json<ResetPassword>,
) -> Result<Json<Message>, ServerError> {
    state
        .engine
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(Message::new("password updated")))
}

pub async fn me(Extension(user): Extension<engine::User>) -> Json<User> {
    Json(map_user(user))
}

pub async fn update_me(
    Extension(user): Extension<engine::User>,
    State(state): State<ServerState>,
    Json(payload): Json<UserUpdate>,
) -> Result<Json<User>, ServerError> {
    let user = state
        .engine
        .update_profile(
            user.id,
            engine::ProfilePatch {
                email: payload.email,
                name: payload.name,
                birthdate: payload.birthdate,
                phone: payload.phone,
                address: payload.address,
            },
        )
        .await?;
    Ok(Json(map_user(user)))
}

pub async fn change_password(
    Extension(user): Extension<engine::User>,
    State(state): State<ServerState>,
    Json(payload): Json<ChangePassword>,
) -> Result<StatusCode, ServerError> {
    state
        .engine
        .change_password(user.id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get(
    Extension(user): Extension<engine::User>,
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ServerError> {
    let found = state.engine.user_as(id, &actor(&user)).await?;
    Ok(Json(map_user(found)))
}

pub async fn delete(
    Extension(user): Extension<engine::User>,
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    state.engine.delete_user(id, &actor(&user)).await?;
    Ok(StatusCode::NO_CONTENT)
}
