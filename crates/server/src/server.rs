use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};

use std::sync::Arc;

use crate::{currency, expenses, user};
use engine::{Engine, EngineError};

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
}

/// Resolve the Basic credentials against the users table and expose the
/// account to handlers as an `Extension<engine::User>`.
async fn auth(
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(TypedHeader(auth_header)) = auth_header else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if auth_header.username().is_empty() || auth_header.password().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user = match state
        .engine
        .authenticate(auth_header.username(), auth_header.password())
        .await
    {
        Ok(user) => user,
        Err(EngineError::InvalidCredentials) => return Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            tracing::error!("authentication failed: {err}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn health() -> Json<api_types::Message> {
    Json(api_types::Message::new("ok"))
}

fn router(state: ServerState) -> Router {
    let protected = Router::new()
        .route("/user/me", get(user::me).patch(user::update_me))
        .route("/user/change-password", post(user::change_password))
        .route("/user/{id}", get(user::get).delete(user::delete))
        .route("/expenses", post(expenses::create).get(expenses::list))
        .route("/expenses/summary", get(expenses::summary))
        .route("/expenses/groups", get(expenses::groups))
        .route("/expenses/types", get(expenses::types))
        .route(
            "/expenses/{id}",
            get(expenses::get)
                .patch(expenses::update)
                .delete(expenses::delete),
        )
        .route("/currency/exchange-rates", get(currency::exchange_rates))
        .route("/currency/currencies", get(currency::currencies))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .route("/health", get(health))
        .route("/user/register", post(user::register))
        .route("/user/verify-email", post(user::verify_email))
        .route("/user/resend-verification", post(user::resend_verification))
        .route("/user/forgot-password", post(user::forgot_password))
        .route("/user/reset-password", post(user::reset_password))
        .merge(protected)
        .with_state(state)
}

/// Build the application router around an engine.
pub fn app(engine: Engine) -> Router {
    router(ServerState {
        engine: Arc::new(engine),
    })
}

/// Serve on an already bound listener until the server stops.
pub async fn run_with_listener(
    engine: Engine,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(engine)).await
}
