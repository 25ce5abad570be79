use api_types::currency::{Currencies, ExchangeRates};
use axum::{Json, extract::State};
use engine::{AVAILABLE_CURRENCIES, BASE_CURRENCY};

use crate::server::ServerState;

/// Current rates, each expressed as "1 unit = X VND".
pub async fn exchange_rates(State(state): State<ServerState>) -> Json<ExchangeRates> {
    let rates = state.engine.exchange_rates().await;
    let last_refresh = state.engine.rates().last_refresh().await;
    Json(ExchangeRates {
        base_currency: BASE_CURRENCY.to_string(),
        rates: rates.into_iter().collect(),
        last_refresh,
    })
}

pub async fn currencies() -> Json<Currencies> {
    Json(Currencies {
        currencies: AVAILABLE_CURRENCIES.iter().map(ToString::to_string).collect(),
    })
}
