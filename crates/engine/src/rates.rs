//! Exchange rate cache.
//!
//! Rates are kept as "units of base currency (VND) per 1 unit of currency",
//! so `VND` is always `1`. The table starts from hardcoded fallback values and
//! is replaced wholesale by every successful refresh. A failed refresh is
//! logged and the previous table keeps being served.
//!
//! Concurrent readers that find the table stale share a single fetch: the
//! first one takes the refresh gate, later ones wait on it and skip their own
//! fetch once they see an attempt that finished after they started waiting.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::Clock;

/// Currency every rate is expressed against.
pub const BASE_CURRENCY: &str = "VND";

/// Currencies offered to clients.
pub const AVAILABLE_CURRENCIES: [&str; 3] = ["VND", "USD", "EUR"];

pub const PRIMARY_RATES_URL: &str =
    "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies/vnd.json";
pub const FALLBACK_RATES_URL: &str =
    "https://latest.currency-api.pages.dev/v1/currencies/vnd.json";

pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Currency code to "base units per 1 unit" mapping.
pub type RateTable = HashMap<String, f64>;

/// Table served before the first successful refresh.
pub fn fallback_rates() -> RateTable {
    HashMap::from([
        ("VND".to_string(), 1.0),
        ("USD".to_string(), 25_000.0),
        ("EUR".to_string(), 27_000.0),
    ])
}

/// Rate of `code` in `rates`. Unknown currencies count as `1`.
pub fn rate_of(rates: &RateTable, code: &str) -> f64 {
    rates
        .get(code)
        .or_else(|| rates.get(&code.to_ascii_uppercase()))
        .copied()
        .unwrap_or(1.0)
}

/// Convert `amount` from one currency to another through the base currency.
pub fn convert(amount: f64, from: &str, to: &str, rates: &RateTable) -> f64 {
    amount * rate_of(rates, from) / rate_of(rates, to)
}

/// Turn a "1 base = X target" table into "1 target = Y base".
///
/// Keys are uppercased, entries that are not positive and finite are dropped,
/// and the base currency is pinned to `1`.
pub fn invert_rates(raw: &HashMap<String, f64>) -> RateTable {
    let mut rates: RateTable = raw
        .iter()
        .filter(|(_, rate)| rate.is_finite() && **rate > 0.0)
        .map(|(code, rate)| (code.to_ascii_uppercase(), 1.0 / rate))
        .filter(|(_, rate)| rate.is_finite())
        .collect();
    rates.insert(BASE_CURRENCY.to_string(), 1.0);
    rates
}

#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate source returned status {0}")]
    Status(u16),
    #[error("rate response could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("rate response has no '{0}' table")]
    MissingBase(String),
}

/// Remote source of raw rates, expressed as "1 base = X target".
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch(&self) -> Result<HashMap<String, f64>, RateError>;
}

/// HTTP rate source with a primary and a fallback endpoint.
///
/// Both endpoints return `{ "<base>": { "<currency>": <rate>, ... }, ... }`.
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: Client,
    primary_url: String,
    fallback_url: String,
}

impl HttpRateSource {
    pub fn new(primary_url: &str, fallback_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.to_string(),
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<HashMap<String, f64>, RateError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RateError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        parse_rate_response(&body)
    }
}

impl Default for HttpRateSource {
    fn default() -> Self {
        Self::new(PRIMARY_RATES_URL, FALLBACK_RATES_URL, DEFAULT_FETCH_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl RateSource for HttpRateSource {
    async fn fetch(&self) -> Result<HashMap<String, f64>, RateError> {
        match self.fetch_url(&self.primary_url).await {
            Ok(rates) => Ok(rates),
            Err(err) => {
                tracing::warn!("primary rate source failed, trying fallback: {err}");
                self.fetch_url(&self.fallback_url).await
            }
        }
    }
}

/// Extract the base currency table from a rate response body.
fn parse_rate_response(body: &[u8]) -> Result<HashMap<String, f64>, RateError> {
    let document: HashMap<String, serde_json::Value> = serde_json::from_slice(body)?;
    let table = document
        .into_iter()
        .find_map(|(key, value)| key.eq_ignore_ascii_case(BASE_CURRENCY).then_some(value))
        .ok_or_else(|| RateError::MissingBase(BASE_CURRENCY.to_ascii_lowercase()))?;

    let table: HashMap<String, serde_json::Value> = serde_json::from_value(table)?;
    Ok(table
        .into_iter()
        .filter_map(|(code, rate)| rate.as_f64().map(|rate| (code, rate)))
        .collect())
}

/// A source that always returns the same raw table. Useful offline and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRateSource {
    raw: HashMap<String, f64>,
}

impl StaticRateSource {
    /// `raw` uses the same "1 base = X target" shape as the remote source.
    pub fn new(raw: HashMap<String, f64>) -> Self {
        Self { raw }
    }
}

#[async_trait::async_trait]
impl RateSource for StaticRateSource {
    async fn fetch(&self) -> Result<HashMap<String, f64>, RateError> {
        Ok(self.raw.clone())
    }
}

#[derive(Debug)]
struct RateState {
    rates: RateTable,
    last_refresh: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
}

/// Shared, periodically refreshed exchange rate table.
pub struct ExchangeRateCache {
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    state: RwLock<RateState>,
    refresh_gate: Mutex<()>,
}

impl std::fmt::Debug for ExchangeRateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRateCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ExchangeRateCache {
    pub fn new(source: Arc<dyn RateSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::hours(6)),
            state: RwLock::new(RateState {
                rates: fallback_rates(),
                last_refresh: None,
                last_attempt: None,
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Current rates, refreshing first when the table is older than the TTL.
    ///
    /// Always returns a table; a failed refresh serves the stale one.
    pub async fn rates(&self) -> RateTable {
        if self.is_stale().await {
            self.refresh_if_stale().await;
        }
        self.state.read().await.rates.clone()
    }

    /// Time of the last successful refresh, if any.
    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_refresh
    }

    /// Force a refresh. Returns `true` when the table was replaced.
    pub async fn refresh(&self) -> bool {
        let _gate = self.refresh_gate.lock().await;
        self.fetch_and_swap().await
    }

    async fn is_stale(&self) -> bool {
        let now = self.clock.now();
        match self.state.read().await.last_refresh {
            Some(last) => now - last > self.ttl,
            None => true,
        }
    }

    async fn refresh_if_stale(&self) {
        let waiting_since = self.clock.now();
        let _gate = self.refresh_gate.lock().await;

        // Someone else attempted a refresh while we waited on the gate.
        let last_attempt = self.state.read().await.last_attempt;
        if last_attempt.is_some_and(|at| at >= waiting_since) {
            return;
        }
        if !self.is_stale().await {
            return;
        }
        self.fetch_and_swap().await;
    }

    async fn fetch_and_swap(&self) -> bool {
        let fetched = self.source.fetch().await;
        let now = self.clock.now();

        let raw = match fetched {
            Ok(raw) if !raw.is_empty() => raw,
            Ok(_) => {
                tracing::warn!("rate source returned an empty table, serving stale rates");
                self.state.write().await.last_attempt = Some(now);
                return false;
            }
            Err(err) => {
                tracing::warn!("failed to refresh exchange rates, serving stale rates: {err}");
                self.state.write().await.last_attempt = Some(now);
                return false;
            }
        };

        let rates = invert_rates(&raw);
        tracing::info!(
            currencies = rates.len(),
            usd = rate_of(&rates, "USD"),
            eur = rate_of(&rates, "EUR"),
            "exchange rates updated"
        );

        let mut state = self.state.write().await;
        state.rates = rates;
        state.last_refresh = Some(now);
        state.last_attempt = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::FixedClock;

    struct CountingSource {
        calls: AtomicUsize,
        result: Option<HashMap<String, f64>>,
    }

    impl CountingSource {
        fn ok(raw: HashMap<String, f64>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Some(raw),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl RateSource for CountingSource {
        async fn fetch(&self) -> Result<HashMap<String, f64>, RateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.result.clone().ok_or(RateError::Status(503))
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
        ))
    }

    fn raw_usd_eur() -> HashMap<String, f64> {
        HashMap::from([("usd".to_string(), 0.00004), ("eur".to_string(), 0.00003125)])
    }

    #[test]
    fn inversion_pins_base_and_drops_bad_entries() {
        let raw = HashMap::from([
            ("usd".to_string(), 0.00004),
            ("vnd".to_string(), 1.0),
            ("xxx".to_string(), 0.0),
            ("yyy".to_string(), -2.0),
            ("zzz".to_string(), f64::NAN),
        ]);
        let rates = invert_rates(&raw);
        assert!((rates["USD"] - 25_000.0).abs() < 1e-6);
        assert_eq!(rates["VND"], 1.0);
        assert!(!rates.contains_key("XXX"));
        assert!(!rates.contains_key("YYY"));
        assert!(!rates.contains_key("ZZZ"));
    }

    #[test]
    fn unknown_currency_counts_as_one() {
        let rates = fallback_rates();
        assert_eq!(rate_of(&rates, "GBP"), 1.0);
        assert_eq!(convert(10.0, "GBP", "VND", &rates), 10.0);
    }

    #[test]
    fn conversion_round_trips() {
        let rates = fallback_rates();
        let there = convert(123.45, "EUR", "USD", &rates);
        let back = convert(there, "USD", "EUR", &rates);
        assert!((back - 123.45).abs() < 1e-9);
    }

    #[test]
    fn parses_base_table_case_insensitively() {
        let body = br#"{"date":"2024-01-15","vnd":{"usd":0.00004,"eur":0.00003,"btc":"n/a"}}"#;
        let raw = parse_rate_response(body).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw["usd"], 0.00004);

        let missing = parse_rate_response(br#"{"date":"2024-01-15","usd":{}}"#);
        assert!(matches!(missing, Err(RateError::MissingBase(_))));
    }

    #[tokio::test]
    async fn first_read_refreshes_then_serves_cache() {
        let source = Arc::new(CountingSource::ok(raw_usd_eur()));
        let cache = ExchangeRateCache::new(source.clone(), clock(), DEFAULT_TTL);

        let rates = cache.rates().await;
        assert!((rates["EUR"] - 32_000.0).abs() < 1e-6);
        cache.rates().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_table_is_refreshed() {
        let source = Arc::new(CountingSource::ok(raw_usd_eur()));
        let clock = clock();
        let cache = ExchangeRateCache::new(source.clone(), clock.clone(), DEFAULT_TTL);

        cache.rates().await;
        clock.advance(TimeDelta::hours(5));
        cache.rates().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        clock.advance(TimeDelta::hours(2));
        cache.rates().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_source_serves_fallback_table() {
        let source = Arc::new(CountingSource::failing());
        let cache = ExchangeRateCache::new(source, clock(), DEFAULT_TTL);

        assert_eq!(cache.rates().await, fallback_rates());
        assert!(!cache.refresh().await);
        assert_eq!(cache.rates().await, fallback_rates());
        assert_eq!(cache.last_refresh().await, None);
    }

    /// Serve `status` and `body` on a local port for every connection.
    async fn serve(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{addr}/vnd.json")
    }

    /// Accept connections and never answer.
    async fn silent() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });
        format!("http://{addr}/vnd.json")
    }

    /// A URL nothing listens on.
    async fn dead() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/vnd.json")
    }

    const VND_BODY: &str = r#"{"date":"2024-01-15","vnd":{"usd":0.00004}}"#;

    #[tokio::test]
    async fn http_source_falls_back_on_error_status() {
        let primary = serve("503 Service Unavailable", "").await;
        let fallback = serve("200 OK", VND_BODY).await;
        let source = HttpRateSource::new(&primary, &fallback, Duration::from_secs(5));

        let raw = source.fetch().await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw["usd"], 0.00004);

        let cache = ExchangeRateCache::new(Arc::new(source), clock(), DEFAULT_TTL);
        let rates = cache.rates().await;
        assert!((rates["USD"] - 25_000.0).abs() < 1e-6);
        assert!(cache.last_refresh().await.is_some());
    }

    #[tokio::test]
    async fn http_source_falls_back_on_refused_connection_and_timeout() {
        let fallback = serve("200 OK", VND_BODY).await;

        let refused = HttpRateSource::new(&dead().await, &fallback, Duration::from_secs(5));
        assert_eq!(refused.fetch().await.unwrap()["usd"], 0.00004);

        let slow = HttpRateSource::new(&silent().await, &fallback, Duration::from_millis(200));
        assert_eq!(slow.fetch().await.unwrap()["usd"], 0.00004);
    }

    #[tokio::test]
    async fn dead_http_sources_keep_serving_fallback_table() {
        let source = HttpRateSource::new(&dead().await, &dead().await, Duration::from_secs(1));
        assert!(source.fetch().await.is_err());

        let cache = ExchangeRateCache::new(Arc::new(source), clock(), DEFAULT_TTL);
        assert_eq!(cache.rates().await, fallback_rates());
        assert!(!cache.refresh().await);
        assert_eq!(cache.rates().await.len(), 3);
        assert_eq!(cache.last_refresh().await, None);
    }

    #[tokio::test]
    async fn concurrent_stale_reads_share_one_fetch() {
        let source = Arc::new(CountingSource::ok(raw_usd_eur()));
        let cache = Arc::new(ExchangeRateCache::new(source.clone(), clock(), DEFAULT_TTL));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.rates().await });
        }
        while let Some(result) = tasks.join_next().await {
            let rates = result.unwrap();
            assert!((rates["USD"] - 25_000.0).abs() < 1e-6);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
