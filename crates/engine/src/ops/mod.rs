use std::{sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;

use crate::{
    Clock, EngineError, ExchangeRateCache, HttpRateSource, LogMailer, Mailer, ResultEngine, Role,
    SystemClock, rates::DEFAULT_TTL,
};

mod expenses;
mod reports;
mod users;

pub use expenses::{ExpensePatch, NewExpense};
pub use users::{NewUser, ProfilePatch};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// The authenticated caller of an operation.
///
/// A `User` only sees its own rows. An `Admin` may read and write any row
/// and may list every user at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Resolve which user's rows a read may touch. `None` means every user.
    pub(crate) fn scope(&self, requested: Option<i64>) -> Option<i64> {
        if self.is_admin() {
            requested
        } else {
            Some(self.user_id)
        }
    }

    /// Resolve the owner of a new row.
    pub(crate) fn owner_for(&self, requested: Option<i64>) -> ResultEngine<i64> {
        match requested {
            Some(id) if id != self.user_id && !self.is_admin() => Err(EngineError::Forbidden(
                "you can only add your own expenses".to_string(),
            )),
            Some(id) => Ok(id),
            None => Ok(self.user_id),
        }
    }

    pub(crate) fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    /// Accounts other than one's own are admin only.
    pub(crate) fn check_account(&self, user_id: i64) -> ResultEngine<()> {
        if self.can_access(user_id) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(
                "you can only manage your own account".to_string(),
            ))
        }
    }
}

pub struct Engine {
    database: DatabaseConnection,
    rates: Arc<ExchangeRateCache>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn Mailer>,
    app_url: String,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("rates", &self.rates)
            .field("app_url", &self.app_url)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The shared exchange rate cache.
    pub fn rates(&self) -> &Arc<ExchangeRateCache> {
        &self.rates
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    rates: Option<Arc<ExchangeRateCache>>,
    clock: Option<Arc<dyn Clock>>,
    mailer: Option<Arc<dyn Mailer>>,
    app_url: Option<String>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Share an exchange rate cache. Defaults to the HTTP source with a 6h TTL.
    pub fn rates(mut self, rates: Arc<ExchangeRateCache>) -> EngineBuilder {
        self.rates = Some(rates);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> EngineBuilder {
        self.clock = Some(clock);
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> EngineBuilder {
        self.mailer = Some(mailer);
        self
    }

    /// Frontend base URL used in email links.
    pub fn app_url(mut self, url: &str) -> EngineBuilder {
        self.app_url = Some(url.to_string());
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let rates = self.rates.unwrap_or_else(|| {
            Arc::new(ExchangeRateCache::new(
                Arc::new(HttpRateSource::default()),
                clock.clone(),
                DEFAULT_TTL,
            ))
        });
        Ok(Engine {
            database: self.database,
            rates,
            clock,
            mailer: self.mailer.unwrap_or_else(|| Arc::new(LogMailer)),
            app_url: self
                .app_url
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        })
    }
}

/// Token lifetimes for account emails.
pub(crate) const EMAIL_VERIFY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub(crate) const PASSWORD_RESET_TTL: Duration = Duration::from_secs(60 * 60);
