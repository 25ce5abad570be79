use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use engine::{ExchangeRateCache, HttpRateSource, Role, SystemClock};
use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "mindoh")]
#[command(about = "Personal finance backend: ledger, multi-currency totals and accounts")]
struct Cli {
    /// Settings file, without extension.
    #[arg(long, env = "MINDOH_CONFIG", default_value = "settings")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Grant the admin role to an existing user.
    Promote { username: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "mindoh={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.server.database).await?;

    let clock = Arc::new(SystemClock);
    let source = HttpRateSource::new(
        &settings.rates.primary_url,
        &settings.rates.fallback_url,
        Duration::from_secs(settings.rates.timeout_secs),
    );
    let rates = Arc::new(ExchangeRateCache::new(
        Arc::new(source),
        clock.clone(),
        Duration::from_secs(settings.rates.ttl_secs),
    ));

    let engine = engine::Engine::builder()
        .database(db)
        .clock(clock)
        .rates(rates.clone())
        .app_url(&settings.mail.app_url)
        .build()
        .await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Promote { username } => {
            let user = engine.set_role(&username, Role::Admin).await?;
            tracing::info!("{} is now an admin", user.username);
        }
        Command::Serve => {
            // Warm the rate table without delaying startup.
            tokio::spawn(async move {
                rates.refresh().await;
            });

            let bind = settings
                .server
                .bind
                .unwrap_or_else(|| "127.0.0.1".to_string());
            let addr = format!("{}:{}", bind, settings.server.port);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            server::run_with_listener(engine, listener).await?;
        }
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
