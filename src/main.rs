//! Equiplend Server - Equipment Lending
//!
//! REST API server tracking equipment availability and reservations.
//!
//! `equiplend-server hash-password <password>` prints an Argon2 hash for
//! an `[[auth.accounts]]` entry and exits.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use equiplend_server::{
    api,
    config::{AppConfig, StorageBackend},
    repository::Repository,
    services::identity::{hash_password, ConfigIdentityProvider},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, password] = args.as_slice() {
        if command == "hash-password" {
            println!("{}", hash_password(password)?);
            return Ok(());
        }
    }

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_tracing(&config);

    tracing::info!("Starting Equiplend Server v{}", env!("CARGO_PKG_VERSION"));

    let repository = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; the ledger is lost on restart");
            Repository::memory()
        }
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;

            tracing::info!("Database migrations completed");
            Repository::postgres(pool)
        }
    };

    if config.auth.accounts.is_empty() {
        tracing::warn!("No accounts configured; every login will be rejected");
    }
    let identity = Arc::new(ConfigIdentityProvider::new(config.auth.accounts.clone()));

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid host address '{}'", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);

    let state = AppState::new(config, repository, identity);
    let app = api::router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Install the global subscriber: stdout in the configured format plus an
/// optional daily-rolling file.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("equiplend_server={},tower_http=debug", config.logging.level).into()
    });

    let json = config.logging.format.eq_ignore_ascii_case("json");

    let (file_layer, guard) = match &config.logging.file {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "equiplend.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(file_layer)
        .init();

    guard
}
