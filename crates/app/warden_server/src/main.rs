//! Warden authentication server binary.
//!
//! Loads settings from the environment (and `.env`), connects to PostgreSQL,
//! runs migrations, and serves the auth API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warden_api::config::ApiConfig;
use warden_core::auth::service::AuthService;
use warden_core::config::AuthSettings;
use warden_core::db::{DbSettings, connect_with_retry};
use warden_core::store::pg::PgStore;
use warden_core::store::{AuthStore, spawn_expiry_sweep};

/// CLI arguments; each falls back to an environment variable.
#[derive(Parser, Debug)]
#[command(name = "warden_server", about = "Warden authentication server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
    bind_addr: SocketAddr,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,

    /// Seconds to wait for a pooled connection.
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    acquire_timeout_secs: u64,

    /// Server-side statement timeout in milliseconds.
    #[arg(long, env = "DB_STATEMENT_TIMEOUT_MS", default_value_t = 5000)]
    statement_timeout_ms: u64,

    /// Extra connection attempts at startup.
    #[arg(long, env = "DB_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 15)]
    request_timeout_secs: u64,
}

impl Args {
    fn db_settings(&self) -> DbSettings {
        DbSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            statement_timeout: Duration::from_millis(self.statement_timeout_ms),
            max_retries: self.max_retries,
            ..DbSettings::new(self.database_url.clone())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,warden_api=debug,warden_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let settings =
        AuthSettings::from_env().inspect_err(|e| error!(error = %e, "invalid configuration"))?;

    info!(
        bind_addr = %args.bind_addr,
        max_connections = args.max_connections,
        issuer = %settings.tokens.issuer,
        rate_limit_enabled = settings.rate_limit.enabled,
        rate_limit_trust_proxy = settings.rate_limit.trust_proxy,
        "starting warden_server"
    );

    let pool = connect_with_retry(&args.db_settings()).await?;

    info!("running database migrations");
    warden_api::migrate(&pool).await?;

    let store: Arc<dyn AuthStore> = Arc::new(PgStore::new(pool.clone()));
    let service = Arc::new(AuthService::from_settings(store.clone(), &settings)?);

    let config = ApiConfig::new(&settings, Duration::from_secs(args.request_timeout_secs));
    let state = warden_api::AppState::new(service, config);

    let shutdown = CancellationToken::new();
    let sweeper = state
        .limiter
        .spawn_sweeper(settings.rate_limit.sweep_every, shutdown.clone());
    let expiry = spawn_expiry_sweep(store, settings.refresh_sweep_every, shutdown.clone());

    let app = warden_api::router(state);
    let listener = tokio::net::TcpListener::bind(args.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        }
    })
    .await;

    shutdown.cancel();
    let _ = tokio::join!(sweeper, expiry);
    pool.close().await;
    info!("shutdown complete");

    serve_result?;
    Ok(())
}
