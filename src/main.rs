use std::net::TcpListener;
use std::sync::Arc;

use actix_web::web;
use sqlx::postgres::PgPoolOptions;
use user_management::auth::{PgKeyStore, PgRefreshLedger, RedisCache};
use user_management::configuration::get_configuration;
use user_management::error::AppError;
use user_management::session::SessionService;
use user_management::startup::run;
use user_management::telemetry::init_telemetry;
use user_management::users::PgUserStore;

fn startup_error(kind: std::io::ErrorKind, message: &'static str) -> std::io::Error {
    std::io::Error::new(kind, message)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration().map_err(AppError::from) {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read configuration");
            return Err(startup_error(std::io::ErrorKind::InvalidInput, "Configuration error"));
        }
    };

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;
    tracing::info!("Database connection pool created successfully");

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Migration error")
    })?;

    let key_store = PgKeyStore::new(pool.clone());
    match key_store.provision_if_missing().await {
        Ok(true) => tracing::info!("No signing key found, generated a new one"),
        Ok(false) => tracing::info!("Using stored signing key"),
        Err(e) => {
            tracing::error!("Failed to provision signing key: {}", e);
            return Err(startup_error(std::io::ErrorKind::Other, "Signing key error"));
        }
    }

    let cache = RedisCache::connect(&configuration.redis.url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to Redis: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Redis connection error")
        })?;

    let session_settings = &configuration.session;
    let sessions = SessionService::new(
        session_settings,
        Arc::new(key_store),
        Arc::new(PgUserStore::new(pool.clone())),
        Arc::new(PgRefreshLedger::new(pool, session_settings.refresh_token_ttl())),
        Arc::new(cache),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, web::Data::new(sessions))?;
    tracing::info!("Server started successfully");

    server.await
}
