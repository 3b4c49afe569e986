//! PharmaChat API server entry point

use anyhow::Context;

use pharmachat_api::{config::Config, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pharmachat_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = pharmachat_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    pharmachat_shared::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database ready");

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, pool);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "PharmaChat API listening");

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;
    Ok(())
}
