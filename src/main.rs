use anyhow::{Context, Result};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;

use coursetrack::config::AppConfig;
use coursetrack::learn::{configure_learn_routes, CourseEngine, PgLearningStore};
use coursetrack::shared::state::AppState;
use coursetrack::shared::utils::{create_conn, run_migrations};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!("Starting coursetrack with {:?}", config.learn);

    let pool = create_conn(&config.database).context("Failed to create database pool")?;
    run_migrations(&pool)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to run migrations")?;
    info!("Database migrations applied");

    if config.learn.master_password.is_none() {
        info!("LEARN_MASTER_PASSWORD not set, privileged operations are disabled");
    }

    let engine = CourseEngine::new(PgLearningStore::new(pool), config.learn.clone());
    let app_state = Arc::new(AppState::new(engine));
    let app = configure_learn_routes().with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}
