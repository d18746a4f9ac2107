//! auth-service - Session Authority binary

use std::time::Duration;

use auth_service::{Config, ServerState, api};

/// 注销列表清理间隔
const REVOCATION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    shared::logger::init_logger_with_file(
        &config.log_level,
        config.log_json,
        config.log_dir.as_deref(),
        "auth-service",
    )?;

    tracing::info!(data_dir = %config.data_dir.display(), "Starting auth-service");

    let state = ServerState::initialize(config)?;
    let app = api::router(state.clone());

    // 定期清理已自然过期的注销记录
    let revocations = state.auth.revocations().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REVOCATION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match revocations.purge_expired(chrono::Utc::now().timestamp()).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired revocation entries"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge revocation entries"),
            }
        }
    });

    let addr = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("auth-service listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("auth-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
