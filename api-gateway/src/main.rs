//! api-gateway binary

use api_gateway::{Config, GatewayState, api};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    shared::logger::init_logger_with_file(
        &config.log_level,
        config.log_json,
        config.log_dir.as_deref(),
        "api-gateway",
    )?;

    tracing::info!(
        auth = %config.auth_service_url,
        orders = %config.order_service_url,
        catalog = %config.product_service_url,
        timeout_ms = config.downstream_timeout_ms,
        "Starting api-gateway"
    );

    let state = GatewayState::new(config)?;
    let addr = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("api-gateway listening on {addr}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("api-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
