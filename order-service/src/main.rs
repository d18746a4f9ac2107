//! order-service binary

use order_service::message::IdempotentSubscriber;
use order_service::{Config, ServerState, api};
use shared::models::{TOPIC_ORDER_APPROVED, TOPIC_ORDER_CREATED};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    shared::logger::init_logger_with_file(
        &config.log_level,
        config.log_json,
        config.log_dir.as_deref(),
        "order-service",
    )?;

    tracing::info!(data_dir = %config.data_dir.display(), "Starting order-service");

    let state = ServerState::initialize(config)?;

    // 审计日志只观察事件，不替外部订阅方确认投递
    let audit = IdempotentSubscriber::observe(
        state.bus.subscribe(),
        &[TOPIC_ORDER_CREATED, TOPIC_ORDER_APPROVED],
    );
    tokio::spawn(audit.run(|event| {
        tracing::info!(
            target: "audit",
            order_id = %event.order_id,
            user_id = %event.user_id,
            event_type = %event.event_type,
            total = event.total,
            "Order event"
        );
    }));

    let shutdown = CancellationToken::new();
    tokio::spawn(state.outbox_relay().run(shutdown.clone()));

    let bus = state.bus.clone();
    tokio::spawn(async move {
        if let Err(e) = bus.start_tcp_server().await {
            tracing::error!("Message bus TCP server failed: {e}");
        }
    });

    let addr = format!("0.0.0.0:{}", state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("order-service listening on {addr}");

    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    state.bus.shutdown();
    tracing::info!("order-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
