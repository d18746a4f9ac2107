//! TCP 扇出服务器
//!
//! 外部订阅方连接后先发送握手帧 (协议版本 + 感兴趣的 topic)，
//! 之后只接收匹配 topic 的事件帧。订阅方发来的其他帧一律丢弃。
//!
//! 每个连接注册为一个 topic 订阅方：帧写入 socket 成功才算确认。
//! 注册时 outbox relay 被唤醒，离线期间积压的事件随即重投。

use std::net::SocketAddr;

use shared::message::{
    BusMessage, EventType, FrameError, HandshakePayload, PROTOCOL_VERSION, ResponsePayload,
    read_frame, write_frame,
};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::bus::{ConnectedClient, MessageBus, Subscription};

/// Delay before closing connection after sending error (allows client to receive the message)
const HANDSHAKE_ERROR_DELAY_MS: u64 = 100;

impl MessageBus {
    /// Bind the configured address and serve subscribers until shutdown
    pub async fn start_tcp_server(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.tcp_listen_addr).await?;
        tracing::info!(
            "Message bus TCP server listening on {}",
            self.config.tcp_listen_addr
        );
        self.serve(listener).await;
        Ok(())
    }

    /// Main accept loop on an already-bound listener
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown_token().cancelled() => {
                    tracing::info!("Message bus TCP server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Subscriber connected: {}", addr);
                            self.spawn_client_handler(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn spawn_client_handler(&self, stream: TcpStream, addr: SocketAddr) {
        let bus = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client_connection(bus, stream, addr).await {
                tracing::debug!("Subscriber {} handler finished: {}", addr, e);
            }
        });
    }
}

async fn handle_client_connection(
    bus: MessageBus,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), FrameError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let Some(client) = perform_handshake(&mut reader, &mut write_half, addr).await? else {
        return Ok(());
    };
    let client_id = client.id.clone();
    let shutdown_token = bus.shutdown_token().clone();
    let subscription = bus.register_as(client_id.clone(), client.topics.clone());
    bus.clients.insert(client_id.clone(), client.clone());

    let disconnect_token = CancellationToken::new();
    let forward_handle = spawn_forwarder(
        write_half,
        subscription,
        shutdown_token.clone(),
        disconnect_token.clone(),
    );

    read_until_disconnect(&mut reader, &shutdown_token, &client_id, addr, disconnect_token).await;

    let _ = forward_handle.await;
    bus.clients.remove(&client_id);
    tracing::debug!(client_id = %client_id, "Subscriber removed from registry");
    Ok(())
}

/// Returns `None` when the handshake was rejected (error already sent)
async fn perform_handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    addr: SocketAddr,
) -> Result<Option<ConnectedClient>, FrameError> {
    let msg = read_frame(reader).await?;

    if msg.event_type != EventType::Handshake {
        tracing::warn!("Subscriber {} failed to handshake: got {}", addr, msg.event_type);
        send_handshake_error(writer, &msg, "Expected Handshake message").await;
        return Ok(None);
    }

    let payload: HandshakePayload = match msg.parse_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Subscriber {} sent invalid handshake payload: {}", addr, e);
            send_handshake_error(writer, &msg, "Invalid handshake payload").await;
            return Ok(None);
        }
    };

    if payload.version != PROTOCOL_VERSION {
        tracing::warn!(
            "Subscriber {} protocol version mismatch: expected {}, got {}",
            addr,
            PROTOCOL_VERSION,
            payload.version
        );
        send_handshake_error(
            writer,
            &msg,
            &format!(
                "Protocol version mismatch: server={}, client={}",
                PROTOCOL_VERSION, payload.version
            ),
        )
        .await;
        return Ok(None);
    }

    let client = ConnectedClient {
        id: Uuid::new_v4().to_string(),
        name: payload.client_name,
        addr: addr.to_string(),
        topics: payload.topics,
    };

    let response = ResponsePayload::success(format!("Connected as subscriber: {}", client.id));
    let response = BusMessage::response(&response)
        .map_err(|e| FrameError::Io(std::io::Error::other(e)))?
        .with_correlation_id(msg.request_id);
    write_frame(writer, &response).await?;

    tracing::info!(
        client_id = %client.id,
        client_name = ?client.name,
        topics = ?client.topics,
        "Subscriber handshake success"
    );
    Ok(Some(client))
}

async fn send_handshake_error(writer: &mut OwnedWriteHalf, msg: &BusMessage, message: &str) {
    let response = match BusMessage::response(&ResponsePayload::error(message)) {
        Ok(response) => response.with_correlation_id(msg.request_id),
        Err(e) => {
            tracing::error!("Failed to encode handshake error: {}", e);
            return;
        }
    };
    if let Err(e) = write_frame(writer, &response).await {
        tracing::error!("Failed to send handshake error: {}", e);
    }

    tokio::time::sleep(tokio::time::Duration::from_millis(HANDSHAKE_ERROR_DELAY_MS)).await;
    let _ = writer.shutdown().await;
}

fn spawn_forwarder(
    mut writer: OwnedWriteHalf,
    mut subscription: Subscription,
    shutdown_token: CancellationToken,
    disconnect_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client_id = subscription.id().to_string();
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::debug!("Subscriber {} forwarder shutting down", client_id);
                    break;
                }
                _ = disconnect_token.cancelled() => {
                    tracing::debug!(client_id = %client_id, "Subscriber disconnected, forwarder stopping");
                    break;
                }
                delivery = subscription.recv() => {
                    let Some(delivery) = delivery else {
                        tracing::debug!(client_id = %client_id, "Bus closed");
                        break;
                    };
                    // 写失败时不确认，事件留在 outbox
                    if let Err(e) = write_frame(&mut writer, &delivery.message).await {
                        tracing::debug!(client_id = %client_id, "Subscriber write failed: {}", e);
                        break;
                    }
                    delivery.ack();
                }
            }
        }

        // 先注销，再关闭连接
        drop(subscription);
        let _ = writer.shutdown().await;
        tracing::debug!(client_id = %client_id, "Subscriber forwarder stopped");
    })
}

async fn read_until_disconnect(
    reader: &mut BufReader<OwnedReadHalf>,
    shutdown_token: &CancellationToken,
    client_id: &str,
    addr: SocketAddr,
    disconnect_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => break,

            read_result = read_frame(reader) => {
                match read_result {
                    Ok(msg) => {
                        tracing::warn!(
                            target: "security",
                            client_id = %client_id,
                            client_addr = %addr,
                            event_type = %msg.event_type,
                            "Subscriber sent an unexpected frame, dropping"
                        );
                    }
                    Err(FrameError::Disconnected) => {
                        tracing::debug!(client_id = %client_id, "Subscriber {} disconnected", addr);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(client_id = %client_id, "Subscriber {} read error: {}", addr, e);
                        break;
                    }
                }
            }
        }
    }
    disconnect_token.cancel();
}
