//! 二进制帧编解码
//!
//! ```text
//! ┌──────────┬──────────────┬────────────────┬────────────┬─────────┐
//! │ type: u8 │ request: 16B │ correlation:16B│ len: u32LE │ payload │
//! └──────────┴──────────────┴────────────────┴────────────┴─────────┘
//! ```
//!
//! correlation 为全零表示 None。

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use super::{BusMessage, EventType};

/// Largest payload accepted from the wire
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("unknown event type: {0}")]
    UnknownEventType(u8),

    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 从异步流中读取一帧
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<BusMessage, FrameError> {
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Disconnected);
        }
        Err(e) => return Err(e.into()),
    }
    let event_type = EventType::try_from(type_buf[0]).map_err(FrameError::UnknownEventType)?;

    let mut uuid_buf = [0u8; 16];
    reader.read_exact(&mut uuid_buf).await?;
    let request_id = Uuid::from_bytes(uuid_buf);

    reader.read_exact(&mut uuid_buf).await?;
    let correlation = Uuid::from_bytes(uuid_buf);
    let correlation_id = (!correlation.is_nil()).then_some(correlation);

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(BusMessage {
        request_id,
        event_type,
        correlation_id,
        payload,
    })
}

/// 向异步流写入一帧
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), FrameError> {
    if msg.payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(msg.payload.len()));
    }

    let mut data = Vec::with_capacity(37 + msg.payload.len());
    data.push(msg.event_type as u8);
    data.extend_from_slice(msg.request_id.as_bytes());
    data.extend_from_slice(msg.correlation_id.unwrap_or(Uuid::nil()).as_bytes());
    data.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&msg.payload);

    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}
