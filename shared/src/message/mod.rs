//! 事件总线消息类型定义
//!
//! 这些类型在 order-service 的总线与外部订阅方之间共享，用于
//! 进程内（broadcast）和网络（TCP）通信。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

use crate::models::{DomainEvent, DomainEventType};

pub mod codec;
pub use codec::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};

/// 协议版本号
pub const PROTOCOL_VERSION: u16 = 1;

/// 总线帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 握手消息 (订阅方 -> 服务端)
    Handshake = 0,
    /// 握手应答
    Response = 1,
    /// `order.created`
    OrderCreated = 2,
    /// `order.approved`
    OrderApproved = 3,
}

impl TryFrom<u8> for EventType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::Handshake),
            1 => Ok(EventType::Response),
            2 => Ok(EventType::OrderCreated),
            3 => Ok(EventType::OrderApproved),
            other => Err(other),
        }
    }
}

impl From<DomainEventType> for EventType {
    fn from(value: DomainEventType) -> Self {
        match value {
            DomainEventType::OrderCreated => EventType::OrderCreated,
            DomainEventType::OrderApproved => EventType::OrderApproved,
        }
    }
}

impl EventType {
    /// Topic name for domain-event frames
    pub fn topic(&self) -> Option<&'static str> {
        match self {
            EventType::OrderCreated => Some(DomainEventType::OrderCreated.topic()),
            EventType::OrderApproved => Some(DomainEventType::OrderApproved.topic()),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Handshake => write!(f, "handshake"),
            EventType::Response => write!(f, "response"),
            EventType::OrderCreated => write!(f, "order.created"),
            EventType::OrderApproved => write!(f, "order.approved"),
        }
    }
}

/// 握手载荷：订阅方声明协议版本与感兴趣的 topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub version: u16,
    pub client_name: Option<String>,
    /// 空列表表示订阅全部 topic
    #[serde(default)]
    pub topics: Vec<String>,
}

/// 握手应答载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub success: bool,
    pub message: String,
}

impl ResponsePayload {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 消息总线消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    pub correlation_id: Option<Uuid>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            correlation_id: None,
            payload,
        }
    }

    /// 设置关联 ID (握手应答)
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// 创建领域事件消息
    pub fn event(event: &DomainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event.event_type.into(), serde_json::to_vec(event)?))
    }

    /// 创建握手消息
    pub fn handshake(payload: &HandshakePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(EventType::Handshake, serde_json::to_vec(payload)?))
    }

    /// 创建应答消息
    pub fn response(payload: &ResponsePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(EventType::Response, serde_json::to_vec(payload)?))
    }

    /// 解析载荷为指定类型
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Topic of a domain-event frame
    pub fn topic(&self) -> Option<&'static str> {
        self.event_type.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderItem, OrderStatus};

    #[test]
    fn test_event_message() {
        let event = DomainEvent {
            event_type: DomainEventType::OrderApproved,
            order_id: "o-1".into(),
            user_id: "u-1".into(),
            items: vec![OrderItem::new("p1", 2)],
            total: 100.0,
            address: "Main St 1".into(),
            status: OrderStatus::Approved,
        };

        let msg = BusMessage::event(&event).unwrap();
        assert_eq!(msg.event_type, EventType::OrderApproved);
        assert_eq!(msg.topic(), Some("order.approved"));
        assert_eq!(msg.parse_payload::<DomainEvent>().unwrap(), event);
    }

    #[test]
    fn test_handshake_message() {
        let payload = HandshakePayload {
            version: PROTOCOL_VERSION,
            client_name: Some("notification-service".to_string()),
            topics: vec!["order.created".to_string()],
        };

        let msg = BusMessage::handshake(&payload).unwrap();
        assert_eq!(msg.event_type, EventType::Handshake);
        assert!(msg.topic().is_none());
        assert_eq!(msg.parse_payload::<HandshakePayload>().unwrap(), payload);
    }

    #[test]
    fn test_unknown_event_type() {
        assert_eq!(EventType::try_from(9), Err(9));
    }
}
