//! NDJSON stream aggregation

use std::fmt;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use shared::error::ErrorCode;
use shared::models::{Order, OrderFrame};

use super::ClientError;

/// Drain an order stream to completion, stopping at the first error frame
///
/// 帧可能跨越多个 chunk；最后一行允许没有换行符。
pub async fn collect_frames<S, E>(service: &'static str, body: S) -> Result<Vec<Order>, ClientError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut orders = Vec::new();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ClientError::Interrupted {
            service,
            reason: e.to_string(),
        })?;
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            if let Some(order) = parse_frame(service, &line)? {
                orders.push(order);
            }
        }
    }

    if let Some(order) = parse_frame(service, &buf)? {
        orders.push(order);
    }
    Ok(orders)
}

fn parse_frame(service: &'static str, line: &[u8]) -> Result<Option<Order>, ClientError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }

    match serde_json::from_slice::<OrderFrame>(line) {
        Ok(OrderFrame::Order(order)) => Ok(Some(order)),
        Ok(OrderFrame::Error { code, .. }) => Err(ClientError::Rejected {
            service,
            code: ErrorCode::try_from(code).unwrap_or(ErrorCode::Unknown),
        }),
        Err(e) => Err(ClientError::Malformed {
            service,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use shared::models::{OrderItem, OrderStatus};

    fn order(id: &str) -> Order {
        Order {
            id: id.into(),
            user_id: "u-1".into(),
            items: vec![OrderItem::new("p1", 1)],
            total: 1.0,
            address: "a".into(),
            status: OrderStatus::Created,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn line(frame: &OrderFrame) -> String {
        format!("{}\n", serde_json::to_string(frame).unwrap())
    }

    fn chunks(parts: Vec<String>) -> impl Stream<Item = Result<Bytes, String>> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let text = line(&OrderFrame::Order(order("o-1"))) + &line(&OrderFrame::Order(order("o-2")));
        let (a, b) = text.split_at(17);
        let orders = collect_frames("orders", chunks(vec![a.to_string(), b.to_string()]))
            .await
            .unwrap();
        assert_eq!(orders.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(), vec!["o-1", "o-2"]);
    }

    #[tokio::test]
    async fn test_first_error_surfaces_instead_of_partial_result() {
        let parts = vec![
            line(&OrderFrame::Order(order("o-1"))),
            line(&OrderFrame::Error {
                code: 9002,
                message: "disk".into(),
            }),
            line(&OrderFrame::Order(order("o-2"))),
        ];
        let err = collect_frames("orders", chunks(parts)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected {
                code: ErrorCode::DatabaseError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let text = serde_json::to_string(&OrderFrame::Order(order("o-1"))).unwrap();
        let orders = collect_frames("orders", chunks(vec![text])).await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_interrupts() {
        let parts: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from(line(&OrderFrame::Order(order("o-1"))))),
            Err("connection reset".into()),
        ];
        let err = collect_frames("orders", stream::iter(parts)).await.unwrap_err();
        assert!(matches!(err, ClientError::Interrupted { .. }));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let orders = collect_frames("orders", chunks(vec![])).await.unwrap();
        assert!(orders.is_empty());
    }
}
