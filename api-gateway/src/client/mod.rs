//! Downstream RPC client
//!
//! 网关对每个下游服务持有一个 [`Downstream`]。每次调用：
//!
//! - 原样转发 `Authorization` 头 (网关从不解析令牌)
//! - 整个调用 (含重试) 受同一个截止时间约束，超时即取消并返回 `DeadlineExceeded`
//! - 只有 GET 在连接失败时重试，写操作从不重试
//! - 下游错误只保留错误码，消息与细节全部丢弃

mod stream;

pub use stream::collect_frames;

use std::time::{Duration, Instant};

use axum::body::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value;
use shared::error::{AppError, AppResult, ErrorCategory, ErrorCode};
use shared::models::Order;
use shared::ApiResponse;
use thiserror::Error;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} unreachable: {source}")]
    Unreachable {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} stream interrupted: {reason}")]
    Interrupted { service: &'static str, reason: String },

    #[error("{service} sent a malformed response: {reason}")]
    Malformed { service: &'static str, reason: String },

    #[error("{service} rejected the call with {code}")]
    Rejected { service: &'static str, code: ErrorCode },

    #[error("invalid downstream url: {0}")]
    InvalidUrl(String),
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        match err {
            // 下游的基础设施故障对调用方统一表现为暂时不可用
            ClientError::Rejected { code, .. }
                if code.category() == ErrorCategory::System && code != ErrorCode::TimeoutError =>
            {
                AppError::unavailable()
            }
            ClientError::Rejected { code, .. } => AppError::new(code),
            ClientError::InvalidUrl(_) => AppError::new(ErrorCode::InvalidRequest),
            ClientError::Unreachable { .. }
            | ClientError::Interrupted { .. }
            | ClientError::Malformed { .. } => AppError::unavailable(),
        }
    }
}

/// Deadline and retry budget of one downstream call
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub read_retries: u32,
    pub retry_base: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            read_retries: 3,
            retry_base: Duration::from_millis(100),
        }
    }
}

/// One outbound call
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub raw_query: Option<String>,
    pub params: Vec<(&'static str, String)>,
    pub authorization: Option<HeaderValue>,
    pub request_id: Option<HeaderValue>,
    pub body: Bytes,
}

impl Call {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            raw_query: None,
            params: Vec::new(),
            authorization: None,
            request_id: None,
            body: Bytes::new(),
        }
    }

    /// 原样透传入站的查询串
    pub fn raw_query(mut self, query: Option<&str>) -> Self {
        self.raw_query = query.map(str::to_string);
        self
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    fn is_idempotent(&self) -> bool {
        self.method == Method::GET
    }
}

/// A backend service reachable over HTTP
#[derive(Debug, Clone)]
pub struct Downstream {
    name: &'static str,
    http: reqwest::Client,
    base_url: String,
    policy: CallPolicy,
}

impl Downstream {
    pub fn new(name: &'static str, http: reqwest::Client, base_url: &str, policy: CallPolicy) -> Self {
        Self {
            name,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Unary call; returns the `data` of the downstream envelope
    pub async fn execute(&self, call: Call) -> AppResult<Option<Value>> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.policy.timeout, async {
            let resp = self.send(&call).await?;
            read_envelope(self.name, resp).await
        })
        .await;
        self.finish(&call, started, result)
    }

    /// Server-streamed order listing, drained into one ordered list
    ///
    /// 第一个错误帧直接作为整个调用的错误返回，不返回部分结果。
    pub async fn collect_orders(&self, call: Call) -> AppResult<Vec<Order>> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.policy.timeout, async {
            let resp = self.send(&call).await?;
            let status = resp.status();
            if !status.is_success() {
                read_envelope(self.name, resp).await?;
                return Err(ClientError::Rejected {
                    service: self.name,
                    code: code_for_status(status),
                });
            }
            collect_frames(self.name, resp.bytes_stream()).await
        })
        .await;
        self.finish(&call, started, result)
    }

    fn finish<T>(
        &self,
        call: &Call,
        started: Instant,
        result: Result<Result<T, ClientError>, tokio::time::error::Elapsed>,
    ) -> AppResult<T> {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ClientError::Rejected { service, code })) => {
                tracing::debug!(service, method = %call.method, path = %call.path, code = %code, "Downstream rejected call");
                Err(ClientError::Rejected { service, code }.into())
            }
            Ok(Err(e)) => {
                tracing::error!(
                    service = self.name,
                    method = %call.method,
                    path = %call.path,
                    elapsed_ms,
                    error = %e,
                    "Downstream call failed"
                );
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(
                    service = self.name,
                    method = %call.method,
                    path = %call.path,
                    timeout_ms = self.policy.timeout.as_millis() as u64,
                    "Downstream deadline exceeded"
                );
                Err(AppError::deadline_exceeded())
            }
        }
    }

    async fn send(&self, call: &Call) -> Result<reqwest::Response, ClientError> {
        let retries = if call.is_idempotent() {
            self.policy.read_retries
        } else {
            0
        };

        let mut attempt = 0;
        loop {
            match self.request(call)?.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_connect() && attempt < retries => {
                    let delay =
                        shared::util::backoff_delay(self.policy.retry_base, self.policy.timeout, attempt);
                    tracing::debug!(
                        service = self.name,
                        attempt = attempt + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        "Downstream connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ClientError::Unreachable {
                        service: self.name,
                        source,
                    });
                }
            }
        }
    }

    fn request(&self, call: &Call) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base_url, call.path))
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if call.raw_query.is_some() {
            url.set_query(call.raw_query.as_deref());
        }
        if !call.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &call.params {
                pairs.append_pair(key, value);
            }
        }

        let mut req = self.http.request(call.method.clone(), url);
        if let Some(auth) = &call.authorization {
            req = req.header(AUTHORIZATION, auth.clone());
        }
        if let Some(id) = &call.request_id {
            req = req.header(X_REQUEST_ID, id.clone());
        }
        if !call.body.is_empty() {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(call.body.clone());
        }
        Ok(req)
    }
}

async fn read_envelope(
    service: &'static str,
    resp: reqwest::Response,
) -> Result<Option<Value>, ClientError> {
    let status = resp.status();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ClientError::Interrupted {
            service,
            reason: e.to_string(),
        })?;
    let body = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice::<Value>(&bytes).ok()
    };
    interpret(service, status, body)
}

/// 统一信封按错误码处理；其他 JSON (目录服务) 成功时原样作为数据
fn interpret(
    service: &'static str,
    status: StatusCode,
    body: Option<Value>,
) -> Result<Option<Value>, ClientError> {
    match body {
        Some(value) if is_envelope(&value) => {
            let envelope: ApiResponse<Value> =
                serde_json::from_value(value).map_err(|e| ClientError::Malformed {
                    service,
                    reason: e.to_string(),
                })?;
            envelope
                .into_result()
                .map_err(|e| ClientError::Rejected { service, code: e.code })
        }
        Some(value) if status.is_success() => Ok(Some(value)),
        None if status.is_success() => Ok(None),
        _ => Err(ClientError::Rejected {
            service,
            code: code_for_status(status),
        }),
    }
}

fn is_envelope(value: &Value) -> bool {
    value.get("code").is_some_and(Value::is_u64) && value.get("message").is_some_and(Value::is_string)
}

/// Fallback when a failed response carries no error code
fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST => ErrorCode::InvalidRequest,
        StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::ValidationFailed,
        StatusCode::UNAUTHORIZED => ErrorCode::NotAuthenticated,
        StatusCode::FORBIDDEN => ErrorCode::PermissionDenied,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::AlreadyExists,
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => ErrorCode::TimeoutError,
        _ => ErrorCode::ServiceUnavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_error_keeps_code_only() {
        let body = json!({"code": 4001, "message": "order o-1 missing in /var/db", "details": {"order_id": "o-1"}});
        let err = interpret("orders", StatusCode::NOT_FOUND, Some(body)).unwrap_err();
        let app = AppError::from(err);
        assert_eq!(app.code, ErrorCode::OrderNotFound);
        assert_eq!(app.message, ErrorCode::OrderNotFound.message());
        assert!(app.details.is_none());
    }

    #[test]
    fn test_downstream_infrastructure_error_becomes_unavailable() {
        let body = json!({"code": 9002, "message": "redb: file locked"});
        let err = interpret("orders", StatusCode::INTERNAL_SERVER_ERROR, Some(body)).unwrap_err();
        assert_eq!(AppError::from(err).code, ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn test_success_envelope_yields_data() {
        let body = json!({"code": 0, "message": "OK", "data": {"id": "o-1"}});
        let data = interpret("orders", StatusCode::OK, Some(body)).unwrap();
        assert_eq!(data, Some(json!({"id": "o-1"})));
    }

    #[test]
    fn test_plain_json_passes_through() {
        let body = json!([{"id": "p1", "name": "Tea"}]);
        let data = interpret("catalog", StatusCode::OK, Some(body.clone())).unwrap();
        assert_eq!(data, Some(body));
    }

    #[test]
    fn test_plain_failure_mapped_by_status() {
        let err = interpret("catalog", StatusCode::NOT_FOUND, None).unwrap_err();
        assert_eq!(AppError::from(err).code, ErrorCode::NotFound);

        let err = interpret("catalog", StatusCode::BAD_GATEWAY, Some(json!({"oops": true}))).unwrap_err();
        assert_eq!(AppError::from(err).code, ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn test_only_get_is_retried() {
        assert!(Call::new(Method::GET, "/x").is_idempotent());
        assert!(!Call::new(Method::POST, "/x").is_idempotent());
        assert!(!Call::new(Method::DELETE, "/x").is_idempotent());
    }
}
